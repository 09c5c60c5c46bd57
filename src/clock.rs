// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

/// An epoch represents a single valid state in the blockchain
pub type ChainEpoch = i64;

/// Duration of each tipset epoch, in seconds.
pub const EPOCH_DURATION_SECONDS: i64 = 30;
