// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! canopy walks a Filecoin-like chain tipset by tipset, extracts per-tipset
//! facts through a set of concurrent tasks, and upserts them into PostgreSQL
//! under a versioned schema. The chain itself is consumed through the narrow
//! read-only [`node::NodeApi`] capability; no messages are executed here.

pub mod actors;
pub mod address;
pub mod bigint;
pub mod blocks;
pub mod chain;
pub mod cli;
pub mod clock;
pub mod encoding;
pub mod ipld;
pub mod message;
pub mod model;
pub mod node;
pub mod state_tree;
pub mod storage;
pub mod tasks;

#[cfg(test)]
pub mod testutil;
