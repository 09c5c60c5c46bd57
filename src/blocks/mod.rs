// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod header;
mod tipset;

pub use header::{BeaconEntry, BlockHeader, BlockHeaderBuilder, ElectionProof, Ticket};
pub use tipset::{Tipset, TipsetKeys};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("no blocks for tipset")]
    NoBlocks,
    #[error("invalid tipset: {0}")]
    InvalidTipset(String),
    #[error("encoding block: {0}")]
    Encoding(String),
}

impl From<crate::encoding::Error> for Error {
    fn from(e: crate::encoding::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}
