// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Chain traversal drivers: the per-tipset indexer, the historical walker,
//! the live-head watcher and the gap tracker.

mod cache;
mod gap;
mod indexer;
mod walker;
mod watcher;

pub use cache::TipSetCache;
pub use gap::{GapFiller, GapFinder};
pub use indexer::TipSetIndexer;
pub use walker::Walker;
pub use watcher::{Watcher, WatcherConfig};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::node::NodeError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("invalid range: min {0} is above max {1}")]
    InvalidRange(i64, i64),
    #[error("head change subscription closed")]
    SubscriptionClosed,
}

/// Source of report timestamps, injectable so tests are deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
