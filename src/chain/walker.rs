// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use tracing::{debug, info};

use super::{ChainError, TipSetIndexer};
use crate::blocks::Tipset;
use crate::clock::ChainEpoch;
use crate::node::NodeApi;
use crate::tasks::Cancel;

/// Walks parent pointers backward from a head, indexing every tipset whose
/// height falls in the closed `[min_height, max_height]` range. Traversal
/// is strictly ordered; per-tipset tasks run in parallel inside the
/// indexer. A fatal error aborts the walk without restarting.
pub struct Walker {
    indexer: Arc<TipSetIndexer>,
    min_height: ChainEpoch,
    max_height: ChainEpoch,
}

impl Walker {
    pub fn new(indexer: Arc<TipSetIndexer>, min_height: ChainEpoch, max_height: ChainEpoch) -> Self {
        Self {
            indexer,
            min_height,
            max_height,
        }
    }

    pub async fn walk_chain(
        &self,
        node: &dyn NodeApi,
        head: Arc<Tipset>,
        cancel: &Cancel,
    ) -> Result<(), ChainError> {
        if self.min_height > self.max_height {
            return Err(ChainError::InvalidRange(self.min_height, self.max_height));
        }
        info!(
            min = self.min_height,
            max = self.max_height,
            head = head.epoch(),
            "walking chain"
        );

        let mut ts = head;
        loop {
            if cancel.is_cancelled() {
                debug!("walk cancelled");
                return Ok(());
            }
            if ts.epoch() < self.min_height {
                break;
            }
            if ts.epoch() <= self.max_height {
                self.indexer.tip_set(ts.clone()).await?;
            }
            if ts.epoch() == 0 || ts.parents().is_empty() {
                break;
            }
            // A parent key lookup skips over null rounds to the next
            // non-empty ancestor.
            ts = node.chain_get_tipset(ts.parents()).await?;
        }

        info!(min = self.min_height, max = self.max_height, "walk complete");
        Ok(())
    }
}
