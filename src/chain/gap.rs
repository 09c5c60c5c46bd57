// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashSet;
use tracing::{info, warn};

use super::{ChainError, Clock, TipSetIndexer, Walker};
use crate::clock::ChainEpoch;
use crate::model::reports::{GapReport, GAP_STATUS_FILLED, GAP_STATUS_GAP, STATUS_INFO, STATUS_OK};
use crate::node::NodeApi;
use crate::storage::Storage;
use crate::tasks::Cancel;

/// Consecutive fill failures tolerated before the filler aborts.
const MAX_FILL_ERRORS: usize = 10;

/// Scans the processing-report table for `(height, task)` pairs without a
/// successful report and records them as gap rows.
pub struct GapFinder {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    reporter: String,
    min_height: ChainEpoch,
    max_height: ChainEpoch,
    tasks: Vec<String>,
}

impl GapFinder {
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        reporter: &str,
        min_height: ChainEpoch,
        max_height: ChainEpoch,
        tasks: &[&str],
    ) -> Self {
        Self {
            storage,
            clock,
            reporter: reporter.to_string(),
            min_height,
            max_height,
            tasks: tasks.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Computes and persists the gap rows, returning them.
    pub async fn find(&self) -> Result<Vec<GapReport>, ChainError> {
        if self.min_height > self.max_height {
            return Err(ChainError::InvalidRange(self.min_height, self.max_height));
        }

        let statuses = self
            .storage
            .report_statuses(self.min_height, self.max_height)
            .await?;

        // A height is covered for a task once any successful or skipped
        // attempt is on record; ERROR rows and holes both gap.
        let mut covered: AHashSet<(i64, String)> = AHashSet::new();
        for row in statuses {
            if row.status == STATUS_OK || row.status == STATUS_INFO {
                covered.insert((row.height, row.task));
            }
        }

        let mut gaps = Vec::new();
        for height in self.min_height..=self.max_height {
            for task in &self.tasks {
                if !covered.contains(&(height, task.clone())) {
                    gaps.push(GapReport {
                        height,
                        task: task.clone(),
                        reporter: self.reporter.clone(),
                        status: GAP_STATUS_GAP.to_string(),
                        reported_at: self.clock.now(),
                    });
                }
            }
        }

        info!(
            min = self.min_height,
            max = self.max_height,
            gaps = gaps.len(),
            "gap scan complete"
        );
        if !gaps.is_empty() {
            self.storage.persist_batch(&[&gaps]).await?;
        }
        Ok(gaps)
    }
}

/// Re-walks gapped heights one tipset at a time and marks the gap rows
/// filled.
pub struct GapFiller {
    node: Arc<dyn NodeApi>,
    indexer: Arc<TipSetIndexer>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    reporter: String,
    min_height: ChainEpoch,
    max_height: ChainEpoch,
}

impl GapFiller {
    pub fn new(
        node: Arc<dyn NodeApi>,
        indexer: Arc<TipSetIndexer>,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        reporter: &str,
        min_height: ChainEpoch,
        max_height: ChainEpoch,
    ) -> Self {
        Self {
            node,
            indexer,
            storage,
            clock,
            reporter: reporter.to_string(),
            min_height,
            max_height,
        }
    }

    /// Fills every unfilled gap in range, returning the number of heights
    /// re-walked.
    pub async fn fill(&self, cancel: &Cancel) -> Result<usize, ChainError> {
        let gaps = self
            .storage
            .unfilled_gaps(self.min_height, self.max_height)
            .await?;

        let mut by_height: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        for gap in gaps {
            by_height.entry(gap.height).or_default().push(gap.task);
        }

        let head = self.node.chain_head().await?;
        let mut errors = 0usize;
        let mut filled = 0usize;

        for (height, tasks) in by_height {
            if cancel.is_cancelled() {
                break;
            }

            // Message-joined tasks report at the parent height of the pair
            // that produced them, so filling height h means re-visiting h
            // and its direct child. A canonical tipset below h+1 simply
            // narrows the walk; a null round at h leaves nothing to index.
            let start = self
                .node
                .chain_get_tipset_by_height(height + 1, head.key())
                .await?;
            if start.epoch() >= height {
                let walker = Walker::new(self.indexer.clone(), height, height + 1);
                if let Err(e) = walker.walk_chain(self.node.as_ref(), start, cancel).await {
                    errors += 1;
                    warn!(height, error = %e, "failed to fill gap");
                    if errors >= MAX_FILL_ERRORS {
                        return Err(e);
                    }
                    continue;
                }
            }

            let marks: Vec<GapReport> = tasks
                .into_iter()
                .map(|task| GapReport {
                    height,
                    task,
                    reporter: self.reporter.clone(),
                    status: GAP_STATUS_FILLED.to_string(),
                    reported_at: self.clock.now(),
                })
                .collect();
            self.storage.persist_batch(&[&marks]).await?;
            filled += 1;
            errors = 0;
        }

        info!(filled, "gap fill complete");
        Ok(filled)
    }
}
