// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, error, warn};

use super::{ChainError, TipSetCache, TipSetIndexer};
use crate::node::{HeadChange, NodeApi};
use crate::tasks::Cancel;

#[derive(Clone, Debug)]
pub struct WatcherConfig {
    /// Tipsets that must land beyond a head before it is indexed.
    pub confidence: usize,
    /// Bound on buffered head events while the indexer catches up; excess
    /// events are dropped and recovered later by gap fill.
    pub head_buffer_size: usize,
    /// Consecutive subscription failures tolerated before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            confidence: 5,
            head_buffer_size: 16,
            max_reconnect_attempts: 10,
        }
    }
}

/// Follows live head changes with a confidence lag. Reverts within the
/// confidence window retract buffered tipsets; deeper reorgs are logged and
/// left to stand in the database.
pub struct Watcher {
    node: Arc<dyn NodeApi>,
    indexer: Arc<TipSetIndexer>,
    config: WatcherConfig,
}

impl Watcher {
    pub fn new(node: Arc<dyn NodeApi>, indexer: Arc<TipSetIndexer>, config: WatcherConfig) -> Self {
        Self {
            node,
            indexer,
            config,
        }
    }

    pub async fn run(&self, cancel: &Cancel) -> Result<(), ChainError> {
        let mut backoff = Duration::from_secs(1);
        let mut failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let subscription = match self.node.chain_notify().await {
                Ok(rx) => {
                    failures = 0;
                    backoff = Duration::from_secs(1);
                    rx
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.config.max_reconnect_attempts {
                        error!(error = %e, failures, "giving up on head change subscription");
                        return Err(ChainError::SubscriptionClosed);
                    }
                    warn!(error = %e, failures, backoff = ?backoff, "head change subscription failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(60));
                    continue;
                }
            };

            // Decouple the subscription from indexing speed with a bounded
            // buffer; a full buffer drops the newest events, not the tail.
            let (tx, buffered) = flume::bounded(self.config.head_buffer_size);
            let forward_cancel = cancel.clone();
            tokio::spawn(async move {
                let mut stream = subscription.into_stream();
                while let Some(events) = stream.next().await {
                    if forward_cancel.is_cancelled() {
                        break;
                    }
                    for event in events {
                        if tx.try_send(event).is_err() {
                            warn!("head event lost: indexer is behind");
                        }
                    }
                }
            });

            let mut cache = TipSetCache::new(self.config.confidence);
            while let Ok(event) = buffered.recv_async().await {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                match event {
                    HeadChange::Current(ts) | HeadChange::Apply(ts) => {
                        debug!(height = ts.epoch(), "head applied");
                        let released = match cache.add(ts) {
                            Ok(released) => released,
                            Err(e) => {
                                warn!(error = %e, "skipping out-of-order head");
                                continue;
                            }
                        };
                        if let Some(ts) = released {
                            // Task errors are recorded in processing
                            // reports; only the watcher loop stays alive.
                            if let Err(e) = self.indexer.tip_set(ts).await {
                                error!(error = %e, "failed to index tipset");
                            }
                        }
                    }
                    HeadChange::Revert(ts) => {
                        if let Err(e) = cache.revert(&ts) {
                            // Deeper than the confidence window: accepted,
                            // not repaired.
                            warn!(height = ts.epoch(), error = %e, "revert beyond confidence window");
                        }
                    }
                }
            }

            warn!("head change subscription closed, resubscribing");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::chain::TipSetIndexer;
    use crate::tasks::BLOCKS_TASK;
    use crate::testutil::{ChainBuilder, MemoryStorage, MockClock};

    async fn wait_for_rows(storage: &MemoryStorage, table: &str, want: usize) {
        for _ in 0..500 {
            if storage.count(table) >= want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out waiting for {} rows in {}, have {}",
            want,
            table,
            storage.count(table)
        );
    }

    #[tokio::test]
    async fn watcher_releases_heads_past_confidence() {
        let mut b = ChainBuilder::new();
        for _ in 0..6 {
            b.extend();
        }
        let tipsets = b.tipsets().to_vec();
        let node = b.node();
        // Rewind the head so the subscription starts at height 1.
        node.apply_head(tipsets[1].clone());

        let storage = Arc::new(MemoryStorage::new());
        let indexer = Arc::new(
            TipSetIndexer::new(
                node.clone(),
                storage.clone(),
                Duration::from_secs(30),
                "testwatcher",
                &[BLOCKS_TASK],
            )
            .unwrap()
            .with_clock(Arc::new(MockClock::new())),
        );

        let watcher = Watcher::new(
            node.clone(),
            indexer,
            WatcherConfig {
                confidence: 2,
                head_buffer_size: 16,
                max_reconnect_attempts: 3,
            },
        );
        let cancel = Cancel::new();
        let watcher_cancel = cancel.clone();
        let handle = tokio::spawn(async move { watcher.run(&watcher_cancel).await });

        // Heads 2..=5 land; with confidence 2 the tipsets at heights 1..=3
        // fall out of the window and are indexed.
        tokio::time::sleep(Duration::from_millis(50)).await;
        for ts in &tipsets[2..=5] {
            node.apply_head(ts.clone());
        }

        wait_for_rows(&storage, "block_headers", 3).await;
        assert_eq!(storage.count("block_headers"), 3);
        let heights: Vec<i64> = storage
            .rows("block_headers")
            .iter()
            .map(|r| r["height"].as_i64().unwrap())
            .collect();
        assert!(heights.contains(&1) && heights.contains(&2) && heights.contains(&3));

        cancel.cancel();
        node.apply_head(tipsets[5].clone());
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    #[tokio::test]
    async fn revert_within_window_retracts_head() {
        let mut b = ChainBuilder::new();
        for _ in 0..5 {
            b.extend();
        }
        let tipsets = b.tipsets().to_vec();
        let node = b.node();
        node.apply_head(tipsets[1].clone());

        let storage = Arc::new(MemoryStorage::new());
        let indexer = Arc::new(
            TipSetIndexer::new(
                node.clone(),
                storage.clone(),
                Duration::from_secs(30),
                "testwatcher",
                &[BLOCKS_TASK],
            )
            .unwrap()
            .with_clock(Arc::new(MockClock::new())),
        );

        let watcher = Watcher::new(
            node.clone(),
            indexer,
            WatcherConfig {
                confidence: 3,
                head_buffer_size: 16,
                max_reconnect_attempts: 3,
            },
        );
        let cancel = Cancel::new();
        let watcher_cancel = cancel.clone();
        let handle = tokio::spawn(async move { watcher.run(&watcher_cancel).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        // Apply 2 and 3, then revert 3: the buffer never overflows, nothing
        // is indexed.
        node.apply_head(tipsets[2].clone());
        node.apply_head(tipsets[3].clone());
        node.revert_head(tipsets[3].clone());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(storage.count("block_headers"), 0);

        // Re-applying 3 and pushing 4 releases height 1 only.
        node.apply_head(tipsets[3].clone());
        node.apply_head(tipsets[4].clone());
        wait_for_rows(&storage, "block_headers", 1).await;
        assert_eq!(storage.count("block_headers"), 1);
        assert_eq!(
            storage.rows("block_headers")[0]["height"],
            serde_json::json!(1)
        );

        cancel.cancel();
        node.apply_head(tipsets[4].clone());
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    #[tokio::test]
    async fn watcher_reconnects_after_subscribe_failures() {
        let mut b = ChainBuilder::new();
        for _ in 0..3 {
            b.extend();
        }
        let node = b.node();
        node.fail_next_subscribes(2);

        let storage = Arc::new(MemoryStorage::new());
        let indexer = Arc::new(
            TipSetIndexer::new(
                node.clone(),
                storage.clone(),
                Duration::from_secs(30),
                "testwatcher",
                &[BLOCKS_TASK],
            )
            .unwrap()
            .with_clock(Arc::new(MockClock::new())),
        );

        let watcher = Watcher::new(
            node.clone(),
            indexer,
            WatcherConfig {
                confidence: 0,
                head_buffer_size: 4,
                max_reconnect_attempts: 5,
            },
        );
        let cancel = Cancel::new();
        let watcher_cancel = cancel.clone();
        let handle = tokio::spawn(async move { watcher.run(&watcher_cancel).await });

        // After two failed subscribes the watcher connects and receives the
        // current head, which zero confidence indexes immediately.
        wait_for_rows(&storage, "block_headers", 1).await;

        cancel.cancel();
        node.apply_head(b.head());
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
}
