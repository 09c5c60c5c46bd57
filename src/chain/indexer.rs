// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::{ChainError, Clock, SystemClock};
use crate::actors::ActorRegistry;
use crate::blocks::Tipset;
use crate::model::reports::{ProcessingReport, STATUS_ERROR, STATUS_OK, STATUS_SKIP};
use crate::model::Persistable;
use crate::node::messages::executed_and_block_messages;
use crate::node::NodeApi;
use crate::storage::{verify_name, Storage, StorageError};
use crate::tasks::actorstate::{ActorExtractorRegistry, ActorStatesProcessor};
use crate::tasks::blocks::BlocksProcessor;
use crate::tasks::consensus::ConsensusProcessor;
use crate::tasks::gas_economy::GasEconomyProcessor;
use crate::tasks::messages::MessagesProcessor;
use crate::tasks::msapprovals::MultisigApprovalsProcessor;
use crate::tasks::{
    Cancel, ReportDraft, TaskInputs, TaskKind, TipSetProcessor, ACTOR_STATES_TASK, BLOCKS_TASK,
    CONSENSUS_TASK, GAS_ECONOMY_TASK, MESSAGES_TASK, MSAPPROVALS_TASK,
};

/// Per-tipset orchestrator: prepares shared inputs once, fans the selected
/// tasks out concurrently (one independent persistence batch each), and
/// returns only after every task has a terminal report.
pub struct TipSetIndexer {
    node: Arc<dyn NodeApi>,
    storage: Arc<dyn Storage>,
    registry: Arc<ActorRegistry>,
    reporter: String,
    window: Duration,
    processors: Vec<Arc<dyn TipSetProcessor>>,
    clock: Arc<dyn Clock>,
}

impl TipSetIndexer {
    pub fn new(
        node: Arc<dyn NodeApi>,
        storage: Arc<dyn Storage>,
        window: Duration,
        reporter: &str,
        tasks: &[&str],
    ) -> Result<Self, ChainError> {
        verify_name(reporter)?;

        let registry = Arc::new(ActorRegistry::new());
        let extractors = Arc::new(ActorExtractorRegistry::with_defaults());

        let mut processors: Vec<Arc<dyn TipSetProcessor>> = Vec::with_capacity(tasks.len());
        for task in tasks {
            let p: Arc<dyn TipSetProcessor> = match *task {
                BLOCKS_TASK => Arc::new(BlocksProcessor),
                CONSENSUS_TASK => Arc::new(ConsensusProcessor),
                MESSAGES_TASK => Arc::new(MessagesProcessor::new(registry.clone())),
                GAS_ECONOMY_TASK => Arc::new(GasEconomyProcessor),
                ACTOR_STATES_TASK => Arc::new(ActorStatesProcessor::new(
                    registry.clone(),
                    extractors.clone(),
                )),
                MSAPPROVALS_TASK => Arc::new(MultisigApprovalsProcessor::new(
                    node.clone(),
                    registry.clone(),
                )),
                other => return Err(ChainError::UnknownTask(other.to_string())),
            };
            processors.push(p);
        }

        Ok(Self {
            node,
            storage,
            registry,
            reporter: reporter.to_string(),
            window,
            processors,
            clock: Arc::new(SystemClock),
        })
    }

    /// Substitutes the report-timestamp source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers an additional task beyond the built-in set.
    pub fn with_processor(mut self, processor: Arc<dyn TipSetProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    fn has_kind(&self, kind: TaskKind) -> bool {
        self.processors.iter().any(|p| p.kind() == kind)
    }

    /// Indexes one visited tipset. Height-only tasks run against the tipset
    /// itself; message-joined tasks run against the pair formed with its
    /// parent and are skipped across null rounds.
    pub async fn tip_set(&self, ts: Arc<Tipset>) -> Result<(), ChainError> {
        let started = self.clock.now();
        debug!(height = ts.epoch(), key = %ts.key(), "indexing tipset");

        if ts.is_genesis() {
            return self.index_genesis(ts, started).await;
        }

        // Pair resolution.
        let pts = match self.node.chain_get_tipset(ts.parents()).await {
            Ok(pts) => pts,
            Err(e) => {
                let info = format!("failed to load parent tipset: {}", e);
                for p in &self.processors {
                    let draft =
                        ReportDraft::error(ts.epoch() - 1, String::new(), info.clone());
                    self.persist_report(p.name(), draft, started).await;
                }
                return Ok(());
            }
        };

        let direct_child = pts.epoch() + 1 == ts.epoch();

        // Shared extraction, computed once for every dependent task.
        let mut messages = None;
        let mut messages_err: Option<String> = None;
        if direct_child && self.has_kind(TaskKind::Messages) {
            match executed_and_block_messages(self.node.as_ref(), &self.registry, &ts, &pts).await
            {
                Ok(tsm) => messages = Some(Arc::new(tsm)),
                Err(e) => messages_err = Some(e.to_string()),
            }
        }

        let mut actors = None;
        let mut actors_err: Option<String> = None;
        if direct_child && self.has_kind(TaskKind::ActorStates) {
            match self
                .node
                .state_changed_actors(pts.parent_state(), ts.parent_state())
                .await
            {
                Ok(changed) => actors = Some(Arc::new(changed)),
                Err(e) => actors_err = Some(e.to_string()),
            }
        }

        let inputs = TaskInputs {
            ts: ts.clone(),
            pts: Some(pts.clone()),
            store: self.node.store(),
            messages,
            actors,
        };

        let cancel = Cancel::new();
        let mut set: JoinSet<()> = JoinSet::new();

        for p in &self.processors {
            // Tasks that cannot run report synchronously instead of spawning.
            let shared_err = match p.kind() {
                TaskKind::TipSet => None,
                TaskKind::Messages if !direct_child => Some(None),
                TaskKind::Messages => messages_err.clone().map(Some),
                TaskKind::ActorStates if !direct_child => Some(None),
                TaskKind::ActorStates => actors_err.clone().map(Some),
            };
            if let Some(maybe_err) = shared_err {
                let draft = match maybe_err {
                    // Null round between parent and child.
                    None => ReportDraft {
                        height: pts.epoch(),
                        state_root: pts.parent_state().to_string(),
                        status: STATUS_SKIP.to_string(),
                        status_information: Some("tipset has no direct child".to_string()),
                        errors_detected: None,
                    },
                    Some(err) => {
                        ReportDraft::error(pts.epoch(), pts.parent_state().to_string(), err)
                    }
                };
                self.persist_report(p.name(), draft, started).await;
                continue;
            }

            let processor = p.clone();
            let inputs = inputs.clone();
            let cancel = cancel.clone();
            let storage = self.storage.clone();
            let clock = self.clock.clone();
            let reporter = self.reporter.clone();
            let window = self.window;
            let fallback_height = pts.epoch();
            let fallback_root = pts.parent_state().to_string();

            set.spawn(async move {
                let name = processor.name();
                let outcome =
                    tokio::time::timeout(window, processor.process(&cancel, &inputs)).await;
                let (data, draft) = match outcome {
                    Ok(Ok(output)) => (output.data, output.report),
                    Ok(Err(e)) => (
                        None,
                        ReportDraft::error(fallback_height, fallback_root, e.to_string()),
                    ),
                    Err(_) => {
                        cancel.cancel();
                        (
                            None,
                            ReportDraft::error(
                                fallback_height,
                                fallback_root,
                                "processing window exceeded".to_string(),
                            ),
                        )
                    }
                };
                finalize_and_persist(storage, clock, &reporter, name, data, draft, started).await;
            });
        }

        // Wait for every task: completion is observable from this call.
        while set.join_next().await.is_some() {}
        Ok(())
    }

    /// Genesis has no parent pair: only height-only tasks apply.
    async fn index_genesis(
        &self,
        ts: Arc<Tipset>,
        started: DateTime<Utc>,
    ) -> Result<(), ChainError> {
        let inputs = TaskInputs {
            ts,
            pts: None,
            store: self.node.store(),
            messages: None,
            actors: None,
        };
        let cancel = Cancel::new();

        for p in &self.processors {
            if p.kind() != TaskKind::TipSet {
                continue;
            }
            let (data, draft) = match p.process(&cancel, &inputs).await {
                Ok(output) => (output.data, output.report),
                Err(e) => (
                    None,
                    ReportDraft::error(0, inputs.ts.parent_state().to_string(), e.to_string()),
                ),
            };
            finalize_and_persist(
                self.storage.clone(),
                self.clock.clone(),
                &self.reporter,
                p.name(),
                data,
                draft,
                started,
            )
            .await;
        }
        Ok(())
    }

    async fn persist_report(&self, task: &str, draft: ReportDraft, started: DateTime<Utc>) {
        finalize_and_persist(
            self.storage.clone(),
            self.clock.clone(),
            &self.reporter,
            task,
            None,
            draft,
            started,
        )
        .await;
    }
}

/// Builds the full processing report from a draft and persists it together
/// with the task's data in one batch. A primary-key conflict with upsert
/// disabled downgrades to SKIP, since the rows are already recorded.
async fn finalize_and_persist(
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    reporter: &str,
    task: &str,
    data: Option<Box<dyn Persistable>>,
    draft: ReportDraft,
    started: DateTime<Utc>,
) {
    let mut report = ProcessingReport {
        height: draft.height,
        state_root: draft.state_root,
        reporter: reporter.to_string(),
        task: task.to_string(),
        started_at: started,
        completed_at: Some(clock.now()),
        status: draft.status,
        status_information: draft.status_information,
        errors_detected: draft.errors_detected,
    };

    // Accumulated per-row errors make the attempt retryable.
    if report.errors_detected.is_some() && report.status == STATUS_OK {
        report.status = STATUS_ERROR.to_string();
    }

    let result = match &data {
        Some(data) => {
            storage
                .persist_batch(&[data.as_ref(), &report])
                .await
        }
        None => storage.persist_batch(&[&report]).await,
    };

    match result {
        Ok(()) => {}
        Err(StorageError::Conflict { table }) => {
            warn!(task, table = %table, height = report.height, "row already recorded");
            report.status = STATUS_SKIP.to_string();
            report.status_information = Some(format!("row already recorded in {}", table));
            if let Err(e) = storage.persist_batch(&[&report]).await {
                error!(task, height = report.height, error = %e, "failed to persist skip report");
            }
        }
        Err(e) => {
            error!(task, height = report.height, error = %e, "failed to persist task result");
            report.status = STATUS_ERROR.to_string();
            report.status_information = Some(format!("failed to persist result: {}", e));
            report.errors_detected = None;
            if let Err(e) = storage.persist_batch(&[&report]).await {
                error!(task, height = report.height, error = %e, "failed to persist error report");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::tasks::{TaskError, TaskOutput, ACTOR_STATES_TASK, BLOCKS_TASK};
    use crate::testutil::{ChainBuilder, MemoryStorage, MockClock};

    struct StallingProcessor;

    #[async_trait]
    impl TipSetProcessor for StallingProcessor {
        fn name(&self) -> &'static str {
            "stalling"
        }

        fn kind(&self) -> TaskKind {
            TaskKind::TipSet
        }

        async fn process(
            &self,
            _cancel: &Cancel,
            inputs: &TaskInputs,
        ) -> Result<TaskOutput, TaskError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(TaskOutput::report_only(ReportDraft::ok(
                inputs.ts.epoch(),
                inputs.ts.parent_state().to_string(),
            )))
        }
    }

    #[tokio::test]
    async fn window_timeout_is_recorded_as_error() {
        let mut b = ChainBuilder::new();
        b.extend();
        b.extend();
        let node = b.node();
        let storage = Arc::new(MemoryStorage::new());

        let indexer = TipSetIndexer::new(
            node,
            storage.clone(),
            Duration::from_millis(50),
            "testindexer",
            &[],
        )
        .unwrap()
        .with_clock(Arc::new(MockClock::new()))
        .with_processor(Arc::new(StallingProcessor));

        indexer.tip_set(b.tipset_at(1).unwrap()).await.unwrap();

        let reports = storage.rows("visor_processing_reports");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["task"], serde_json::json!("stalling"));
        assert_eq!(reports[0]["status"], serde_json::json!(STATUS_ERROR));
        assert_eq!(
            reports[0]["status_information"],
            serde_json::json!("processing window exceeded")
        );
    }

    #[tokio::test]
    async fn shared_input_failure_fans_error_reports() {
        let mut b = ChainBuilder::new();
        b.extend();
        b.extend();
        let node = b.node();
        node.set_fail_changed_actors(true);
        let storage = Arc::new(MemoryStorage::new());

        let indexer = TipSetIndexer::new(
            node,
            storage.clone(),
            Duration::from_secs(30),
            "testindexer",
            &[BLOCKS_TASK, ACTOR_STATES_TASK],
        )
        .unwrap()
        .with_clock(Arc::new(MockClock::new()));

        indexer.tip_set(b.tipset_at(1).unwrap()).await.unwrap();

        let reports = storage.rows("visor_processing_reports");
        let actorstates = reports
            .iter()
            .find(|r| r["task"] == serde_json::json!(ACTOR_STATES_TASK))
            .unwrap();
        assert_eq!(actorstates["status"], serde_json::json!(STATUS_ERROR));
        // Height-only tasks are unaffected.
        let blocks = reports
            .iter()
            .find(|r| r["task"] == serde_json::json!(BLOCKS_TASK))
            .unwrap();
        assert_eq!(blocks["status"], serde_json::json!(STATUS_OK));
    }

    #[tokio::test]
    async fn unknown_task_is_rejected() {
        let mut b = ChainBuilder::new();
        b.extend();
        let node = b.node();
        let storage = Arc::new(MemoryStorage::new());
        let result = TipSetIndexer::new(
            node,
            storage,
            Duration::from_secs(30),
            "testindexer",
            &["nonsense"],
        );
        let err = match result {
            Ok(_) => panic!("expected TipSetIndexer::new to reject an unknown task"),
            Err(err) => err,
        };
        assert!(matches!(err, ChainError::UnknownTask(t) if t == "nonsense"));
    }
}
