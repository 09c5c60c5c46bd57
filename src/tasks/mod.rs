// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Per-tipset extraction tasks. Each task is pure with respect to
//! persistence: it consumes the shared inputs the indexer prepared and
//! returns a persistable plus a report draft; the indexer owns batching,
//! timing and report bookkeeping.

pub mod actorstate;
pub mod blocks;
pub mod consensus;
pub mod gas_economy;
pub mod messages;
pub mod msapprovals;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use thiserror::Error;

use crate::address::Address;
use crate::blocks::Tipset;
use crate::model::reports::{STATUS_ERROR, STATUS_OK};
use crate::model::Persistable;
use crate::node::messages::TipSetMessages;
use crate::node::NodeError;
use crate::state_tree::ActorState;

pub const BLOCKS_TASK: &str = "blocks";
pub const MESSAGES_TASK: &str = "messages";
pub const GAS_ECONOMY_TASK: &str = "gas_economy";
pub const CONSENSUS_TASK: &str = "consensus";
pub const ACTOR_STATES_TASK: &str = "actorstates";
pub const MSAPPROVALS_TASK: &str = "msapprovals";

pub const ALL_TASKS: &[&str] = &[
    BLOCKS_TASK,
    MESSAGES_TASK,
    GAS_ECONOMY_TASK,
    CONSENSUS_TASK,
    ACTOR_STATES_TASK,
    MSAPPROVALS_TASK,
];

/// What a task needs from the shared per-tipset extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    /// Runs for every visited tipset, including across null rounds.
    TipSet,
    /// Needs the parent→child executed-message join.
    Messages,
    /// Needs the parent→child actor diff.
    ActorStates,
}

/// Cooperative cancellation observed by every per-row loop.
#[derive(Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error("{0}")]
    Fatal(String),
}

/// Shared inputs prepared once per visited tipset. `pts` is absent only for
/// genesis; the join inputs are absent when the parent is not a direct
/// parent (null rounds) or when their extraction failed.
#[derive(Clone)]
pub struct TaskInputs {
    pub ts: Arc<Tipset>,
    pub pts: Option<Arc<Tipset>>,
    pub store: Arc<dyn crate::ipld::IpldStore>,
    pub messages: Option<Arc<TipSetMessages>>,
    pub actors: Option<Arc<AHashMap<Address, ActorState>>>,
}

impl TaskInputs {
    pub fn pts(&self) -> Result<&Arc<Tipset>, TaskError> {
        self.pts
            .as_ref()
            .ok_or_else(|| TaskError::Fatal("parent tipset unavailable".into()))
    }

    pub fn messages(&self) -> Result<&Arc<TipSetMessages>, TaskError> {
        self.messages
            .as_ref()
            .ok_or_else(|| TaskError::Fatal("executed messages unavailable".into()))
    }

    pub fn actors(&self) -> Result<&Arc<AHashMap<Address, ActorState>>, TaskError> {
        self.actors
            .as_ref()
            .ok_or_else(|| TaskError::Fatal("actor changes unavailable".into()))
    }
}

/// A task's view of its outcome; the indexer supplies reporter identity and
/// timing when turning this into a processing report.
#[derive(Clone, Debug)]
pub struct ReportDraft {
    pub height: i64,
    pub state_root: String,
    pub status: String,
    pub status_information: Option<String>,
    pub errors_detected: Option<serde_json::Value>,
}

impl ReportDraft {
    pub fn ok(height: i64, state_root: String) -> Self {
        Self {
            height,
            state_root,
            status: STATUS_OK.to_string(),
            status_information: None,
            errors_detected: None,
        }
    }

    pub fn error(height: i64, state_root: String, info: String) -> Self {
        Self {
            height,
            state_root,
            status: STATUS_ERROR.to_string(),
            status_information: Some(info),
            errors_detected: None,
        }
    }

    /// Attaches accumulated per-row errors, leaving the status as-is.
    pub fn with_errors(mut self, errors: Vec<serde_json::Value>) -> Self {
        if !errors.is_empty() {
            self.errors_detected = Some(serde_json::Value::Array(errors));
        }
        self
    }
}

pub struct TaskOutput {
    pub data: Option<Box<dyn Persistable>>,
    pub report: ReportDraft,
}

impl TaskOutput {
    pub fn new(data: impl Persistable + 'static, report: ReportDraft) -> Self {
        Self {
            data: Some(Box::new(data)),
            report,
        }
    }

    pub fn report_only(report: ReportDraft) -> Self {
        Self { data: None, report }
    }
}

/// One extraction task.
#[async_trait]
pub trait TipSetProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> TaskKind;

    async fn process(&self, cancel: &Cancel, inputs: &TaskInputs) -> Result<TaskOutput, TaskError>;
}
