// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use chrono::{DateTime, Utc};

use super::{impl_persistable, FieldSpec, ModelRow, ModelSpec, Value};

pub const STATUS_OK: &str = "OK";
pub const STATUS_INFO: &str = "INFO";
pub const STATUS_SKIP: &str = "SKIP";
pub const STATUS_ERROR: &str = "ERROR";

pub const GAP_STATUS_GAP: &str = "GAP";
pub const GAP_STATUS_FILLED: &str = "FILLED";

/// The audit row recording one attempt of one task at one height. This
/// table is the system of record for whether work has been done.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessingReport {
    pub height: i64,
    pub state_root: String,
    pub reporter: String,
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: String,
    pub status_information: Option<String>,
    pub errors_detected: Option<serde_json::Value>,
}

impl ProcessingReport {
    pub fn is_terminal_ok(&self) -> bool {
        self.status == STATUS_OK || self.status == STATUS_INFO
    }
}

impl ModelRow for ProcessingReport {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "visor_processing_reports",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("state_root"),
            FieldSpec::pk("reporter"),
            FieldSpec::pk("task"),
            FieldSpec::col("started_at"),
            FieldSpec::col("completed_at"),
            FieldSpec::col("status"),
            FieldSpec::col("status_information"),
            FieldSpec::col("errors_detected"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.state_root.clone().into(),
            self.reporter.clone().into(),
            self.task.clone().into(),
            self.started_at.into(),
            self.completed_at.into(),
            self.status.clone().into(),
            self.status_information.clone().into(),
            Value::Json(self.errors_detected.clone()),
        ]
    }
}

impl_persistable!(ProcessingReport);

/// A `(height, task)` hole in the processing-report table.
#[derive(Clone, Debug, PartialEq)]
pub struct GapReport {
    pub height: i64,
    pub task: String,
    pub reporter: String,
    pub status: String,
    pub reported_at: DateTime<Utc>,
}

impl ModelRow for GapReport {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "visor_gap_reports",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("task"),
            FieldSpec::pk("reporter"),
            FieldSpec::col("status"),
            FieldSpec::col("reported_at"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.task.clone().into(),
            self.reporter.clone().into(),
            self.status.clone().into(),
            self.reported_at.into(),
        ]
    }
}

impl_persistable!(GapReport);
