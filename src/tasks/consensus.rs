// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use async_trait::async_trait;

use super::{Cancel, ReportDraft, TaskError, TaskInputs, TaskKind, TaskOutput, TipSetProcessor};
use crate::model::chain::ChainConsensus;

/// Records one row per epoch between the parent and the visited tipset.
/// Epochs skipped by null rounds get a placeholder row with no tipset so
/// downstream joins still have a slot.
pub struct ConsensusProcessor;

#[async_trait]
impl TipSetProcessor for ConsensusProcessor {
    fn name(&self) -> &'static str {
        super::CONSENSUS_TASK
    }

    fn kind(&self) -> TaskKind {
        TaskKind::TipSet
    }

    async fn process(&self, cancel: &Cancel, inputs: &TaskInputs) -> Result<TaskOutput, TaskError> {
        let ts = &inputs.ts;

        let mut rows = Vec::new();
        match &inputs.pts {
            Some(pts) => {
                for height in (pts.epoch() + 1)..=ts.epoch() {
                    cancel.check()?;
                    if height == ts.epoch() {
                        rows.push(ChainConsensus {
                            height,
                            parent_state_root: ts.parent_state().to_string(),
                            parent_tipset: pts.key().to_string(),
                            tipset: Some(ts.key().to_string()),
                        });
                    } else {
                        // Null round.
                        rows.push(ChainConsensus {
                            height,
                            parent_state_root: ts.parent_state().to_string(),
                            parent_tipset: pts.key().to_string(),
                            tipset: None,
                        });
                    }
                }
            }
            None => {
                // Genesis has no parent pair.
                rows.push(ChainConsensus {
                    height: ts.epoch(),
                    parent_state_root: ts.parent_state().to_string(),
                    parent_tipset: ts.key().to_string(),
                    tipset: Some(ts.key().to_string()),
                });
            }
        }

        let report = ReportDraft::ok(ts.epoch(), ts.parent_state().to_string());
        Ok(TaskOutput::new(rows, report))
    }
}
