// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use async_trait::async_trait;

use super::{Cancel, ReportDraft, TaskError, TaskInputs, TaskKind, TaskOutput, TipSetProcessor};
use crate::model::blocks::{BlockHeader, BlockParent, DrandBlockEntry};
use crate::model::PersistableList;

/// Records the visited tipset's block headers, parent edges and drand
/// rounds.
pub struct BlocksProcessor;

#[async_trait]
impl TipSetProcessor for BlocksProcessor {
    fn name(&self) -> &'static str {
        super::BLOCKS_TASK
    }

    fn kind(&self) -> TaskKind {
        TaskKind::TipSet
    }

    async fn process(&self, cancel: &Cancel, inputs: &TaskInputs) -> Result<TaskOutput, TaskError> {
        let ts = &inputs.ts;

        let mut headers = Vec::with_capacity(ts.len());
        let mut parents = Vec::new();
        let mut drand_entries = Vec::new();

        // Tipset keys deduplicate block CIDs already; one row per block.
        for block in ts.blocks() {
            cancel.check()?;

            headers.push(BlockHeader::from_header(block));

            for parent in block.parents().cids() {
                parents.push(BlockParent {
                    height: block.epoch(),
                    block: block.cid().to_string(),
                    parent: parent.to_string(),
                });
            }

            for entry in block.beacon_entries() {
                drand_entries.push(DrandBlockEntry {
                    round: entry.round() as i64,
                    block: block.cid().to_string(),
                });
            }
        }

        let mut data = PersistableList::new();
        data.add(headers);
        data.add(parents);
        data.add(drand_entries);

        let report = ReportDraft::ok(ts.epoch(), ts.parent_state().to_string());
        Ok(TaskOutput::new(data, report))
    }
}
