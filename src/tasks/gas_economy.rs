// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use async_trait::async_trait;
use num_traits::ToPrimitive;

use super::{Cancel, ReportDraft, TaskError, TaskInputs, TaskKind, TaskOutput, TipSetProcessor};
use crate::model::messages::MessageGasEconomy;
use crate::node::gas::{BASE_FEE_MAX_CHANGE_DENOM, BLOCK_GAS_TARGET};

/// Aggregates the parent tipset's message gas fields into per-tipset totals
/// and capacity ratios.
pub struct GasEconomyProcessor;

#[async_trait]
impl TipSetProcessor for GasEconomyProcessor {
    fn name(&self) -> &'static str {
        super::GAS_ECONOMY_TASK
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Messages
    }

    async fn process(&self, cancel: &Cancel, inputs: &TaskInputs) -> Result<TaskOutput, TaskError> {
        let pts = inputs.pts()?;
        let tsm = inputs.messages()?;

        // Unique messages execute once; totals over all block occurrences
        // measure how much gas was bid for the same space.
        let mut gas_limit_unique_total: i64 = 0;
        for em in &tsm.executed {
            cancel.check()?;
            gas_limit_unique_total += em.message.gas_limit;
        }

        // Block membership of the parent's own messages, duplicates and all.
        let mut gas_limit_total: i64 = 0;
        let block_msgs = crate::node::messages::block_messages(inputs.store.as_ref(), pts)?;
        for bm in &block_msgs {
            cancel.check()?;
            for msg in bm.bls_messages.iter().chain(bm.secp_messages.iter()) {
                gas_limit_total += msg.gas_limit;
            }
        }

        // Rate of change across the processed pair, in units of the maximum
        // per-epoch adjustment step.
        let step = 1.0 + 1.0 / BASE_FEE_MAX_CHANGE_DENOM;
        let base_fee = pts.parent_base_fee().to_f64().unwrap_or(f64::MAX);
        let next_fee = inputs.ts.parent_base_fee().to_f64().unwrap_or(f64::MAX);
        let base_fee_change_log = if base_fee > 0.0 && next_fee > 0.0 {
            (next_fee / base_fee).ln() / step.ln()
        } else {
            0.0
        };

        let capacity = (pts.len() as i64 * BLOCK_GAS_TARGET) as f64;
        let (gas_fill_ratio, gas_capacity_ratio, gas_waste_ratio) = if capacity > 0.0 {
            (
                gas_limit_total as f64 / capacity,
                gas_limit_unique_total as f64 / capacity,
                (gas_limit_total - gas_limit_unique_total) as f64 / capacity,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        let model = MessageGasEconomy {
            height: pts.epoch(),
            state_root: pts.parent_state().to_string(),
            gas_limit_total,
            gas_limit_unique_total,
            base_fee,
            base_fee_change_log,
            gas_fill_ratio,
            gas_capacity_ratio,
            gas_waste_ratio,
        };

        let report = ReportDraft::ok(pts.epoch(), pts.parent_state().to_string());
        Ok(TaskOutput::new(model, report))
    }
}
