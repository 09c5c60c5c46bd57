// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{Cancel, ReportDraft, TaskError, TaskInputs, TaskKind, TaskOutput, TipSetProcessor};
use crate::actors::ActorRegistry;
use crate::model::messages::{
    BlockMessage, DerivedGasOutputs, Message, ParsedMessage, Receipt,
};
use crate::model::PersistableList;
use crate::node::messages::method_and_params;

/// Joins the parent tipset's messages with the receipts in the visited
/// tipset and derives per-message rows: messages, receipts, parsed params
/// and gas outputs, plus block membership of the visited tipset's messages.
pub struct MessagesProcessor {
    registry: Arc<ActorRegistry>,
}

impl MessagesProcessor {
    pub fn new(registry: Arc<ActorRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl TipSetProcessor for MessagesProcessor {
    fn name(&self) -> &'static str {
        super::MESSAGES_TASK
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Messages
    }

    async fn process(&self, cancel: &Cancel, inputs: &TaskInputs) -> Result<TaskOutput, TaskError> {
        let ts = &inputs.ts;
        let pts = inputs.pts()?;
        let tsm = inputs.messages()?;

        let mut errors = Vec::new();
        let mut messages = Vec::with_capacity(tsm.executed.len());
        let mut receipts = Vec::with_capacity(tsm.executed.len());
        let mut parsed = Vec::new();
        let mut gas_outputs = Vec::with_capacity(tsm.executed.len());

        for em in &tsm.executed {
            cancel.check()?;

            let msg_cid = em.cid.to_string();
            let size_bytes = em.message.size().map_err(|e| TaskError::Fatal(e.to_string()))? as i64;

            messages.push(Message {
                height: em.height,
                cid: msg_cid.clone(),
                from: em.message.from.to_string(),
                to: em.message.to.to_string(),
                value: em.message.value.to_string(),
                gas_fee_cap: em.message.gas_fee_cap.to_string(),
                gas_premium: em.message.gas_premium.to_string(),
                gas_limit: em.message.gas_limit,
                size_bytes,
                nonce: em.message.sequence as i64,
                method: em.message.method_num as i64,
            });

            receipts.push(Receipt {
                height: ts.epoch(),
                message: msg_cid.clone(),
                state_root: ts.parent_state().to_string(),
                idx: em.index as i64,
                exit_code: em.receipt.exit_code.value(),
                gas_used: em.receipt.gas_used,
            });

            let actor_name = em
                .to_code
                .and_then(|code| self.registry.name_by_code(&code))
                .unwrap_or_default();

            gas_outputs.push(DerivedGasOutputs {
                height: em.height,
                cid: msg_cid.clone(),
                state_root: pts.parent_state().to_string(),
                from: em.message.from.to_string(),
                to: em.message.to.to_string(),
                value: em.message.value.to_string(),
                gas_fee_cap: em.message.gas_fee_cap.to_string(),
                gas_premium: em.message.gas_premium.to_string(),
                gas_limit: em.message.gas_limit,
                nonce: em.message.sequence as i64,
                method: em.message.method_num as i64,
                exit_code: em.receipt.exit_code.value(),
                gas_used: em.receipt.gas_used,
                parent_base_fee: em.block_header.parent_base_fee().to_string(),
                base_fee_burn: em.gas_outputs.base_fee_burn.to_string(),
                over_estimation_burn: em.gas_outputs.over_estimation_burn.to_string(),
                miner_penalty: em.gas_outputs.miner_penalty.to_string(),
                miner_tip: em.gas_outputs.miner_tip.to_string(),
                refund: em.gas_outputs.refund.to_string(),
                gas_refund: em.gas_outputs.gas_refund,
                gas_burned: em.gas_outputs.gas_burned,
                actor_name,
            });

            // Parsing failures are data-shape errors: record and continue.
            let Some(to_code) = em.to_code else {
                errors.push(json!({
                    "message": msg_cid,
                    "error": "receiver actor code unknown",
                }));
                continue;
            };
            match method_and_params(&self.registry, &em.message, &to_code) {
                Ok((method, params)) => {
                    let params = if params.is_empty() {
                        None
                    } else {
                        match serde_json::from_str(&params) {
                            Ok(v) => Some(v),
                            Err(e) => {
                                errors.push(json!({
                                    "message": msg_cid,
                                    "error": format!("params not valid json: {}", e),
                                }));
                                None
                            }
                        }
                    };
                    parsed.push(ParsedMessage {
                        height: em.height,
                        cid: msg_cid,
                        from: em.message.from.to_string(),
                        to: em.message.to.to_string(),
                        value: em.message.value.to_string(),
                        method,
                        params,
                    });
                }
                Err(e) => {
                    errors.push(json!({
                        "message": msg_cid,
                        "error": e.to_string(),
                    }));
                }
            }
        }

        // Membership of the visited tipset's own messages in its blocks.
        let mut block_messages = Vec::new();
        for bm in &tsm.block_messages {
            cancel.check()?;
            for msg in bm.bls_messages.iter().chain(bm.secp_messages.iter()) {
                let mcid = msg.cid().map_err(|e| TaskError::Fatal(e.to_string()))?;
                block_messages.push(BlockMessage {
                    height: bm.block.epoch(),
                    block: bm.block.cid().to_string(),
                    message: mcid.to_string(),
                });
            }
        }

        let mut data = PersistableList::new();
        data.add(messages);
        data.add(block_messages);
        data.add(receipts);
        data.add(parsed);
        data.add(gas_outputs);

        let report =
            ReportDraft::ok(pts.epoch(), pts.parent_state().to_string()).with_errors(errors);
        Ok(TaskOutput::new(data, report))
    }
}
