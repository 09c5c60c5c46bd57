// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{Cancel, ReportDraft, TaskError, TaskInputs, TaskKind, TaskOutput, TipSetProcessor};
use crate::actors::multisig::{
    self, ApproveReturn, ProposeParams, ProposeReturn, TxnIdParams, METHOD_APPROVE, METHOD_PROPOSE,
};
use crate::actors::{ActorFamily, ActorRegistry};
use crate::encoding::Cbor;
use crate::model::msapprovals::MultisigApproval;
use crate::node::messages::ExecutedMessage;
use crate::node::NodeApi;

/// Records multisig transactions that gathered enough approvals to apply,
/// from Propose and Approve messages with successful receipts.
pub struct MultisigApprovalsProcessor {
    node: Arc<dyn NodeApi>,
    registry: Arc<ActorRegistry>,
}

impl MultisigApprovalsProcessor {
    pub fn new(node: Arc<dyn NodeApi>, registry: Arc<ActorRegistry>) -> Self {
        Self { node, registry }
    }
}

struct AppliedTransaction {
    id: i64,
    to: String,
    value: String,
}

#[async_trait]
impl TipSetProcessor for MultisigApprovalsProcessor {
    fn name(&self) -> &'static str {
        super::MSAPPROVALS_TASK
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Messages
    }

    async fn process(&self, cancel: &Cancel, inputs: &TaskInputs) -> Result<TaskOutput, TaskError> {
        let ts = &inputs.ts;
        let pts = inputs.pts()?;
        let tsm = inputs.messages()?;

        let mut errors = Vec::new();
        // No initial capacity since approvals are rare.
        let mut approvals: Vec<MultisigApproval> = Vec::new();

        for em in &tsm.executed {
            cancel.check()?;

            // Only messages to multisig actors.
            let is_multisig = em
                .to_code
                .map(|code| self.registry.is_family(&code, ActorFamily::Multisig))
                .unwrap_or(false);
            if !is_multisig {
                continue;
            }

            // Only successful executions.
            if !em.receipt.exit_code.is_success() {
                continue;
            }

            // Only propose and approve messages.
            if em.message.method_num != METHOD_PROPOSE && em.message.method_num != METHOD_APPROVE {
                continue;
            }

            let tx = match self.transaction_if_applied(em, inputs).await {
                Ok(Some(tx)) => tx,
                Ok(None) => continue,
                Err(e) => {
                    errors.push(json!({
                        "addr": em.message.to.to_string(),
                        "error": format!("failed to find transaction: {}", e),
                    }));
                    continue;
                }
            };

            let mut approval = MultisigApproval {
                height: pts.epoch(),
                state_root: pts.parent_state().to_string(),
                multisig_id: em.message.to.to_string(),
                message: em.cid.to_string(),
                method: em.message.method_num as i64,
                approver: em.message.from.to_string(),
                threshold: 0,
                initial_balance: "0".to_string(),
                gas_used: em.receipt.gas_used,
                transaction_id: tx.id,
                to: tx.to,
                value: tx.value,
                signers: Vec::new(),
            };

            // State of the actor after the message was applied.
            let actor = match self.node.state_get_actor(&em.message.to, ts.key()).await {
                Ok(Some(actor)) => actor,
                Ok(None) => {
                    errors.push(json!({
                        "addr": em.message.to.to_string(),
                        "error": "failed to load actor: not found",
                    }));
                    continue;
                }
                Err(e) => {
                    errors.push(json!({
                        "addr": em.message.to.to_string(),
                        "error": format!("failed to load actor: {}", e),
                    }));
                    continue;
                }
            };

            let state =
                match multisig::State::load(&self.registry, inputs.store.as_ref(), &actor) {
                    Ok(state) => state,
                    Err(e) => {
                        errors.push(json!({
                            "addr": em.message.to.to_string(),
                            "error": format!("failed to load actor state: {}", e),
                        }));
                        continue;
                    }
                };

            approval.initial_balance = state.initial_balance().to_string();
            approval.threshold = state.threshold() as i64;
            approval.signers = state.signers().iter().map(|a| a.to_string()).collect();

            approvals.push(approval);
        }

        let report =
            ReportDraft::ok(pts.epoch(), pts.parent_state().to_string()).with_errors(errors);
        Ok(TaskOutput::new(approvals, report))
    }
}

impl MultisigApprovalsProcessor {
    /// Returns the transaction the message applied, if it gathered enough
    /// approvals. Propose carries the details in its params and return
    /// value; Approve references a transaction pending in the pre-message
    /// state.
    async fn transaction_if_applied(
        &self,
        em: &ExecutedMessage,
        inputs: &TaskInputs,
    ) -> Result<Option<AppliedTransaction>, TaskError> {
        let pts = inputs.pts()?;

        match em.message.method_num {
            METHOD_PROPOSE => {
                let ret = ProposeReturn::unmarshal_cbor(&em.receipt.return_data)
                    .map_err(|e| TaskError::Fatal(format!("failed to decode return value: {}", e)))?;
                if !ret.applied {
                    return Ok(None);
                }

                let params = ProposeParams::unmarshal_cbor(&em.message.params).map_err(|e| {
                    TaskError::Fatal(format!("failed to decode message params: {}", e))
                })?;

                Ok(Some(AppliedTransaction {
                    id: ret.txn_id,
                    to: params.to.to_string(),
                    value: params.value.to_string(),
                }))
            }
            METHOD_APPROVE => {
                let ret = ApproveReturn::unmarshal_cbor(&em.receipt.return_data)
                    .map_err(|e| TaskError::Fatal(format!("failed to decode return value: {}", e)))?;
                if !ret.applied {
                    return Ok(None);
                }

                let params = TxnIdParams::unmarshal_cbor(&em.message.params).map_err(|e| {
                    TaskError::Fatal(format!("failed to decode message params: {}", e))
                })?;

                // The transaction must be pending in the state the carrying
                // tipset's messages started from.
                let actor = self
                    .node
                    .state_get_actor(&em.message.to, pts.parents())
                    .await?
                    .ok_or_else(|| TaskError::Fatal("failed to load previous actor".into()))?;

                let prev_state =
                    multisig::State::load(&self.registry, inputs.store.as_ref(), &actor)
                        .map_err(|e| {
                            TaskError::Fatal(format!("failed to load previous actor state: {}", e))
                        })?;

                let mut tx = None;
                prev_state
                    .for_each_pending_txn(inputs.store.as_ref(), |id, txn| {
                        if id == params.id {
                            tx = Some(AppliedTransaction {
                                id,
                                to: txn.to.to_string(),
                                value: txn.value.to_string(),
                            });
                        }
                        Ok(())
                    })
                    .map_err(|e| {
                        TaskError::Fatal(format!("failed to read transaction details: {}", e))
                    })?;

                match tx {
                    Some(tx) => Ok(Some(tx)),
                    None => Err(TaskError::Fatal(format!(
                        "pending transaction {} not found",
                        params.id
                    ))),
                }
            }
            _ => Ok(None),
        }
    }
}
