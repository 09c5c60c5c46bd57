// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{impl_persistable, FieldSpec, ModelRow, ModelSpec, Value};

/// A multisig transaction that gathered enough approvals to apply.
#[derive(Clone, Debug, PartialEq)]
pub struct MultisigApproval {
    pub height: i64,
    pub state_root: String,
    pub multisig_id: String,
    pub message: String,
    pub method: i64,
    pub approver: String,
    pub threshold: i64,
    pub initial_balance: String,
    pub gas_used: i64,
    pub transaction_id: i64,
    pub to: String,
    pub value: String,
    pub signers: Vec<String>,
}

impl ModelRow for MultisigApproval {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "multisig_approvals",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("state_root"),
            FieldSpec::pk("multisig_id"),
            FieldSpec::pk("message"),
            FieldSpec::col("method"),
            FieldSpec::col("approver"),
            FieldSpec::col("threshold"),
            FieldSpec::col("initial_balance"),
            FieldSpec::col("gas_used"),
            FieldSpec::col("transaction_id"),
            FieldSpec::col("to"),
            FieldSpec::col("value"),
            FieldSpec::col("signers"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.state_root.clone().into(),
            self.multisig_id.clone().into(),
            self.message.clone().into(),
            self.method.into(),
            self.approver.clone().into(),
            self.threshold.into(),
            Value::Numeric(self.initial_balance.clone()),
            self.gas_used.into(),
            self.transaction_id.into(),
            self.to.clone().into(),
            Value::Numeric(self.value.clone()),
            self.signers.clone().into(),
        ]
    }
}

impl_persistable!(MultisigApproval);
