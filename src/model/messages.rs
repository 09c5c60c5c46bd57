// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{impl_persistable, FieldSpec, ModelRow, ModelSpec, Value};

/// A chain-level message; one row per `(height, cid)` it executed at.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub height: i64,
    pub cid: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub gas_fee_cap: String,
    pub gas_premium: String,
    pub gas_limit: i64,
    pub size_bytes: i64,
    pub nonce: i64,
    pub method: i64,
}

impl ModelRow for Message {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "messages",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("cid"),
            FieldSpec::col("from"),
            FieldSpec::col("to"),
            FieldSpec::col("value"),
            FieldSpec::col("gas_fee_cap"),
            FieldSpec::col("gas_premium"),
            FieldSpec::col("gas_limit"),
            FieldSpec::col("size_bytes"),
            FieldSpec::col("nonce"),
            FieldSpec::col("method"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.cid.clone().into(),
            self.from.clone().into(),
            self.to.clone().into(),
            Value::Numeric(self.value.clone()),
            Value::Numeric(self.gas_fee_cap.clone()),
            Value::Numeric(self.gas_premium.clone()),
            self.gas_limit.into(),
            self.size_bytes.into(),
            self.nonce.into(),
            self.method.into(),
        ]
    }
}

impl_persistable!(Message);

/// Membership of a message in a block.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockMessage {
    pub height: i64,
    pub block: String,
    pub message: String,
}

impl ModelRow for BlockMessage {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "block_messages",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("block"),
            FieldSpec::pk("message"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.block.clone().into(),
            self.message.clone().into(),
        ]
    }
}

impl_persistable!(BlockMessage);

/// Receipt of an executed message. The height is the height of the receipt,
/// one epoch after the message.
#[derive(Clone, Debug, PartialEq)]
pub struct Receipt {
    pub height: i64,
    pub message: String,
    pub state_root: String,
    pub idx: i64,
    pub exit_code: i64,
    pub gas_used: i64,
}

impl ModelRow for Receipt {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "receipts",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("message"),
            FieldSpec::pk("state_root"),
            FieldSpec::col("idx"),
            FieldSpec::col("exit_code"),
            FieldSpec::col("gas_used"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.message.clone().into(),
            self.state_root.clone().into(),
            self.idx.into(),
            self.exit_code.into(),
            self.gas_used.into(),
        ]
    }
}

impl_persistable!(Receipt);

/// Message parameters decoded to JSON with the resolved method name.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedMessage {
    pub height: i64,
    pub cid: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub method: String,
    pub params: Option<serde_json::Value>,
}

impl ModelRow for ParsedMessage {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "parsed_messages",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("cid"),
            FieldSpec::col("from"),
            FieldSpec::col("to"),
            FieldSpec::col("value"),
            FieldSpec::col("method"),
            FieldSpec::col("params"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.cid.clone().into(),
            self.from.clone().into(),
            self.to.clone().into(),
            Value::Numeric(self.value.clone()),
            self.method.clone().into(),
            Value::Json(self.params.clone()),
        ]
    }
}

impl_persistable!(ParsedMessage);

/// Full gas accounting of an executed message.
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedGasOutputs {
    pub height: i64,
    pub cid: String,
    pub state_root: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub gas_fee_cap: String,
    pub gas_premium: String,
    pub gas_limit: i64,
    pub nonce: i64,
    pub method: i64,
    pub exit_code: i64,
    pub gas_used: i64,
    pub parent_base_fee: String,
    pub base_fee_burn: String,
    pub over_estimation_burn: String,
    pub miner_penalty: String,
    pub miner_tip: String,
    pub refund: String,
    pub gas_refund: i64,
    pub gas_burned: i64,
    /// Canonical name of the receiving actor, e.g. `fil/2/multisig`.
    pub actor_name: String,
}

impl ModelRow for DerivedGasOutputs {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "derived_gas_outputs",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("cid"),
            FieldSpec::pk("state_root"),
            FieldSpec::col("from"),
            FieldSpec::col("to"),
            FieldSpec::col("value"),
            FieldSpec::col("gas_fee_cap"),
            FieldSpec::col("gas_premium"),
            FieldSpec::col("gas_limit"),
            FieldSpec::col("nonce"),
            FieldSpec::col("method"),
            FieldSpec::col("exit_code"),
            FieldSpec::col("gas_used"),
            FieldSpec::col("parent_base_fee"),
            FieldSpec::col("base_fee_burn"),
            FieldSpec::col("over_estimation_burn"),
            FieldSpec::col("miner_penalty"),
            FieldSpec::col("miner_tip"),
            FieldSpec::col("refund"),
            FieldSpec::col("gas_refund"),
            FieldSpec::col("gas_burned"),
            FieldSpec::col_since("actor_name", 2),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.cid.clone().into(),
            self.state_root.clone().into(),
            self.from.clone().into(),
            self.to.clone().into(),
            Value::Numeric(self.value.clone()),
            Value::Numeric(self.gas_fee_cap.clone()),
            Value::Numeric(self.gas_premium.clone()),
            self.gas_limit.into(),
            self.nonce.into(),
            self.method.into(),
            self.exit_code.into(),
            self.gas_used.into(),
            Value::Numeric(self.parent_base_fee.clone()),
            Value::Numeric(self.base_fee_burn.clone()),
            Value::Numeric(self.over_estimation_burn.clone()),
            Value::Numeric(self.miner_penalty.clone()),
            Value::Numeric(self.miner_tip.clone()),
            Value::Numeric(self.refund.clone()),
            self.gas_refund.into(),
            self.gas_burned.into(),
            self.actor_name.clone().into(),
        ]
    }
}

impl_persistable!(DerivedGasOutputs);

/// Per-tipset aggregate gas economy.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageGasEconomy {
    pub height: i64,
    pub state_root: String,
    pub gas_limit_total: i64,
    pub gas_limit_unique_total: i64,
    pub base_fee: f64,
    pub base_fee_change_log: f64,
    pub gas_fill_ratio: f64,
    pub gas_capacity_ratio: f64,
    pub gas_waste_ratio: f64,
}

impl ModelRow for MessageGasEconomy {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "message_gas_economy",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("state_root"),
            FieldSpec::col("gas_limit_total"),
            FieldSpec::col("gas_limit_unique_total"),
            FieldSpec::col("base_fee"),
            FieldSpec::col("base_fee_change_log"),
            FieldSpec::col("gas_fill_ratio"),
            FieldSpec::col("gas_capacity_ratio"),
            FieldSpec::col("gas_waste_ratio"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.state_root.clone().into(),
            self.gas_limit_total.into(),
            self.gas_limit_unique_total.into(),
            self.base_fee.into(),
            self.base_fee_change_log.into(),
            self.gas_fill_ratio.into(),
            self.gas_capacity_ratio.into(),
            self.gas_waste_ratio.into(),
        ]
    }
}

impl_persistable!(MessageGasEconomy);
