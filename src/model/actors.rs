// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Rows extracted from actor-state diffs. All are tagged with the height and
//! parent state root of the tipset whose diff produced them.

use super::{impl_persistable, FieldSpec, ModelRow, ModelSpec, Value};

/// Reward actor snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct ChainReward {
    pub height: i64,
    pub state_root: String,
    pub cum_sum_baseline: String,
    pub cum_sum_realized: String,
    pub effective_baseline_power: String,
    pub new_baseline_power: String,
    pub new_reward_smoothed_position_estimate: String,
    pub new_reward_smoothed_velocity_estimate: String,
    pub total_mined_reward: String,
    pub new_reward: String,
    pub effective_network_time: i64,
}

impl ModelRow for ChainReward {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "chain_rewards",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("state_root"),
            FieldSpec::col("cum_sum_baseline"),
            FieldSpec::col("cum_sum_realized"),
            FieldSpec::col("effective_baseline_power"),
            FieldSpec::col("new_baseline_power"),
            FieldSpec::col("new_reward_smoothed_position_estimate"),
            FieldSpec::col("new_reward_smoothed_velocity_estimate"),
            FieldSpec::col("total_mined_reward"),
            FieldSpec::col("new_reward"),
            FieldSpec::col("effective_network_time"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.state_root.clone().into(),
            Value::Numeric(self.cum_sum_baseline.clone()),
            Value::Numeric(self.cum_sum_realized.clone()),
            Value::Numeric(self.effective_baseline_power.clone()),
            Value::Numeric(self.new_baseline_power.clone()),
            Value::Numeric(self.new_reward_smoothed_position_estimate.clone()),
            Value::Numeric(self.new_reward_smoothed_velocity_estimate.clone()),
            Value::Numeric(self.total_mined_reward.clone()),
            Value::Numeric(self.new_reward.clone()),
            self.effective_network_time.into(),
        ]
    }
}

impl_persistable!(ChainReward);

/// Storage power actor snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct ChainPower {
    pub height: i64,
    pub state_root: String,
    pub total_raw_bytes_power: String,
    pub total_qa_bytes_power: String,
    pub total_pledge_collateral: String,
    pub qa_smoothed_position_estimate: String,
    pub qa_smoothed_velocity_estimate: String,
    pub miner_count: i64,
    pub participating_miner_count: i64,
}

impl ModelRow for ChainPower {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "chain_powers",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("state_root"),
            FieldSpec::col("total_raw_bytes_power"),
            FieldSpec::col("total_qa_bytes_power"),
            FieldSpec::col("total_pledge_collateral"),
            FieldSpec::col("qa_smoothed_position_estimate"),
            FieldSpec::col("qa_smoothed_velocity_estimate"),
            FieldSpec::col("miner_count"),
            FieldSpec::col("participating_miner_count"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.state_root.clone().into(),
            Value::Numeric(self.total_raw_bytes_power.clone()),
            Value::Numeric(self.total_qa_bytes_power.clone()),
            Value::Numeric(self.total_pledge_collateral.clone()),
            Value::Numeric(self.qa_smoothed_position_estimate.clone()),
            Value::Numeric(self.qa_smoothed_velocity_estimate.clone()),
            self.miner_count.into(),
            self.participating_miner_count.into(),
        ]
    }
}

impl_persistable!(ChainPower);

/// Static miner metadata at a state root.
#[derive(Clone, Debug, PartialEq)]
pub struct MinerInfo {
    pub height: i64,
    pub miner_id: String,
    pub state_root: String,
    pub owner_id: String,
    pub worker_id: String,
    pub new_worker: Option<String>,
    pub worker_change_epoch: i64,
    pub peer_id: Option<String>,
    pub control_addresses: Vec<String>,
    pub sector_size: i64,
}

impl ModelRow for MinerInfo {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "miner_infos",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("miner_id"),
            FieldSpec::pk("state_root"),
            FieldSpec::col("owner_id"),
            FieldSpec::col("worker_id"),
            FieldSpec::col("new_worker"),
            FieldSpec::col("worker_change_epoch"),
            FieldSpec::col("peer_id"),
            FieldSpec::col("control_addresses"),
            FieldSpec::col("sector_size"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.miner_id.clone().into(),
            self.state_root.clone().into(),
            self.owner_id.clone().into(),
            self.worker_id.clone().into(),
            self.new_worker.clone().into(),
            self.worker_change_epoch.into(),
            self.peer_id.clone().into(),
            self.control_addresses.clone().into(),
            self.sector_size.into(),
        ]
    }
}

impl_persistable!(MinerInfo);

/// Funds a miner holds in vesting, pledge and pre-commit deposits.
#[derive(Clone, Debug, PartialEq)]
pub struct MinerLockedFund {
    pub height: i64,
    pub miner_id: String,
    pub state_root: String,
    pub locked_funds: String,
    pub initial_pledge: String,
    pub pre_commit_deposits: String,
}

impl ModelRow for MinerLockedFund {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "miner_locked_funds",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("miner_id"),
            FieldSpec::pk("state_root"),
            FieldSpec::col("locked_funds"),
            FieldSpec::col("initial_pledge"),
            FieldSpec::col("pre_commit_deposits"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.miner_id.clone().into(),
            self.state_root.clone().into(),
            Value::Numeric(self.locked_funds.clone()),
            Value::Numeric(self.initial_pledge.clone()),
            Value::Numeric(self.pre_commit_deposits.clone()),
        ]
    }
}

impl_persistable!(MinerLockedFund);

/// A published storage deal proposal.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketDealProposal {
    pub height: i64,
    pub deal_id: i64,
    pub state_root: String,
    pub padded_piece_size: i64,
    pub unpadded_piece_size: i64,
    pub start_epoch: i64,
    pub end_epoch: i64,
    pub client_id: String,
    pub provider_id: String,
    pub client_collateral: String,
    pub provider_collateral: String,
    pub storage_price_per_epoch: String,
    pub piece_cid: String,
    pub is_verified: bool,
    pub label: Option<String>,
}

impl ModelRow for MarketDealProposal {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "market_deal_proposals",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("deal_id"),
            FieldSpec::col("state_root"),
            FieldSpec::col("padded_piece_size"),
            FieldSpec::col("unpadded_piece_size"),
            FieldSpec::col("start_epoch"),
            FieldSpec::col("end_epoch"),
            FieldSpec::col("client_id"),
            FieldSpec::col("provider_id"),
            FieldSpec::col("client_collateral"),
            FieldSpec::col("provider_collateral"),
            FieldSpec::col("storage_price_per_epoch"),
            FieldSpec::col("piece_cid"),
            FieldSpec::col("is_verified"),
            FieldSpec::col("label"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.deal_id.into(),
            self.state_root.clone().into(),
            self.padded_piece_size.into(),
            self.unpadded_piece_size.into(),
            self.start_epoch.into(),
            self.end_epoch.into(),
            self.client_id.clone().into(),
            self.provider_id.clone().into(),
            Value::Numeric(self.client_collateral.clone()),
            Value::Numeric(self.provider_collateral.clone()),
            Value::Numeric(self.storage_price_per_epoch.clone()),
            self.piece_cid.clone().into(),
            self.is_verified.into(),
            self.label.clone().into(),
        ]
    }
}

impl_persistable!(MarketDealProposal);

/// Execution state of a storage deal.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketDealState {
    pub height: i64,
    pub deal_id: i64,
    pub state_root: String,
    pub sector_start_epoch: i64,
    pub last_update_epoch: i64,
    pub slash_epoch: i64,
}

impl ModelRow for MarketDealState {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "market_deal_states",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("deal_id"),
            FieldSpec::pk("state_root"),
            FieldSpec::col("sector_start_epoch"),
            FieldSpec::col("last_update_epoch"),
            FieldSpec::col("slash_epoch"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.deal_id.into(),
            self.state_root.clone().into(),
            self.sector_start_epoch.into(),
            self.last_update_epoch.into(),
            self.slash_epoch.into(),
        ]
    }
}

impl_persistable!(MarketDealState);

/// A transaction pending in a multisig's proposal map.
#[derive(Clone, Debug, PartialEq)]
pub struct MultisigTransaction {
    pub height: i64,
    pub multisig_id: String,
    pub state_root: String,
    pub transaction_id: i64,
    pub to: String,
    pub value: String,
    pub method: i64,
    pub params: Vec<u8>,
    pub approved: Vec<String>,
}

impl ModelRow for MultisigTransaction {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "multisig_transactions",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("multisig_id"),
            FieldSpec::pk("state_root"),
            FieldSpec::pk("transaction_id"),
            FieldSpec::col("to"),
            FieldSpec::col("value"),
            FieldSpec::col("method"),
            FieldSpec::col("params"),
            FieldSpec::col("approved"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.multisig_id.clone().into(),
            self.state_root.clone().into(),
            self.transaction_id.into(),
            self.to.clone().into(),
            Value::Numeric(self.value.clone()),
            self.method.into(),
            self.params.clone().into(),
            self.approved.clone().into(),
        ]
    }
}

impl_persistable!(MultisigTransaction);

/// A robust-address to ID-address mapping added by the init actor.
#[derive(Clone, Debug, PartialEq)]
pub struct IdAddress {
    pub height: i64,
    pub id: String,
    pub address: String,
    pub state_root: String,
}

impl ModelRow for IdAddress {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "id_addresses",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("id"),
            FieldSpec::pk("address"),
            FieldSpec::pk("state_root"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.id.clone().into(),
            self.address.clone().into(),
            self.state_root.clone().into(),
        ]
    }
}

impl_persistable!(IdAddress);

/// An actor whose `(code, head)` changed, as seen in the child state.
#[derive(Clone, Debug, PartialEq)]
pub struct Actor {
    pub height: i64,
    pub id: String,
    pub state_root: String,
    pub code: String,
    pub head: String,
    pub balance: String,
    pub nonce: i64,
}

impl ModelRow for Actor {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "actors",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("id"),
            FieldSpec::pk("state_root"),
            FieldSpec::col("code"),
            FieldSpec::col("head"),
            FieldSpec::col("balance"),
            FieldSpec::col("nonce"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.id.clone().into(),
            self.state_root.clone().into(),
            self.code.clone().into(),
            self.head.clone().into(),
            Value::Numeric(self.balance.clone()),
            self.nonce.into(),
        ]
    }
}

impl_persistable!(Actor);

/// Raw dump of an actor's state head.
#[derive(Clone, Debug, PartialEq)]
pub struct ActorState {
    pub height: i64,
    pub head: String,
    pub code: String,
    pub state_root: String,
    pub state: Option<serde_json::Value>,
}

impl ModelRow for ActorState {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "actor_states",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("head"),
            FieldSpec::pk("code"),
            FieldSpec::pk("state_root"),
            FieldSpec::col("state"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.head.clone().into(),
            self.code.clone().into(),
            self.state_root.clone().into(),
            Value::Json(self.state.clone()),
        ]
    }
}

impl_persistable!(ActorState);
