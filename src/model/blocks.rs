// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{impl_persistable, FieldSpec, ModelRow, ModelSpec, Value};
use crate::blocks;

/// One row per unique block CID.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockHeader {
    pub height: i64,
    pub cid: String,
    pub miner: String,
    pub parent_weight: String,
    pub parent_base_fee: String,
    pub parent_state_root: String,
    pub win_count: i64,
    pub timestamp: i64,
    pub fork_signal: i64,
}

impl BlockHeader {
    pub fn from_header(header: &blocks::BlockHeader) -> Self {
        Self {
            height: header.epoch(),
            cid: header.cid().to_string(),
            miner: header.miner_address().to_string(),
            parent_weight: header.weight().to_string(),
            parent_base_fee: header.parent_base_fee().to_string(),
            parent_state_root: header.state_root().to_string(),
            win_count: header.win_count(),
            timestamp: header.timestamp() as i64,
            fork_signal: header.fork_signal() as i64,
        }
    }
}

impl ModelRow for BlockHeader {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "block_headers",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("cid"),
            FieldSpec::col("miner"),
            FieldSpec::col("parent_weight"),
            FieldSpec::col("parent_base_fee"),
            FieldSpec::col("parent_state_root"),
            FieldSpec::col("win_count"),
            FieldSpec::col("timestamp"),
            FieldSpec::col("fork_signal"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.cid.clone().into(),
            self.miner.clone().into(),
            Value::Numeric(self.parent_weight.clone()),
            Value::Numeric(self.parent_base_fee.clone()),
            self.parent_state_root.clone().into(),
            self.win_count.into(),
            self.timestamp.into(),
            self.fork_signal.into(),
        ]
    }
}

impl_persistable!(BlockHeader);

/// Parent edge of a block; one row per parent CID.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockParent {
    pub height: i64,
    pub block: String,
    pub parent: String,
}

impl ModelRow for BlockParent {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "block_parents",
        &[
            FieldSpec::pk("height"),
            FieldSpec::pk("block"),
            FieldSpec::pk("parent"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.block.clone().into(),
            self.parent.clone().into(),
        ]
    }
}

impl_persistable!(BlockParent);

/// A drand round referenced by a block.
#[derive(Clone, Debug, PartialEq)]
pub struct DrandBlockEntry {
    pub round: i64,
    pub block: String,
}

impl ModelRow for DrandBlockEntry {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "drand_block_entries",
        &[FieldSpec::pk("round"), FieldSpec::pk("block")],
    );

    fn values(&self) -> Vec<Value> {
        vec![self.round.into(), self.block.clone().into()]
    }
}

impl_persistable!(DrandBlockEntry);
