// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{impl_persistable, FieldSpec, ModelRow, ModelSpec, Value};

/// One row per epoch recording what the chain agreed on there. Null rounds
/// leave a placeholder row with no tipset so downstream joins keep a slot.
#[derive(Clone, Debug, PartialEq)]
pub struct ChainConsensus {
    pub height: i64,
    pub parent_state_root: String,
    pub parent_tipset: String,
    /// Key of the tipset at this height; `None` marks a null round.
    pub tipset: Option<String>,
}

impl ModelRow for ChainConsensus {
    const SPEC: &'static ModelSpec = &ModelSpec::new(
        "chain_consensus",
        &[
            FieldSpec::pk("height"),
            FieldSpec::col("parent_state_root"),
            FieldSpec::col("parent_tipset"),
            FieldSpec::col("tipset"),
        ],
    );

    fn values(&self) -> Vec<Value> {
        vec![
            self.height.into(),
            self.parent_state_root.clone().into(),
            self.parent_tipset.clone().into(),
            self.tipset.clone().into(),
        ]
    }
}

impl_persistable!(ChainConsensus);
