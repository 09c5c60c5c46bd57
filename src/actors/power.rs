// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Context;
use cid::Cid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{ActorFamily, ActorRegistry, FilterEstimate};
use crate::bigint::bigint_ser::{BigIntDe, BigIntSer};
use crate::bigint::{BigInt, TokenAmount};
use crate::encoding::Cbor;
use crate::ipld::{IpldStore, IpldStoreExt};
use crate::state_tree::ActorState;

/// Storage power actor state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateRepr {
    pub total_raw_byte_power: BigInt,
    pub total_quality_adj_power: BigInt,
    pub total_pledge_collateral: TokenAmount,
    pub this_epoch_qa_power_smoothed: FilterEstimate,
    pub miner_count: i64,
    pub miner_above_min_power_count: i64,
    /// Link to the per-miner claims map.
    pub claims: Cid,
}

impl Serialize for StateRepr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            BigIntSer(&self.total_raw_byte_power),
            BigIntSer(&self.total_quality_adj_power),
            BigIntSer(&self.total_pledge_collateral),
            &self.this_epoch_qa_power_smoothed,
            self.miner_count,
            self.miner_above_min_power_count,
            &self.claims,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StateRepr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (
            BigIntDe(total_raw_byte_power),
            BigIntDe(total_quality_adj_power),
            BigIntDe(total_pledge_collateral),
            this_epoch_qa_power_smoothed,
            miner_count,
            miner_above_min_power_count,
            claims,
        ) = Deserialize::deserialize(deserializer)?;
        Ok(StateRepr {
            total_raw_byte_power,
            total_quality_adj_power,
            total_pledge_collateral,
            this_epoch_qa_power_smoothed,
            miner_count,
            miner_above_min_power_count,
            claims,
        })
    }
}

impl Cbor for StateRepr {}

pub enum State {
    V0(StateRepr),
    V2(StateRepr),
}

impl State {
    pub fn load(
        registry: &ActorRegistry,
        store: &dyn IpldStore,
        actor: &ActorState,
    ) -> anyhow::Result<State> {
        let repr: StateRepr = store
            .get_obj(&actor.state)?
            .context("power state missing from store")?;
        match registry.lookup(&actor.code) {
            Some((ActorFamily::Power, 0)) => Ok(State::V0(repr)),
            Some((ActorFamily::Power, 2)) => Ok(State::V2(repr)),
            _ => Err(anyhow::anyhow!("unknown power actor code {}", actor.code)),
        }
    }

    fn repr(&self) -> &StateRepr {
        match self {
            State::V0(st) | State::V2(st) => st,
        }
    }

    pub fn total_raw_byte_power(&self) -> &BigInt {
        &self.repr().total_raw_byte_power
    }

    pub fn total_quality_adj_power(&self) -> &BigInt {
        &self.repr().total_quality_adj_power
    }

    pub fn total_pledge_collateral(&self) -> &TokenAmount {
        &self.repr().total_pledge_collateral
    }

    pub fn this_epoch_qa_power_smoothed(&self) -> &FilterEstimate {
        &self.repr().this_epoch_qa_power_smoothed
    }

    pub fn miner_count(&self) -> i64 {
        self.repr().miner_count
    }

    pub fn miner_above_min_power_count(&self) -> i64 {
        self.repr().miner_above_min_power_count
    }
}
