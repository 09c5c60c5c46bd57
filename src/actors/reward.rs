// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{ActorFamily, ActorRegistry, FilterEstimate};
use crate::bigint::bigint_ser::{BigIntDe, BigIntSer};
use crate::bigint::{BigInt, TokenAmount};
use crate::clock::ChainEpoch;
use crate::encoding::Cbor;
use crate::ipld::{IpldStore, IpldStoreExt};
use crate::state_tree::ActorState;

/// Reward actor state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateRepr {
    pub cumsum_baseline: BigInt,
    pub cumsum_realized: BigInt,
    pub effective_network_time: ChainEpoch,
    pub effective_baseline_power: BigInt,
    pub this_epoch_reward: TokenAmount,
    pub this_epoch_reward_smoothed: FilterEstimate,
    pub this_epoch_baseline_power: BigInt,
    pub total_storage_power_reward: TokenAmount,
}

impl Serialize for StateRepr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            BigIntSer(&self.cumsum_baseline),
            BigIntSer(&self.cumsum_realized),
            self.effective_network_time,
            BigIntSer(&self.effective_baseline_power),
            BigIntSer(&self.this_epoch_reward),
            &self.this_epoch_reward_smoothed,
            BigIntSer(&self.this_epoch_baseline_power),
            BigIntSer(&self.total_storage_power_reward),
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StateRepr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (
            BigIntDe(cumsum_baseline),
            BigIntDe(cumsum_realized),
            effective_network_time,
            BigIntDe(effective_baseline_power),
            BigIntDe(this_epoch_reward),
            this_epoch_reward_smoothed,
            BigIntDe(this_epoch_baseline_power),
            BigIntDe(total_storage_power_reward),
        ) = Deserialize::deserialize(deserializer)?;
        Ok(StateRepr {
            cumsum_baseline,
            cumsum_realized,
            effective_network_time,
            effective_baseline_power,
            this_epoch_reward,
            this_epoch_reward_smoothed,
            this_epoch_baseline_power,
            total_storage_power_reward,
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
            .context("reward state missing from store")?;
        match registry.lookup(&actor.code) {
            Some((ActorFamily::Reward, 0)) => Ok(State::V0(repr)),
            Some((ActorFamily::Reward, 2)) => Ok(State::V2(repr)),
            _ => Err(anyhow::anyhow!("unknown reward actor code {}", actor.code)),
        }
    }

    fn repr(&self) -> &StateRepr {
        match self {
            State::V0(st) | State::V2(st) => st,
        }
    }

    pub fn cumsum_baseline(&self) -> &BigInt {
        &self.repr().cumsum_baseline
    }

    pub fn cumsum_realized(&self) -> &BigInt {
        &self.repr().cumsum_realized
    }

    pub fn effective_network_time(&self) -> ChainEpoch {
        self.repr().effective_network_time
    }

    pub fn effective_baseline_power(&self) -> &BigInt {
        &self.repr().effective_baseline_power
    }

    pub fn this_epoch_reward(&self) -> &TokenAmount {
        &self.repr().this_epoch_reward
    }

    pub fn this_epoch_reward_smoothed(&self) -> &FilterEstimate {
        &self.repr().this_epoch_reward_smoothed
    }

    pub fn this_epoch_baseline_power(&self) -> &BigInt {
        &self.repr().this_epoch_baseline_power
    }

    pub fn total_storage_power_reward(&self) -> &TokenAmount {
        &self.repr().total_storage_power_reward
    }
}
