// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Context;
use cid::Cid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;

use super::{ActorFamily, ActorRegistry};
use crate::address::Address;
use crate::bigint::bigint_ser::{BigIntDe, BigIntSer};
use crate::bigint::TokenAmount;
use crate::clock::ChainEpoch;
use crate::encoding::Cbor;
use crate::ipld::{IpldStore, IpldStoreExt};
use crate::state_tree::ActorState;

/// Static miner metadata, linked from the state head.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MinerInfo {
    pub owner: Address,
    pub worker: Address,
    pub control_addresses: Vec<Address>,
    pub pending_worker_key: Option<WorkerKeyChange>,
    pub peer_id: Vec<u8>,
    pub sector_size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerKeyChange {
    pub new_worker: Address,
    pub effective_at: ChainEpoch,
}

impl Serialize for MinerInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.owner,
            &self.worker,
            &self.control_addresses,
            &self.pending_worker_key,
            serde_bytes::Bytes::new(&self.peer_id),
            self.sector_size,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MinerInfo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (owner, worker, control_addresses, pending_worker_key, peer_id, sector_size): (
            _,
            _,
            _,
            _,
            ByteBuf,
            _,
        ) = Deserialize::deserialize(deserializer)?;
        Ok(MinerInfo {
            owner,
            worker,
            control_addresses,
            pending_worker_key,
            peer_id: peer_id.into_vec(),
            sector_size,
        })
    }
}

/// Storage miner actor state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateRepr {
    /// Link to the miner info object.
    pub info: Cid,
    pub locked_funds: TokenAmount,
    pub initial_pledge: TokenAmount,
    pub pre_commit_deposits: TokenAmount,
}

impl Serialize for StateRepr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.info,
            BigIntSer(&self.locked_funds),
            BigIntSer(&self.initial_pledge),
            BigIntSer(&self.pre_commit_deposits),
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StateRepr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (info, BigIntDe(locked_funds), BigIntDe(initial_pledge), BigIntDe(pre_commit_deposits)) =
            Deserialize::deserialize(deserializer)?;
        Ok(StateRepr {
            info,
            locked_funds,
            initial_pledge,
            pre_commit_deposits,
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
            .context("miner state missing from store")?;
        match registry.lookup(&actor.code) {
            Some((ActorFamily::Miner, 0)) => Ok(State::V0(repr)),
            Some((ActorFamily::Miner, 2)) => Ok(State::V2(repr)),
            _ => Err(anyhow::anyhow!("unknown miner actor code {}", actor.code)),
        }
    }

    fn repr(&self) -> &StateRepr {
        match self {
            State::V0(st) | State::V2(st) => st,
        }
    }

    pub fn info(&self, store: &dyn IpldStore) -> anyhow::Result<MinerInfo> {
        store
            .get_obj(&self.repr().info)?
            .context("miner info missing from store")
    }

    pub fn locked_funds(&self) -> &TokenAmount {
        &self.repr().locked_funds
    }

    pub fn initial_pledge(&self) -> &TokenAmount {
        &self.repr().initial_pledge
    }

    pub fn pre_commit_deposits(&self) -> &TokenAmount {
        &self.repr().pre_commit_deposits
    }
}
