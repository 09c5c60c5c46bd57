// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Context;
use cid::Cid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{ActorFamily, ActorRegistry};
use crate::address::Address;
use crate::bigint::bigint_ser::{BigIntDe, BigIntSer};
use crate::bigint::TokenAmount;
use crate::clock::ChainEpoch;
use crate::encoding::Cbor;
use crate::ipld::{IpldStore, IpldStoreExt};
use crate::state_tree::ActorState;

/// A storage deal proposal published on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DealProposal {
    pub piece_cid: Cid,
    pub piece_size: u64,
    pub verified_deal: bool,
    pub client: Address,
    pub provider: Address,
    pub label: String,
    pub start_epoch: ChainEpoch,
    pub end_epoch: ChainEpoch,
    pub storage_price_per_epoch: TokenAmount,
    pub provider_collateral: TokenAmount,
    pub client_collateral: TokenAmount,
}

impl DealProposal {
    /// Piece size with the padding stripped.
    pub fn unpadded_piece_size(&self) -> u64 {
        self.piece_size - self.piece_size / 128
    }
}

impl Serialize for DealProposal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.piece_cid,
            self.piece_size,
            self.verified_deal,
            &self.client,
            &self.provider,
            &self.label,
            self.start_epoch,
            self.end_epoch,
            BigIntSer(&self.storage_price_per_epoch),
            BigIntSer(&self.provider_collateral),
            BigIntSer(&self.client_collateral),
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DealProposal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (
            piece_cid,
            piece_size,
            verified_deal,
            client,
            provider,
            label,
            start_epoch,
            end_epoch,
            BigIntDe(storage_price_per_epoch),
            BigIntDe(provider_collateral),
            BigIntDe(client_collateral),
        ) = Deserialize::deserialize(deserializer)?;
        Ok(DealProposal {
            piece_cid,
            piece_size,
            verified_deal,
            client,
            provider,
            label,
            start_epoch,
            end_epoch,
            storage_price_per_epoch,
            provider_collateral,
            client_collateral,
        })
    }
}

/// Execution state of a deal; epochs are -1 until set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealState {
    pub sector_start_epoch: ChainEpoch,
    pub last_updated_epoch: ChainEpoch,
    pub slash_epoch: ChainEpoch,
}

/// Storage market actor state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRepr {
    /// Link to the proposals table, a list of `(deal id, proposal)` pairs.
    pub proposals: Cid,
    /// Link to the deal states table, a list of `(deal id, state)` pairs.
    pub states: Cid,
    pub next_deal_id: u64,
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
            .context("market state missing from store")?;
        match registry.lookup(&actor.code) {
            Some((ActorFamily::Market, 0)) => Ok(State::V0(repr)),
            Some((ActorFamily::Market, 2)) => Ok(State::V2(repr)),
            _ => Err(anyhow::anyhow!("unknown market actor code {}", actor.code)),
        }
    }

    fn repr(&self) -> &StateRepr {
        match self {
            State::V0(st) | State::V2(st) => st,
        }
    }

    pub fn for_each_deal_proposal<F>(&self, store: &dyn IpldStore, mut f: F) -> anyhow::Result<()>
    where
        F: FnMut(u64, &DealProposal) -> anyhow::Result<()>,
    {
        let entries: Vec<(u64, DealProposal)> = store
            .get_obj(&self.repr().proposals)?
            .context("deal proposals missing from store")?;
        for (id, proposal) in &entries {
            f(*id, proposal)?;
        }
        Ok(())
    }

    pub fn for_each_deal_state<F>(&self, store: &dyn IpldStore, mut f: F) -> anyhow::Result<()>
    where
        F: FnMut(u64, &DealState) -> anyhow::Result<()>,
    {
        let entries: Vec<(u64, DealState)> = store
            .get_obj(&self.repr().states)?
            .context("deal states missing from store")?;
        for (id, state) in &entries {
            f(*id, state)?;
        }
        Ok(())
    }
}
