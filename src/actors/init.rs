// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Context;
use cid::Cid;
use serde::{Deserialize, Serialize};

use super::{ActorFamily, ActorRegistry};
use crate::address::Address;
use crate::encoding::Cbor;
use crate::ipld::{IpldStore, IpldStoreExt};
use crate::state_tree::ActorState;

/// Init actor state: the robust-address to ID-address map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRepr {
    /// Link to the address map, a list of `(robust, id)` pairs.
    pub address_map: Cid,
    pub next_id: u64,
    pub network_name: String,
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
            .context("init state missing from store")?;
        match registry.lookup(&actor.code) {
            Some((ActorFamily::Init, 0)) => Ok(State::V0(repr)),
            Some((ActorFamily::Init, 2)) => Ok(State::V2(repr)),
            _ => Err(anyhow::anyhow!("unknown init actor code {}", actor.code)),
        }
    }

    fn repr(&self) -> &StateRepr {
        match self {
            State::V0(st) | State::V2(st) => st,
        }
    }

    /// Resolves an address to an ID address through the map. ID addresses
    /// pass through unchanged; an unmapped robust address resolves to `None`.
    pub fn resolve_address(
        &self,
        store: &dyn IpldStore,
        addr: &Address,
    ) -> anyhow::Result<Option<Address>> {
        if addr.is_id() {
            return Ok(Some(addr.clone()));
        }
        let mut resolved = None;
        self.for_each_address(store, |id, robust| {
            if robust == addr {
                resolved = Some(Address::new_id(id));
            }
            Ok(())
        })?;
        Ok(resolved)
    }

    /// Iterates `(id, robust)` pairs in the address map.
    pub fn for_each_address<F>(&self, store: &dyn IpldStore, mut f: F) -> anyhow::Result<()>
    where
        F: FnMut(u64, &Address) -> anyhow::Result<()>,
    {
        let entries: Vec<(Address, u64)> = store
            .get_obj(&self.repr().address_map)?
            .context("init address map missing from store")?;
        for (robust, id) in &entries {
            f(*id, robust)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bigint::BigInt;
    use crate::ipld::MemoryStore;

    #[test]
    fn resolves_mapped_addresses() {
        let store = MemoryStore::new();
        let registry = ActorRegistry::new();

        let robust = Address::new_robust("1somekey").unwrap();
        let map = store.put_obj(&vec![(robust.clone(), 105u64)]).unwrap();
        let head = store
            .put_obj(&StateRepr {
                address_map: map,
                next_id: 106,
                network_name: "testnet".into(),
            })
            .unwrap();
        let code = registry.code_for(ActorFamily::Init, 0).unwrap();
        let actor = ActorState::new(code, head, BigInt::from(0), 0);

        let state = State::load(&registry, &store, &actor).unwrap();
        assert_eq!(
            state.resolve_address(&store, &robust).unwrap(),
            Some(Address::new_id(105))
        );
        assert_eq!(
            state
                .resolve_address(&store, &Address::new_id(42))
                .unwrap(),
            Some(Address::new_id(42))
        );
        assert_eq!(
            state
                .resolve_address(&store, &Address::new_robust("1unmapped").unwrap())
                .unwrap(),
            None
        );
    }
}
