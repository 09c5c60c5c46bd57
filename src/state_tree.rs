// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use ahash::AHashMap;
use cid::Cid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::address::Address;
use crate::bigint::bigint_ser::{BigIntDe, BigIntSer};
use crate::bigint::TokenAmount;
use crate::ipld::{self, IpldStore, IpldStoreExt};

#[derive(Debug, Error)]
pub enum Error {
    #[error("state root {0} not found")]
    RootNotFound(Cid),
    #[error(transparent)]
    Ipld(#[from] ipld::Error),
}

/// State of an actor: code, state head, nonce and balance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActorState {
    /// Link to code for the actor.
    pub code: Cid,
    /// Link to the head of the actor's state.
    pub state: Cid,
    /// Sequence (nonce) of the actor.
    pub sequence: u64,
    /// Tokens available to the actor.
    pub balance: TokenAmount,
}

impl ActorState {
    pub fn new(code: Cid, state: Cid, balance: TokenAmount, sequence: u64) -> Self {
        Self {
            code,
            state,
            sequence,
            balance,
        }
    }
}

impl Serialize for ActorState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.code,
            &self.state,
            self.sequence,
            BigIntSer(&self.balance),
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ActorState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (code, state, sequence, BigIntDe(balance)) = Deserialize::deserialize(deserializer)?;
        Ok(ActorState {
            code,
            state,
            sequence,
            balance,
        })
    }
}

/// The global state tree: a map from actor address to actor state, rooted at
/// a CID in an IPLD store. Entries are kept sorted so the root is a
/// deterministic function of the content.
pub struct StateTree {
    actors: BTreeMap<Address, ActorState>,
}

impl StateTree {
    pub fn empty() -> Self {
        Self {
            actors: BTreeMap::new(),
        }
    }

    /// Loads the tree rooted at `root`.
    pub fn load(store: &dyn IpldStore, root: &Cid) -> Result<Self, Error> {
        let entries: Vec<(Address, ActorState)> = store
            .get_obj(root)?
            .ok_or(Error::RootNotFound(*root))?;
        Ok(Self {
            actors: entries.into_iter().collect(),
        })
    }

    /// Writes the tree into `store`, returning the new root.
    pub fn flush(&self, store: &dyn IpldStore) -> Result<Cid, Error> {
        let entries: Vec<(&Address, &ActorState)> = self.actors.iter().collect();
        Ok(store.put_obj(&entries)?)
    }

    pub fn get_actor(&self, addr: &Address) -> Option<&ActorState> {
        self.actors.get(addr)
    }

    pub fn set_actor(&mut self, addr: Address, actor: ActorState) {
        self.actors.insert(addr, actor);
    }

    pub fn delete_actor(&mut self, addr: &Address) {
        self.actors.remove(addr);
    }

    pub fn for_each<F>(&self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&Address, &ActorState) -> Result<(), Error>,
    {
        for (addr, actor) in &self.actors {
            f(addr, actor)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

/// Computes the set of actors whose `(code, state)` pair changed between two
/// state roots: additions and modifications, keyed by address, valued at the
/// child state.
pub fn changed_actors(
    store: &dyn IpldStore,
    parent_root: &Cid,
    child_root: &Cid,
) -> Result<AHashMap<Address, ActorState>, Error> {
    let parent = StateTree::load(store, parent_root)?;
    let child = StateTree::load(store, child_root)?;

    let mut changed = AHashMap::new();
    for (addr, actor) in &child.actors {
        match parent.actors.get(addr) {
            Some(prev) if prev.code == actor.code && prev.state == actor.state => {}
            _ => {
                changed.insert(addr.clone(), actor.clone());
            }
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding;
    use crate::ipld::MemoryStore;

    fn actor(code_seed: &[u8], state_seed: &[u8]) -> ActorState {
        ActorState::new(
            encoding::cid_from_cbor(code_seed),
            encoding::cid_from_cbor(state_seed),
            TokenAmount::from(1000),
            0,
        )
    }

    #[test]
    fn flush_and_load_round_trip() {
        let store = MemoryStore::new();
        let mut tree = StateTree::empty();
        tree.set_actor(Address::new_id(1), actor(b"c1", b"s1"));
        tree.set_actor(Address::new_id(2), actor(b"c2", b"s2"));

        let root = tree.flush(&store).unwrap();
        let loaded = StateTree::load(&store, &root).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.get_actor(&Address::new_id(1)),
            tree.get_actor(&Address::new_id(1))
        );
    }

    #[test]
    fn root_is_insertion_order_independent() {
        let store = MemoryStore::new();
        let mut a = StateTree::empty();
        a.set_actor(Address::new_id(1), actor(b"c1", b"s1"));
        a.set_actor(Address::new_id(2), actor(b"c2", b"s2"));
        let mut b = StateTree::empty();
        b.set_actor(Address::new_id(2), actor(b"c2", b"s2"));
        b.set_actor(Address::new_id(1), actor(b"c1", b"s1"));
        assert_eq!(a.flush(&store).unwrap(), b.flush(&store).unwrap());
    }

    #[test]
    fn diff_reports_new_and_modified_actors() {
        let store = MemoryStore::new();
        let mut parent = StateTree::empty();
        parent.set_actor(Address::new_id(1), actor(b"c1", b"s1"));
        parent.set_actor(Address::new_id(2), actor(b"c2", b"s2"));
        let parent_root = parent.flush(&store).unwrap();

        let mut child = StateTree::empty();
        // unchanged
        child.set_actor(Address::new_id(1), actor(b"c1", b"s1"));
        // modified head
        child.set_actor(Address::new_id(2), actor(b"c2", b"s2x"));
        // new actor
        child.set_actor(Address::new_id(3), actor(b"c3", b"s3"));
        let child_root = child.flush(&store).unwrap();

        let changed = changed_actors(&store, &parent_root, &child_root).unwrap();
        assert_eq!(changed.len(), 2);
        assert!(changed.contains_key(&Address::new_id(2)));
        assert!(changed.contains_key(&Address::new_id(3)));
        assert!(!changed.contains_key(&Address::new_id(1)));
    }
}
