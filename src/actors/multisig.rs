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
use crate::message::{ExitCode, MethodNum};
use crate::state_tree::ActorState;

pub const METHOD_PROPOSE: MethodNum = 2;
pub const METHOD_APPROVE: MethodNum = 3;

/// A transaction pending approval in a multisig's transaction map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub to: Address,
    pub value: TokenAmount,
    pub method: MethodNum,
    pub params: Vec<u8>,
    pub approved: Vec<Address>,
}

impl Serialize for Transaction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.to,
            BigIntSer(&self.value),
            self.method,
            serde_bytes::Bytes::new(&self.params),
            &self.approved,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Transaction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (to, BigIntDe(value), method, params, approved): (_, _, _, ByteBuf, _) =
            Deserialize::deserialize(deserializer)?;
        Ok(Transaction {
            to,
            value,
            method,
            params: params.into_vec(),
            approved,
        })
    }
}

/// On-chain multisig state; the wire shape is shared by every version this
/// build understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateRepr {
    pub signers: Vec<Address>,
    pub num_approvals_threshold: u64,
    pub next_txn_id: i64,
    pub initial_balance: TokenAmount,
    pub start_epoch: ChainEpoch,
    pub unlock_duration: ChainEpoch,
    /// Link to the pending transaction map, a list of `(id, txn)` pairs.
    pub pending_txns: Cid,
}

impl Serialize for StateRepr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.signers,
            self.num_approvals_threshold,
            self.next_txn_id,
            BigIntSer(&self.initial_balance),
            self.start_epoch,
            self.unlock_duration,
            &self.pending_txns,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StateRepr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (
            signers,
            num_approvals_threshold,
            next_txn_id,
            BigIntDe(initial_balance),
            start_epoch,
            unlock_duration,
            pending_txns,
        ) = Deserialize::deserialize(deserializer)?;
        Ok(StateRepr {
            signers,
            num_approvals_threshold,
            next_txn_id,
            initial_balance,
            start_epoch,
            unlock_duration,
            pending_txns,
        })
    }
}

impl Cbor for StateRepr {}

/// Multisig actor state, dispatched on the actor's code CID.
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
            .context("multisig state missing from store")?;
        match registry.lookup(&actor.code) {
            Some((ActorFamily::Multisig, 0)) => Ok(State::V0(repr)),
            Some((ActorFamily::Multisig, 2)) => Ok(State::V2(repr)),
            _ => Err(anyhow::anyhow!(
                "unknown multisig actor code {}",
                actor.code
            )),
        }
    }

    fn repr(&self) -> &StateRepr {
        match self {
            State::V0(st) | State::V2(st) => st,
        }
    }

    pub fn initial_balance(&self) -> TokenAmount {
        self.repr().initial_balance.clone()
    }

    pub fn threshold(&self) -> u64 {
        self.repr().num_approvals_threshold
    }

    pub fn signers(&self) -> &[Address] {
        &self.repr().signers
    }

    /// Iterates the pending transaction map.
    pub fn for_each_pending_txn<F>(&self, store: &dyn IpldStore, mut f: F) -> anyhow::Result<()>
    where
        F: FnMut(i64, &Transaction) -> anyhow::Result<()>,
    {
        let pending: Vec<(i64, Transaction)> = store
            .get_obj(&self.repr().pending_txns)?
            .context("pending transaction map missing from store")?;
        for (id, txn) in &pending {
            f(*id, txn)?;
        }
        Ok(())
    }
}

/// Parameters of a Propose message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposeParams {
    pub to: Address,
    pub value: TokenAmount,
    pub method: MethodNum,
    pub params: Vec<u8>,
}

impl Serialize for ProposeParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.to,
            BigIntSer(&self.value),
            self.method,
            serde_bytes::Bytes::new(&self.params),
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProposeParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (to, BigIntDe(value), method, params): (_, _, _, ByteBuf) =
            Deserialize::deserialize(deserializer)?;
        Ok(ProposeParams {
            to,
            value,
            method,
            params: params.into_vec(),
        })
    }
}

impl Cbor for ProposeParams {}

/// Return value of a Propose message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposeReturn {
    pub txn_id: i64,
    /// Whether the proposal gathered enough approvals to apply immediately.
    pub applied: bool,
    pub code: ExitCode,
    pub ret: Vec<u8>,
}

impl Serialize for ProposeReturn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            self.txn_id,
            self.applied,
            self.code,
            serde_bytes::Bytes::new(&self.ret),
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProposeReturn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (txn_id, applied, code, ret): (_, _, _, ByteBuf) =
            Deserialize::deserialize(deserializer)?;
        Ok(ProposeReturn {
            txn_id,
            applied,
            code,
            ret: ret.into_vec(),
        })
    }
}

impl Cbor for ProposeReturn {}

/// Parameters of an Approve (or Cancel) message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxnIdParams {
    pub id: i64,
    pub proposal_hash: Vec<u8>,
}

impl Serialize for TxnIdParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.id, serde_bytes::Bytes::new(&self.proposal_hash)).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TxnIdParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (id, proposal_hash): (_, ByteBuf) = Deserialize::deserialize(deserializer)?;
        Ok(TxnIdParams {
            id,
            proposal_hash: proposal_hash.into_vec(),
        })
    }
}

impl Cbor for TxnIdParams {}

/// Return value of an Approve message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApproveReturn {
    pub applied: bool,
    pub code: ExitCode,
    pub ret: Vec<u8>,
}

impl Serialize for ApproveReturn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.applied, self.code, serde_bytes::Bytes::new(&self.ret)).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ApproveReturn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (applied, code, ret): (_, _, ByteBuf) = Deserialize::deserialize(deserializer)?;
        Ok(ApproveReturn {
            applied,
            code,
            ret: ret.into_vec(),
        })
    }
}

impl Cbor for ApproveReturn {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bigint::BigInt;
    use crate::ipld::MemoryStore;

    #[test]
    fn state_round_trip_and_accessors() {
        let store = MemoryStore::new();
        let registry = ActorRegistry::new();

        let txn = Transaction {
            to: Address::new_id(900),
            value: BigInt::from(75),
            method: 0,
            params: vec![],
            approved: vec![Address::new_id(11)],
        };
        let pending = store.put_obj(&vec![(7i64, txn.clone())]).unwrap();

        let repr = StateRepr {
            signers: vec![Address::new_id(11), Address::new_id(12)],
            num_approvals_threshold: 2,
            next_txn_id: 8,
            initial_balance: BigInt::from(5000),
            start_epoch: 0,
            unlock_duration: 0,
            pending_txns: pending,
        };
        let head = store.put_obj(&repr).unwrap();
        let code = registry.code_for(ActorFamily::Multisig, 2).unwrap();
        let actor = ActorState::new(code, head, BigInt::from(5000), 1);

        let state = State::load(&registry, &store, &actor).unwrap();
        assert_eq!(state.threshold(), 2);
        assert_eq!(state.initial_balance(), BigInt::from(5000));
        assert_eq!(state.signers().len(), 2);

        let mut seen = Vec::new();
        state
            .for_each_pending_txn(&store, |id, t| {
                seen.push((id, t.clone()));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(7, txn)]);
    }

    #[test]
    fn load_rejects_foreign_code() {
        let store = MemoryStore::new();
        let registry = ActorRegistry::new();
        let head = store.put_obj(&StateRepr {
            signers: vec![],
            num_approvals_threshold: 1,
            next_txn_id: 0,
            initial_balance: BigInt::from(0),
            start_epoch: 0,
            unlock_duration: 0,
            pending_txns: store.put_obj(&Vec::<(i64, Transaction)>::new()).unwrap(),
        });
        let code = registry.code_for(ActorFamily::Miner, 0).unwrap();
        let actor = ActorState::new(code, head.unwrap(), BigInt::from(0), 0);
        assert!(State::load(&registry, &store, &actor).is_err());
    }

    #[test]
    fn propose_return_round_trip() {
        let ret = ProposeReturn {
            txn_id: 7,
            applied: true,
            code: ExitCode::OK,
            ret: vec![],
        };
        let bz = ret.marshal_cbor().unwrap();
        assert_eq!(ProposeReturn::unmarshal_cbor(&bz).unwrap(), ret);
    }
}
