// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Version-agnostic views over built-in actor state. Each family exposes a
//! `State` enum whose variants are the per-version representations; callers
//! see one accessor surface regardless of the actor version that produced
//! the state. Code CIDs are resolved through an [`ActorRegistry`] built by
//! the composition root.

pub mod init;
pub mod market;
pub mod miner;
pub mod multisig;
pub mod power;
pub mod reward;

use std::fmt;

use ahash::AHashMap;
use cid::Cid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::bigint::bigint_ser::{BigIntDe, BigIntSer};
use crate::bigint::BigInt;
use crate::encoding;
use crate::message::MethodNum;

/// Built-in actor families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActorFamily {
    Account,
    Cron,
    Init,
    Market,
    Miner,
    Multisig,
    Power,
    Reward,
    System,
    Verifreg,
}

impl ActorFamily {
    pub const ALL: &'static [ActorFamily] = &[
        ActorFamily::Account,
        ActorFamily::Cron,
        ActorFamily::Init,
        ActorFamily::Market,
        ActorFamily::Miner,
        ActorFamily::Multisig,
        ActorFamily::Power,
        ActorFamily::Reward,
        ActorFamily::System,
        ActorFamily::Verifreg,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActorFamily::Account => "account",
            ActorFamily::Cron => "cron",
            ActorFamily::Init => "init",
            ActorFamily::Market => "storagemarket",
            ActorFamily::Miner => "storageminer",
            ActorFamily::Multisig => "multisig",
            ActorFamily::Power => "storagepower",
            ActorFamily::Reward => "reward",
            ActorFamily::System => "system",
            ActorFamily::Verifreg => "verifiedregistry",
        }
    }
}

impl fmt::Display for ActorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Actor versions this build understands.
pub const KNOWN_ACTOR_VERSIONS: &[u64] = &[0, 2];

/// Singleton addresses assigned at genesis.
pub mod builtin_addr {
    use crate::address::Address;

    pub const SYSTEM: Address = Address::new_id(0);
    pub const INIT: Address = Address::new_id(1);
    pub const REWARD: Address = Address::new_id(2);
    pub const CRON: Address = Address::new_id(3);
    pub const POWER: Address = Address::new_id(4);
    pub const MARKET: Address = Address::new_id(5);
    pub const VERIFREG: Address = Address::new_id(6);

    /// First non-singleton actor id.
    pub const FIRST_NON_SINGLETON_ID: u64 = 100;
}

/// Maps actor code CIDs to their family and version. Built once at startup;
/// handlers register against it rather than against package-level globals.
#[derive(Default)]
pub struct ActorRegistry {
    by_code: AHashMap<Cid, (ActorFamily, u64)>,
    by_family: AHashMap<(ActorFamily, u64), Cid>,
}

impl ActorRegistry {
    /// Registry over every known `(family, version)` pair.
    pub fn new() -> Self {
        let mut reg = Self::default();
        for &family in ActorFamily::ALL {
            for &version in KNOWN_ACTOR_VERSIONS {
                reg.register(family, version);
            }
        }
        reg
    }

    fn register(&mut self, family: ActorFamily, version: u64) {
        let code = code_cid(family, version);
        self.by_code.insert(code, (family, version));
        self.by_family.insert((family, version), code);
    }

    /// Resolves a code CID to its family and version.
    pub fn lookup(&self, code: &Cid) -> Option<(ActorFamily, u64)> {
        self.by_code.get(code).copied()
    }

    /// The code CID for a known `(family, version)` pair.
    pub fn code_for(&self, family: ActorFamily, version: u64) -> Option<Cid> {
        self.by_family.get(&(family, version)).copied()
    }

    pub fn is_family(&self, code: &Cid, family: ActorFamily) -> bool {
        matches!(self.lookup(code), Some((f, _)) if f == family)
    }

    /// Canonical `fil/<version>/<family>` name for a code CID.
    pub fn name_by_code(&self, code: &Cid) -> Option<String> {
        self.lookup(code)
            .map(|(family, version)| format!("fil/{}/{}", version, family))
    }
}

/// Code CIDs are derived from the canonical actor name, so they are stable
/// across processes without a bundle manifest.
fn code_cid(family: ActorFamily, version: u64) -> Cid {
    encoding::cid_from_cbor(format!("fil/{}/{}", version, family).as_bytes())
}

/// Alpha-beta filter estimate used by reward and power state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterEstimate {
    pub position: BigInt,
    pub velocity: BigInt,
}

impl Serialize for FilterEstimate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (BigIntSer(&self.position), BigIntSer(&self.velocity)).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FilterEstimate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (BigIntDe(position), BigIntDe(velocity)) = Deserialize::deserialize(deserializer)?;
        Ok(FilterEstimate { position, velocity })
    }
}

/// Human-readable method name for a `(family, method)` pair, used when
/// parsing message parameters. `None` marks an unknown method.
pub fn method_name(family: ActorFamily, method: MethodNum) -> Option<&'static str> {
    use ActorFamily::*;
    match (method, family) {
        (0, _) => Some("Send"),
        (1, _) => Some("Constructor"),
        (2, Multisig) => Some("Propose"),
        (3, Multisig) => Some("Approve"),
        (4, Multisig) => Some("Cancel"),
        (5, Multisig) => Some("AddSigner"),
        (6, Multisig) => Some("RemoveSigner"),
        (7, Multisig) => Some("SwapSigner"),
        (8, Multisig) => Some("ChangeNumApprovalsThreshold"),
        (2, Market) => Some("AddBalance"),
        (3, Market) => Some("WithdrawBalance"),
        (4, Market) => Some("PublishStorageDeals"),
        (2, Miner) => Some("ControlAddresses"),
        (3, Miner) => Some("ChangeWorkerAddress"),
        (4, Miner) => Some("ChangePeerID"),
        (5, Miner) => Some("SubmitWindowedPoSt"),
        (6, Miner) => Some("PreCommitSector"),
        (7, Miner) => Some("ProveCommitSector"),
        (16, Miner) => Some("WithdrawBalance"),
        (2, Power) => Some("CreateMiner"),
        (3, Power) => Some("UpdateClaimedPower"),
        (2, Reward) => Some("AwardBlockReward"),
        (3, Reward) => Some("ThisEpochReward"),
        (2, Init) => Some("Exec"),
        (2, Account) => Some("PubkeyAddress"),
        (2, Verifreg) => Some("AddVerifier"),
        (3, Verifreg) => Some("RemoveVerifier"),
        (4, Verifreg) => Some("AddVerifiedClient"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_known_codes() {
        let reg = ActorRegistry::new();
        let code = reg.code_for(ActorFamily::Multisig, 0).unwrap();
        assert_eq!(reg.lookup(&code), Some((ActorFamily::Multisig, 0)));
        assert_eq!(reg.name_by_code(&code).unwrap(), "fil/0/multisig");
        assert!(reg.is_family(&code, ActorFamily::Multisig));
        assert!(!reg.is_family(&code, ActorFamily::Miner));
    }

    #[test]
    fn unknown_code_is_unknown() {
        let reg = ActorRegistry::new();
        let bogus = encoding::cid_from_cbor(b"no such actor");
        assert_eq!(reg.lookup(&bogus), None);
        assert_eq!(reg.name_by_code(&bogus), None);
    }

    #[test]
    fn versions_get_distinct_codes() {
        let reg = ActorRegistry::new();
        let v0 = reg.code_for(ActorFamily::Miner, 0).unwrap();
        let v2 = reg.code_for(ActorFamily::Miner, 2).unwrap();
        assert_ne!(v0, v2);
    }

    #[test]
    fn method_names() {
        assert_eq!(method_name(ActorFamily::Multisig, 2), Some("Propose"));
        assert_eq!(method_name(ActorFamily::Market, 4), Some("PublishStorageDeals"));
        assert_eq!(method_name(ActorFamily::Multisig, 99), None);
        assert_eq!(method_name(ActorFamily::Cron, 0), Some("Send"));
    }
}
