// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;

use super::{Error, TipsetKeys};
use crate::bigint::bigint_ser::{BigIntDe, BigIntSer};
use crate::bigint::{BigInt, TokenAmount};
use crate::clock::ChainEpoch;
use crate::encoding;

/// A ticket from a block's VRF chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket {
    pub vrfproof: Vec<u8>,
}

impl Ticket {
    pub fn new(vrfproof: Vec<u8>) -> Self {
        Self { vrfproof }
    }
}

impl Serialize for Ticket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [serde_bytes::Bytes::new(&self.vrfproof)].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Ticket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let [vrfproof]: [ByteBuf; 1] = Deserialize::deserialize(deserializer)?;
        Ok(Self {
            vrfproof: vrfproof.into_vec(),
        })
    }
}

/// Proof of a winning leader election, carrying the number of election wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElectionProof {
    pub win_count: i64,
    pub vrfproof: Vec<u8>,
}

impl Serialize for ElectionProof {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.win_count, serde_bytes::Bytes::new(&self.vrfproof)).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ElectionProof {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (win_count, vrfproof): (i64, ByteBuf) = Deserialize::deserialize(deserializer)?;
        Ok(Self {
            win_count,
            vrfproof: vrfproof.into_vec(),
        })
    }
}

/// A drand randomness round referenced by a block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BeaconEntry {
    round: u64,
    data: Vec<u8>,
}

impl BeaconEntry {
    pub fn new(round: u64, data: Vec<u8>) -> Self {
        Self { round, data }
    }

    /// Returns the beacon round number.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// The signature of message H(prev_round, prev_round.data, round).
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Serialize for BeaconEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.round, serde_bytes::Bytes::new(&self.data)).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BeaconEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (round, data): (u64, ByteBuf) = Deserialize::deserialize(deserializer)?;
        Ok(Self {
            round,
            data: data.into_vec(),
        })
    }
}

/// Header of a block.
///
/// The CID is computed once, at construction, over the header's DAG-CBOR
/// form; every lookup table in the indexer is keyed by it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    miner_address: crate::address::Address,
    ticket: Ticket,
    election_proof: Option<ElectionProof>,
    beacon_entries: Vec<BeaconEntry>,
    parents: TipsetKeys,
    weight: BigInt,
    epoch: ChainEpoch,
    state_root: Cid,
    message_receipts: Cid,
    messages: Cid,
    timestamp: u64,
    fork_signal: u64,
    parent_base_fee: TokenAmount,

    cid: Cid,
}

impl BlockHeader {
    pub fn builder() -> BlockHeaderBuilder {
        BlockHeaderBuilder::default()
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn miner_address(&self) -> &crate::address::Address {
        &self.miner_address
    }

    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    pub fn election_proof(&self) -> Option<&ElectionProof> {
        self.election_proof.as_ref()
    }

    /// Number of election wins, zero when the proof is absent.
    pub fn win_count(&self) -> i64 {
        self.election_proof.as_ref().map_or(0, |e| e.win_count)
    }

    pub fn beacon_entries(&self) -> &[BeaconEntry] {
        &self.beacon_entries
    }

    pub fn parents(&self) -> &TipsetKeys {
        &self.parents
    }

    pub fn weight(&self) -> &BigInt {
        &self.weight
    }

    pub fn epoch(&self) -> ChainEpoch {
        self.epoch
    }

    /// CID of the state tree after calculating the parent tipset.
    pub fn state_root(&self) -> &Cid {
        &self.state_root
    }

    /// CID of the receipts of the parent tipset's messages.
    pub fn message_receipts(&self) -> &Cid {
        &self.message_receipts
    }

    /// CID of the meta object linking this block's messages.
    pub fn messages(&self) -> &Cid {
        &self.messages
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn fork_signal(&self) -> u64 {
        self.fork_signal
    }

    pub fn parent_base_fee(&self) -> &TokenAmount {
        &self.parent_base_fee
    }
}

impl Serialize for BlockHeader {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.miner_address,
            &self.ticket,
            &self.election_proof,
            &self.beacon_entries,
            &self.parents,
            BigIntSer(&self.weight),
            &self.epoch,
            &self.state_root,
            &self.message_receipts,
            &self.messages,
            &self.timestamp,
            &self.fork_signal,
            BigIntSer(&self.parent_base_fee),
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BlockHeader {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (
            miner_address,
            ticket,
            election_proof,
            beacon_entries,
            parents,
            BigIntDe(weight),
            epoch,
            state_root,
            message_receipts,
            messages,
            timestamp,
            fork_signal,
            BigIntDe(parent_base_fee),
        ) = Deserialize::deserialize(deserializer)?;

        BlockHeader::builder()
            .miner_address(miner_address)
            .ticket(ticket)
            .election_proof(election_proof)
            .beacon_entries(beacon_entries)
            .parents(parents)
            .weight(weight)
            .epoch(epoch)
            .state_root(state_root)
            .message_receipts(message_receipts)
            .messages(messages)
            .timestamp(timestamp)
            .fork_signal(fork_signal)
            .parent_base_fee(parent_base_fee)
            .build()
            .map_err(serde::de::Error::custom)
    }
}

impl crate::encoding::Cbor for BlockHeader {}

/// Builder for [`BlockHeader`]; `build` seals the header and computes its CID.
#[derive(Default)]
pub struct BlockHeaderBuilder {
    miner_address: crate::address::Address,
    ticket: Ticket,
    election_proof: Option<ElectionProof>,
    beacon_entries: Vec<BeaconEntry>,
    parents: TipsetKeys,
    weight: BigInt,
    epoch: ChainEpoch,
    state_root: Cid,
    message_receipts: Cid,
    messages: Cid,
    timestamp: u64,
    fork_signal: u64,
    parent_base_fee: TokenAmount,
}

macro_rules! setter {
    ($field:ident: $ty:ty) => {
        pub fn $field(mut self, $field: $ty) -> Self {
            self.$field = $field;
            self
        }
    };
}

impl BlockHeaderBuilder {
    setter!(miner_address: crate::address::Address);
    setter!(ticket: Ticket);
    setter!(election_proof: Option<ElectionProof>);
    setter!(beacon_entries: Vec<BeaconEntry>);
    setter!(parents: TipsetKeys);
    setter!(weight: BigInt);
    setter!(epoch: ChainEpoch);
    setter!(state_root: Cid);
    setter!(message_receipts: Cid);
    setter!(messages: Cid);
    setter!(timestamp: u64);
    setter!(fork_signal: u64);
    setter!(parent_base_fee: TokenAmount);

    pub fn build(self) -> Result<BlockHeader, Error> {
        let mut header = BlockHeader {
            miner_address: self.miner_address,
            ticket: self.ticket,
            election_proof: self.election_proof,
            beacon_entries: self.beacon_entries,
            parents: self.parents,
            weight: self.weight,
            epoch: self.epoch,
            state_root: self.state_root,
            message_receipts: self.message_receipts,
            messages: self.messages,
            timestamp: self.timestamp,
            fork_signal: self.fork_signal,
            parent_base_fee: self.parent_base_fee,
            cid: Cid::default(),
        };
        let bz = encoding::to_vec(&header)?;
        header.cid = encoding::cid_from_cbor(&bz);
        Ok(header)
    }
}
