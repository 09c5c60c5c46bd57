// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{BlockHeader, Error};
use crate::clock::ChainEpoch;

/// A set of CIDs forming a unique key for a tipset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TipsetKeys {
    pub cids: Vec<Cid>,
}

impl TipsetKeys {
    pub fn new(cids: Vec<Cid>) -> Self {
        Self { cids }
    }

    pub fn cids(&self) -> &[Cid] {
        &self.cids
    }

    pub fn is_empty(&self) -> bool {
        self.cids.is_empty()
    }
}

impl std::fmt::Display for TipsetKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let strings: Vec<String> = self.cids.iter().map(|c| c.to_string()).collect();
        write!(f, "{{{}}}", strings.join(","))
    }
}

impl Serialize for TipsetKeys {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.cids.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TipsetKeys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let cids: Vec<Cid> = Deserialize::deserialize(deserializer)?;
        Ok(TipsetKeys { cids })
    }
}

/// An immutable set of blocks at the same height with the same parent set.
/// Blocks in a tipset are canonically ordered by ticket, ties broken by CID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tipset {
    blocks: Vec<BlockHeader>,
    key: TipsetKeys,
}

#[allow(clippy::len_without_is_empty)]
impl Tipset {
    /// Builds a new tipset from a collection of blocks. A valid tipset is a
    /// non-empty collection whose blocks all specify identical epoch,
    /// parents, weight and state root.
    pub fn new(headers: Vec<BlockHeader>) -> Result<Self, Error> {
        let first = headers.first().ok_or(Error::NoBlocks)?.clone();

        for header in &headers[1..] {
            if header.parents() != first.parents() {
                return Err(Error::InvalidTipset("parent cids are not equal".into()));
            }
            if header.epoch() != first.epoch() {
                return Err(Error::InvalidTipset("epochs are not equal".into()));
            }
            if header.weight() != first.weight() {
                return Err(Error::InvalidTipset("weights are not equal".into()));
            }
            if header.state_root() != first.state_root() {
                return Err(Error::InvalidTipset("state roots are not equal".into()));
            }
            if header.message_receipts() != first.message_receipts() {
                return Err(Error::InvalidTipset(
                    "message receipts are not equal".into(),
                ));
            }
        }

        let mut sorted = headers;
        sorted.sort_by(|a, b| {
            a.ticket()
                .cmp(b.ticket())
                .then_with(|| a.cid().to_bytes().cmp(&b.cid().to_bytes()))
        });

        let key = TipsetKeys::new(sorted.iter().map(|h| *h.cid()).collect());
        Ok(Self {
            blocks: sorted,
            key,
        })
    }

    /// Returns the epoch (height) of the tipset.
    pub fn epoch(&self) -> ChainEpoch {
        self.blocks[0].epoch()
    }

    pub fn blocks(&self) -> &[BlockHeader] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn key(&self) -> &TipsetKeys {
        &self.key
    }

    pub fn cids(&self) -> &[Cid] {
        self.key.cids()
    }

    /// The CIDs of the parents of the blocks in the tipset.
    pub fn parents(&self) -> &TipsetKeys {
        self.blocks[0].parents()
    }

    /// The state root after executing the parent tipset.
    pub fn parent_state(&self) -> &Cid {
        self.blocks[0].state_root()
    }

    pub fn weight(&self) -> &crate::bigint::BigInt {
        self.blocks[0].weight()
    }

    /// The smallest timestamp of all blocks in the tipset.
    pub fn min_timestamp(&self) -> u64 {
        self.blocks
            .iter()
            .map(BlockHeader::timestamp)
            .min()
            .unwrap_or_default()
    }

    /// The first block's parent base fee; identical for every block in a
    /// valid tipset.
    pub fn parent_base_fee(&self) -> &crate::bigint::TokenAmount {
        self.blocks[0].parent_base_fee()
    }

    /// Genesis is the only tipset without parents.
    pub fn is_genesis(&self) -> bool {
        self.epoch() == 0 && self.parents().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::blocks::Ticket;
    use crate::encoding;

    fn header(epoch: ChainEpoch, miner: u64, ticket: &[u8], parents: TipsetKeys) -> BlockHeader {
        BlockHeader::builder()
            .epoch(epoch)
            .miner_address(Address::new_id(miner))
            .ticket(Ticket::new(ticket.to_vec()))
            .parents(parents)
            .build()
            .unwrap()
    }

    #[test]
    fn rejects_empty_tipset() {
        assert_eq!(Tipset::new(vec![]), Err(Error::NoBlocks));
    }

    #[test]
    fn rejects_mismatched_epochs() {
        let parents = TipsetKeys::new(vec![encoding::cid_from_cbor(b"parent")]);
        let a = header(1, 0, b"a", parents.clone());
        let b = header(2, 1, b"b", parents);
        let err = Tipset::new(vec![a, b]).unwrap_err();
        assert!(matches!(err, Error::InvalidTipset(_)));
    }

    #[test]
    fn orders_blocks_by_ticket() {
        let parents = TipsetKeys::new(vec![encoding::cid_from_cbor(b"parent")]);
        let low = header(5, 0, &[9, 9], parents.clone());
        let high = header(5, 1, &[1, 1], parents);

        let ts = Tipset::new(vec![low.clone(), high.clone()]).unwrap();
        assert_eq!(ts.blocks()[0].cid(), high.cid());
        assert_eq!(ts.blocks()[1].cid(), low.cid());
        assert_eq!(ts.len(), 2);
        assert_eq!(ts.key().cids(), &[*high.cid(), *low.cid()]);
    }

    #[test]
    fn genesis_detection() {
        let genesis = header(0, 0, b"genesis", TipsetKeys::default());
        assert!(Tipset::new(vec![genesis]).unwrap().is_genesis());

        let parents = TipsetKeys::new(vec![encoding::cid_from_cbor(b"parent")]);
        let child = header(1, 0, b"child", parents);
        assert!(!Tipset::new(vec![child]).unwrap().is_genesis());
    }
}
