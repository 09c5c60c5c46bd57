// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use ahash::AHashMap;
use cid::Cid;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::encoding;

#[derive(Debug, Error)]
pub enum Error {
    #[error("ipld object {0} not found")]
    NotFound(Cid),
    #[error("ipld store: {0}")]
    Store(String),
    #[error(transparent)]
    Encoding(#[from] encoding::Error),
}

/// Read/write access to raw IPLD blocks keyed by CID. Implementations must be
/// safe for concurrent use from every extraction task.
pub trait IpldStore: Send + Sync {
    fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>, Error>;

    fn put(&self, bytes: Vec<u8>) -> Result<Cid, Error>;
}

/// Typed CBOR helpers layered over any [`IpldStore`].
pub trait IpldStoreExt: IpldStore {
    fn get_obj<T: DeserializeOwned>(&self, cid: &Cid) -> Result<Option<T>, Error> {
        match self.get(cid)? {
            Some(bz) => Ok(Some(encoding::from_slice(&bz)?)),
            None => Ok(None),
        }
    }

    /// Like [`IpldStoreExt::get_obj`] but treats a missing block as an error.
    fn get_obj_required<T: DeserializeOwned>(&self, cid: &Cid) -> Result<T, Error> {
        self.get_obj(cid)?.ok_or(Error::NotFound(*cid))
    }

    fn put_obj<T: Serialize>(&self, value: &T) -> Result<Cid, Error> {
        self.put(encoding::to_vec(value)?)
    }
}

impl<T: IpldStore + ?Sized> IpldStoreExt for T {}

/// A thread-safe, in-memory IPLD store.
#[derive(Default)]
pub struct MemoryStore {
    blocks: RwLock<AHashMap<Cid, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

impl IpldStore for MemoryStore {
    fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.blocks.read().get(cid).cloned())
    }

    fn put(&self, bytes: Vec<u8>) -> Result<Cid, Error> {
        let cid = encoding::cid_from_cbor(&bytes);
        self.blocks.write().insert(cid, bytes);
        Ok(cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        let cid = store.put_obj(&(7u64, "payload")).unwrap();
        let (n, s): (u64, String) = store.get_obj_required(&cid).unwrap();
        assert_eq!((n, s.as_str()), (7, "payload"));

        let missing = encoding::cid_from_cbor(b"nothing");
        assert!(store.get_obj::<u64>(&missing).unwrap().is_none());
    }
}
