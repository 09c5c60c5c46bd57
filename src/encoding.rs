// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Multicodec for DAG-CBOR, the codec every chain object is addressed under.
pub const DAG_CBOR: u64 = 0x71;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cbor encode: {0}")]
    Encode(String),
    #[error("cbor decode: {0}")]
    Decode(String),
}

/// Encodes a value as CBOR bytes.
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    serde_cbor::to_vec(value).map_err(|e| Error::Encode(e.to_string()))
}

/// Decodes a value from CBOR bytes.
pub fn from_slice<T: DeserializeOwned>(bz: &[u8]) -> Result<T, Error> {
    serde_cbor::from_slice(bz).map_err(|e| Error::Decode(e.to_string()))
}

/// Computes the DAG-CBOR content identifier for raw encoded bytes.
pub fn cid_from_cbor(bz: &[u8]) -> Cid {
    Cid::new_v1(DAG_CBOR, Code::Sha2_256.digest(bz))
}

/// Content-addressable CBOR encoding, implemented by chain objects.
pub trait Cbor: Serialize + DeserializeOwned {
    fn marshal_cbor(&self) -> Result<Vec<u8>, Error> {
        to_vec(self)
    }

    fn unmarshal_cbor(bz: &[u8]) -> Result<Self, Error> {
        from_slice(bz)
    }

    /// CID of the object's encoded form.
    fn cid(&self) -> Result<Cid, Error> {
        Ok(cid_from_cbor(&self.marshal_cbor()?))
    }
}
