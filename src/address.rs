// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Network prefix an address is valid for.
pub const NETWORK_PREFIX: char = 'f';

/// Address errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("unknown address protocol")]
    UnknownProtocol,
    #[error("invalid address payload: {0}")]
    InvalidPayload(String),
    #[error("invalid address network")]
    InvalidNetwork,
}

/// An actor address: either a compact ID assigned by the init actor or a
/// robust (key- or hash-derived) address. The textual form is canonical and
/// is what the relational models persist.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Address {
    /// ID address, rendered as `f0<id>`.
    Id(u64),
    /// Robust address payload, rendered as `f<protocol payload>`.
    Robust(String),
}

impl Address {
    /// Creates an ID address.
    pub const fn new_id(id: u64) -> Self {
        Address::Id(id)
    }

    /// Creates a robust address from its textual payload (everything after
    /// the network prefix).
    pub fn new_robust(payload: impl Into<String>) -> Result<Self, Error> {
        let payload = payload.into();
        if payload.is_empty() || payload.starts_with('0') {
            return Err(Error::InvalidPayload(payload));
        }
        Ok(Address::Robust(payload))
    }

    /// Returns the actor ID when this is an ID address.
    pub fn id(&self) -> Option<u64> {
        match self {
            Address::Id(id) => Some(*id),
            Address::Robust(_) => None,
        }
    }

    pub fn is_id(&self) -> bool {
        matches!(self, Address::Id(_))
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::Id(0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Id(id) => write!(f, "{}0{}", NETWORK_PREFIX, id),
            Address::Robust(payload) => write!(f, "{}{}", NETWORK_PREFIX, payload),
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        if chars.next() != Some(NETWORK_PREFIX) {
            return Err(Error::InvalidNetwork);
        }
        let rest = chars.as_str();
        if rest.is_empty() {
            return Err(Error::UnknownProtocol);
        }
        if let Some(id) = rest.strip_prefix('0') {
            let id = id
                .parse::<u64>()
                .map_err(|e| Error::InvalidPayload(e.to_string()))?;
            return Ok(Address::Id(id));
        }
        Address::new_robust(rest)
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
