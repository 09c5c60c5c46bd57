// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub use num_bigint::BigInt;

/// Token amounts are arbitrary-precision integers of attoFIL.
pub type TokenAmount = BigInt;

/// Serde helpers encoding a `BigInt` as a sign-prefixed big-endian byte
/// string, the chain-level wire form.
pub mod bigint_ser {
    use num_bigint::{BigInt, Sign};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_bytes::ByteBuf;

    pub fn serialize<S>(int: &BigInt, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let (sign, mag) = int.to_bytes_be();
        let mut bz = match sign {
            Sign::NoSign => Vec::new(),
            Sign::Plus => vec![0],
            Sign::Minus => vec![1],
        };
        if sign != Sign::NoSign {
            bz.extend_from_slice(&mag);
        }
        serde_bytes::Bytes::new(&bz).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BigInt, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bz = ByteBuf::deserialize(deserializer)?.into_vec();
        match bz.split_first() {
            None => Ok(BigInt::default()),
            Some((&0, mag)) => Ok(BigInt::from_bytes_be(Sign::Plus, mag)),
            Some((&1, mag)) => Ok(BigInt::from_bytes_be(Sign::Minus, mag)),
            Some(_) => Err(serde::de::Error::custom("invalid big int sign byte")),
        }
    }

    /// Wrapper for serializing a big int reference.
    pub struct BigIntSer<'a>(pub &'a BigInt);

    /// Wrapper for deserializing into a big int.
    #[derive(Deserialize)]
    #[serde(transparent)]
    pub struct BigIntDe(#[serde(with = "self")] pub BigInt);

    impl Serialize for BigIntSer<'_> {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serialize(self.0, serializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::bigint_ser::{BigIntDe, BigIntSer};
    use super::*;

    #[test]
    fn bigint_cbor_round_trip() {
        for v in [
            BigInt::from(0),
            BigInt::from(1),
            BigInt::from(-255),
            BigInt::from(1_000_000_000_000_000_000u64) * 4096,
        ] {
            let bz = serde_cbor::to_vec(&BigIntSer(&v)).unwrap();
            let BigIntDe(out) = serde_cbor::from_slice(&bz).unwrap();
            assert_eq!(out, v);
        }
    }
}
