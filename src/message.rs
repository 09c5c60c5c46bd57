// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;

use crate::address::Address;
use crate::bigint::bigint_ser::{BigIntDe, BigIntSer};
use crate::bigint::TokenAmount;
use crate::encoding::{self, Cbor};

/// Method number of a message invocation. Method 0 is a bare value transfer.
pub type MethodNum = u64;

pub const METHOD_SEND: MethodNum = 0;
pub const METHOD_CONSTRUCTOR: MethodNum = 1;

/// An unsigned VM message carrying all data needed for a state transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub from: Address,
    pub to: Address,
    pub sequence: u64,
    pub value: TokenAmount,
    pub method_num: MethodNum,
    pub params: Vec<u8>,
    pub gas_limit: i64,
    pub gas_fee_cap: TokenAmount,
    pub gas_premium: TokenAmount,
}

impl Message {
    pub fn cid(&self) -> Result<Cid, encoding::Error> {
        Cbor::cid(self)
    }

    /// Size of the encoded message in bytes.
    pub fn size(&self) -> Result<usize, encoding::Error> {
        Ok(self.marshal_cbor()?.len())
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.from,
            &self.to,
            self.sequence,
            BigIntSer(&self.value),
            self.method_num,
            serde_bytes::Bytes::new(&self.params),
            self.gas_limit,
            BigIntSer(&self.gas_fee_cap),
            BigIntSer(&self.gas_premium),
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (
            from,
            to,
            sequence,
            BigIntDe(value),
            method_num,
            params,
            gas_limit,
            BigIntDe(gas_fee_cap),
            BigIntDe(gas_premium),
        ): (_, _, _, _, _, ByteBuf, _, _, _) = Deserialize::deserialize(deserializer)?;
        Ok(Message {
            from,
            to,
            sequence,
            value,
            method_num,
            params: params.into_vec(),
            gas_limit,
            gas_fee_cap,
            gas_premium,
        })
    }
}

impl Cbor for Message {}

/// Exit code of a message execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExitCode(pub i64);

impl ExitCode {
    pub const OK: ExitCode = ExitCode(0);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receipt of an executed message, found in the child tipset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Receipt {
    pub exit_code: ExitCode,
    pub return_data: Vec<u8>,
    pub gas_used: i64,
}

impl Serialize for Receipt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.exit_code,
            serde_bytes::Bytes::new(&self.return_data),
            self.gas_used,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Receipt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (exit_code, return_data, gas_used): (ExitCode, ByteBuf, i64) =
            Deserialize::deserialize(deserializer)?;
        Ok(Receipt {
            exit_code,
            return_data: return_data.into_vec(),
            gas_used,
        })
    }
}

impl Cbor for Receipt {}

/// Meta object a block header's `messages` CID links to, partitioning the
/// block's messages by signature scheme. BLS messages execute before Secp
/// messages within a block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgMeta {
    pub bls_messages: Vec<Cid>,
    pub secp_messages: Vec<Cid>,
}

impl Cbor for MsgMeta {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bigint::BigInt;

    fn message(seq: u64) -> Message {
        Message {
            from: Address::new_id(100),
            to: Address::new_id(200),
            sequence: seq,
            value: BigInt::from(42),
            method_num: METHOD_SEND,
            params: vec![1, 2, 3],
            gas_limit: 1_000_000,
            gas_fee_cap: BigInt::from(101),
            gas_premium: BigInt::from(5),
        }
    }

    #[test]
    fn message_cbor_round_trip() {
        let m = message(7);
        let bz = m.marshal_cbor().unwrap();
        let back = Message::unmarshal_cbor(&bz).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.cid().unwrap(), m.cid().unwrap());
    }

    #[test]
    fn distinct_messages_have_distinct_cids() {
        assert_ne!(message(1).cid().unwrap(), message(2).cid().unwrap());
    }

    #[test]
    fn receipt_round_trip() {
        let r = Receipt {
            exit_code: ExitCode(0),
            return_data: vec![0x82, 0x01, 0x02],
            gas_used: 4321,
        };
        let back = Receipt::unmarshal_cbor(&r.marshal_cbor().unwrap()).unwrap();
        assert_eq!(back, r);
        assert!(back.exit_code.is_success());
    }
}
