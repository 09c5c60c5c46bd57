// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Joins a tipset's messages with the receipts their execution produced,
//! which live in the child tipset. This is the shared input every
//! message-dependent task consumes.

use ahash::AHashMap;
use cid::Cid;
use tracing::warn;

use super::gas::{compute_gas_outputs, GasOutputs};
use super::{NodeApi, NodeError};
use crate::actors::{init, ActorRegistry};
use crate::address::Address;
use crate::blocks::{BlockHeader, Tipset};
use crate::clock::ChainEpoch;
use crate::ipld::{IpldStore, IpldStoreExt};
use crate::message::{Message, MsgMeta, Receipt};
use crate::state_tree::StateTree;

/// All messages carried by one block, partitioned by signature scheme.
#[derive(Clone, Debug)]
pub struct BlockMessages {
    pub block: BlockHeader,
    pub bls_messages: Vec<Message>,
    pub secp_messages: Vec<Message>,
}

/// A message joined with its receipt and derived gas accounting.
#[derive(Clone, Debug)]
pub struct ExecutedMessage {
    pub cid: Cid,
    /// Height the message executed at (the carrying tipset's height).
    pub height: ChainEpoch,
    pub message: Message,
    /// One block carrying the message.
    pub block_header: BlockHeader,
    /// Every block carrying the message.
    pub blocks: Vec<Cid>,
    /// Execution order within the tipset.
    pub index: u64,
    pub from_code: Cid,
    /// Missing when the receiver does not exist, e.g. a failed send to a
    /// never-initialized account.
    pub to_code: Option<Cid>,
    pub receipt: Receipt,
    pub gas_outputs: GasOutputs,
}

/// Shared per-tipset message extraction.
#[derive(Clone, Debug, Default)]
pub struct TipSetMessages {
    pub executed: Vec<ExecutedMessage>,
    pub block_messages: Vec<BlockMessages>,
}

/// Loads each block's messages through its `messages` meta object.
pub fn block_messages(
    store: &dyn IpldStore,
    ts: &Tipset,
) -> Result<Vec<BlockMessages>, NodeError> {
    let mut out = Vec::with_capacity(ts.len());
    for block in ts.blocks() {
        let meta: MsgMeta = store.get_obj_required(block.messages())?;
        let mut bls_messages = Vec::with_capacity(meta.bls_messages.len());
        for c in &meta.bls_messages {
            bls_messages.push(store.get_obj_required::<Message>(c)?);
        }
        let mut secp_messages = Vec::with_capacity(meta.secp_messages.len());
        for c in &meta.secp_messages {
            secp_messages.push(store.get_obj_required::<Message>(c)?);
        }
        out.push(BlockMessages {
            block: block.clone(),
            bls_messages,
            secp_messages,
        });
    }
    Ok(out)
}

/// Resolves an address to the code CID of its actor. Lookups consult the
/// state after the messages executed (the child's parent state), then the
/// init actor's address map there, and finally fall back to the state the
/// messages executed on top of, since the actor may have been deleted.
struct ActorCodeResolver<'a> {
    codes: AHashMap<Address, Cid>,
    init_state: Option<init::State>,
    store: &'a dyn IpldStore,
    parent_root: Cid,
}

impl<'a> ActorCodeResolver<'a> {
    fn new(
        store: &'a dyn IpldStore,
        registry: &ActorRegistry,
        child: &Tipset,
        parent: &Tipset,
    ) -> Result<Self, NodeError> {
        let child_tree = StateTree::load(store, child.parent_state())
            .map_err(|e| NodeError::State(e.to_string()))?;

        let mut codes = AHashMap::new();
        child_tree
            .for_each(|addr, actor| {
                codes.insert(addr.clone(), actor.code);
                Ok(())
            })
            .map_err(|e| NodeError::State(e.to_string()))?;

        let init_state = match child_tree.get_actor(&crate::actors::builtin_addr::INIT) {
            Some(actor) => match init::State::load(registry, store, actor) {
                Ok(st) => Some(st),
                Err(e) => {
                    warn!(error = %e, "failed to load init actor state");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            codes,
            init_state,
            store,
            parent_root: *parent.parent_state(),
        })
    }

    fn resolve(&self, addr: &Address) -> Option<Cid> {
        if let Some(code) = self.codes.get(addr) {
            return Some(*code);
        }

        if let Some(init_state) = &self.init_state {
            match init_state.resolve_address(self.store, addr) {
                Ok(Some(resolved)) => {
                    if let Some(code) = self.codes.get(&resolved) {
                        return Some(*code);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(address = %addr, error = %e, "failed to resolve actor address");
                }
            }
        }

        // The actor may have been deleted during execution.
        let parent_tree = match StateTree::load(self.store, &self.parent_root) {
            Ok(tree) => tree,
            Err(e) => {
                warn!(error = %e, "failed to load fallback state tree");
                return None;
            }
        };
        parent_tree.get_actor(addr).map(|a| a.code)
    }
}

/// Builds the executed-message list for `parent`, whose receipts live in
/// `child`. Execution order is fixed by walking the parent's blocks in
/// tipset order, BLS messages before Secp messages, with duplicates applied
/// once at their first appearance.
pub async fn executed_and_block_messages(
    node: &dyn NodeApi,
    registry: &ActorRegistry,
    child: &Tipset,
    parent: &Tipset,
) -> Result<TipSetMessages, NodeError> {
    if child.parents() != parent.key() {
        return Err(NodeError::Other(format!(
            "child tipset {} is not on the same chain as parent {}",
            child.key(),
            parent.key()
        )));
    }

    let store = node.store();
    let bmsgs = block_messages(store.as_ref(), parent)?;
    let resolver = ActorCodeResolver::new(store.as_ref(), registry, child, parent)?;

    // Which blocks carry each message, in parent block order.
    let mut message_blocks: AHashMap<Cid, Vec<Cid>> = AHashMap::new();
    for bm in &bmsgs {
        for msg in bm.bls_messages.iter().chain(bm.secp_messages.iter()) {
            let mcid = msg.cid()?;
            message_blocks.entry(mcid).or_default().push(*bm.block.cid());
        }
    }

    let mut executed = Vec::new();
    let mut seen = ahash::AHashSet::new();
    let mut index = 0u64;
    for bm in &bmsgs {
        for msg in bm.bls_messages.iter().chain(bm.secp_messages.iter()) {
            let mcid = msg.cid()?;
            if !seen.insert(mcid) {
                continue;
            }

            let to_code = resolver.resolve(&msg.to);
            if to_code.is_none() {
                // Expected when e.g. the message ran out of gas before the
                // receiver could be created.
                warn!(height = parent.epoch(), message = %mcid, actor = %msg.to, "failed to find to actor");
            }
            // The sender must always resolve.
            let from_code = resolver.resolve(&msg.from).ok_or_else(|| {
                NodeError::State(format!(
                    "failed to find from actor {} height {} message {}",
                    msg.from,
                    parent.epoch(),
                    mcid
                ))
            })?;

            executed.push(ExecutedMessage {
                cid: mcid,
                height: parent.epoch(),
                message: msg.clone(),
                block_header: bm.block.clone(),
                blocks: message_blocks.get(&mcid).cloned().unwrap_or_default(),
                index,
                from_code,
                to_code,
                receipt: Receipt::default(),
                gas_outputs: GasOutputs::default(),
            });
            index += 1;
        }
    }

    // Receipts live in the child, in execution order.
    let receipts: Vec<Receipt> =
        store.get_obj_required(child.blocks()[0].message_receipts())?;
    if receipts.len() != executed.len() {
        return Err(NodeError::Other(format!(
            "mismatching number of receipts: got {} wanted {}",
            receipts.len(),
            executed.len()
        )));
    }

    for (em, receipt) in executed.iter_mut().zip(receipts) {
        em.receipt = receipt;
        let burn = node.should_burn(parent.parent_state(), &em.message, em.receipt.exit_code)?;
        em.gas_outputs = compute_gas_outputs(
            em.receipt.gas_used,
            em.message.gas_limit,
            em.block_header.parent_base_fee(),
            &em.message.gas_fee_cap,
            &em.message.gas_premium,
            burn,
        );
    }

    Ok(TipSetMessages {
        executed,
        block_messages: block_messages(store.as_ref(), child)?,
    })
}

/// Decodes a message's parameters into a method name and a JSON rendering.
/// NUL bytes are stripped and invalid UTF-8 is replaced so the result is
/// storable as a JSON column.
pub fn method_and_params(
    registry: &ActorRegistry,
    msg: &Message,
    to_code: &Cid,
) -> Result<(String, String), NodeError> {
    let (family, _) = registry.lookup(to_code).ok_or_else(|| {
        NodeError::Other(format!("unknown actor code {}", to_code))
    })?;

    let method = crate::actors::method_name(family, msg.method_num).ok_or_else(|| {
        NodeError::Other(format!(
            "unknown method for actor type {}: {}",
            family, msg.method_num
        ))
    })?;

    if msg.params.is_empty() {
        return Ok((method.to_string(), String::new()));
    }

    let value: serde_cbor::Value = serde_cbor::from_slice(&msg.params)
        .map_err(|e| NodeError::Other(format!("failed to parse parameters: {}", e)))?;
    let json = cbor_to_json(value);
    let encoded = serde_json::to_string(&json)
        .map_err(|e| NodeError::Other(format!("json encode message params: {}", e)))?;
    Ok((method.to_string(), encoded))
}

fn sanitize(s: String) -> String {
    s.replace('\u{0}', "")
}

/// Generic CBOR to JSON conversion for storable renderings of chain data.
pub fn cbor_to_json(value: serde_cbor::Value) -> serde_json::Value {
    use serde_cbor::Value as Cbor;
    use serde_json::Value as Json;

    match value {
        Cbor::Null => Json::Null,
        Cbor::Bool(b) => Json::Bool(b),
        Cbor::Integer(i) => serde_json::Number::from_f64(i as f64)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Cbor::Float(f) => serde_json::Number::from_f64(f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Cbor::Bytes(b) => Json::String(sanitize(String::from_utf8_lossy(&b).into_owned())),
        Cbor::Text(t) => Json::String(sanitize(t)),
        Cbor::Array(items) => Json::Array(items.into_iter().map(cbor_to_json).collect()),
        Cbor::Map(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                let key = match k {
                    Cbor::Text(t) => sanitize(t),
                    other => sanitize(format!("{:?}", other)),
                };
                out.insert(key, cbor_to_json(v));
            }
            Json::Object(out)
        }
        Cbor::Tag(_, inner) => cbor_to_json(*inner),
        _ => Json::Null,
    }
}
