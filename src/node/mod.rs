// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The read-only node capability the indexer consumes. Everything the core
//! knows about the chain arrives through [`NodeApi`]; implementations wrap a
//! real node transport and must be safe for concurrent use from every
//! extraction task.

pub mod gas;
pub mod messages;

use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use cid::Cid;
use thiserror::Error;

use crate::address::Address;
use crate::blocks::{Tipset, TipsetKeys};
use crate::clock::ChainEpoch;
use crate::ipld::{self, IpldStore};
use crate::message::{ExitCode, Message};
use crate::state_tree::ActorState;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("tipset {0} not found")]
    TipsetNotFound(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("state: {0}")]
    State(String),
    #[error(transparent)]
    Ipld(#[from] ipld::Error),
    #[error("encoding: {0}")]
    Encoding(#[from] crate::encoding::Error),
    #[error("{0}")]
    Other(String),
}

/// A head-change notification event.
#[derive(Clone, Debug)]
pub enum HeadChange {
    /// Delivered once per subscription with the head at subscribe time.
    Current(Arc<Tipset>),
    Apply(Arc<Tipset>),
    Revert(Arc<Tipset>),
}

/// Read capabilities of the chain node.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// The current heaviest tipset.
    async fn chain_head(&self) -> Result<Arc<Tipset>, NodeError>;

    /// Subscribes to head changes. The first batch carries a `Current`
    /// event. A dropped receiver is recovered by resubscribing.
    async fn chain_notify(&self) -> Result<flume::Receiver<Vec<HeadChange>>, NodeError>;

    async fn chain_get_tipset(&self, key: &TipsetKeys) -> Result<Arc<Tipset>, NodeError>;

    /// The canonical tipset at a height no greater than `height`, reachable
    /// from `anchor`.
    async fn chain_get_tipset_by_height(
        &self,
        height: ChainEpoch,
        anchor: &TipsetKeys,
    ) -> Result<Arc<Tipset>, NodeError>;

    /// The node's IPLD store, shared by every task.
    fn store(&self) -> Arc<dyn IpldStore>;

    /// Actors whose `(code, head)` changed between two state roots.
    async fn state_changed_actors(
        &self,
        parent_root: &Cid,
        child_root: &Cid,
    ) -> Result<AHashMap<Address, ActorState>, NodeError>;

    /// The actor as of the given tipset's parent state, or `None`.
    async fn state_get_actor(
        &self,
        addr: &Address,
        key: &TipsetKeys,
    ) -> Result<Option<ActorState>, NodeError>;

    /// Whether the network fee for a message is burned, given the state the
    /// message executed on top of.
    fn should_burn(
        &self,
        parent_state: &Cid,
        msg: &Message,
        exit_code: ExitCode,
    ) -> Result<bool, NodeError>;
}
