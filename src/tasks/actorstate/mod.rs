// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Extraction of domain rows from actors whose state changed between the
//! parent and the visited tipset. Extractors are registered per actor
//! family by the composition root; an unknown code CID is reported and
//! skipped.

mod init;
mod market;
mod miner;
mod multisig;
mod power;
mod reward;

pub use init::InitExtractor;
pub use market::MarketExtractor;
pub use miner::MinerExtractor;
pub use multisig::MultisigExtractor;
pub use power::PowerExtractor;
pub use reward::RewardExtractor;

use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use super::{Cancel, ReportDraft, TaskError, TaskInputs, TaskKind, TaskOutput, TipSetProcessor};
use crate::actors::{ActorFamily, ActorRegistry};
use crate::address::Address;
use crate::ipld::IpldStore;
use crate::model::{Persistable, PersistableList};
use crate::state_tree::ActorState;

/// A changed actor handed to an extractor, with the height and state root
/// its rows are tagged with.
pub struct ActorInfo {
    pub address: Address,
    pub actor: ActorState,
    pub height: i64,
    pub state_root: String,
}

/// Extracts domain rows from one actor's state head.
pub trait ActorStateExtractor: Send + Sync {
    fn extract(
        &self,
        info: &ActorInfo,
        store: &dyn IpldStore,
        registry: &ActorRegistry,
    ) -> anyhow::Result<Box<dyn Persistable>>;
}

/// Registry of extractors, dispatched on actor family. Built at startup by
/// the composition root rather than by import side effects.
#[derive(Default)]
pub struct ActorExtractorRegistry {
    extractors: AHashMap<ActorFamily, Arc<dyn ActorStateExtractor>>,
}

impl ActorExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default extractor set.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(ActorFamily::Reward, RewardExtractor);
        reg.register(ActorFamily::Power, PowerExtractor);
        reg.register(ActorFamily::Miner, MinerExtractor);
        reg.register(ActorFamily::Market, MarketExtractor);
        reg.register(ActorFamily::Init, InitExtractor);
        reg.register(ActorFamily::Multisig, MultisigExtractor);
        reg.register(ActorFamily::Account, RawActorExtractor);
        reg.register(ActorFamily::System, RawActorExtractor);
        reg.register(ActorFamily::Cron, RawActorExtractor);
        reg.register(ActorFamily::Verifreg, RawActorExtractor);
        reg
    }

    pub fn register(&mut self, family: ActorFamily, extractor: impl ActorStateExtractor + 'static) {
        self.extractors.insert(family, Arc::new(extractor));
    }

    pub fn get(&self, family: ActorFamily) -> Option<&Arc<dyn ActorStateExtractor>> {
        self.extractors.get(&family)
    }
}

/// Dispatches each changed actor to the extractor for its code CID.
pub struct ActorStatesProcessor {
    registry: Arc<ActorRegistry>,
    extractors: Arc<ActorExtractorRegistry>,
}

impl ActorStatesProcessor {
    pub fn new(registry: Arc<ActorRegistry>, extractors: Arc<ActorExtractorRegistry>) -> Self {
        Self {
            registry,
            extractors,
        }
    }
}

#[async_trait]
impl TipSetProcessor for ActorStatesProcessor {
    fn name(&self) -> &'static str {
        super::ACTOR_STATES_TASK
    }

    fn kind(&self) -> TaskKind {
        TaskKind::ActorStates
    }

    async fn process(&self, cancel: &Cancel, inputs: &TaskInputs) -> Result<TaskOutput, TaskError> {
        let pts = inputs.pts()?;
        let actors = inputs.actors()?;

        let mut errors = Vec::new();
        let mut data = PersistableList::new();

        for (address, actor) in actors.iter() {
            cancel.check()?;

            let family = match self.registry.lookup(&actor.code) {
                Some((family, _)) => family,
                None => {
                    warn!(address = %address, code = %actor.code, "unknown actor code");
                    errors.push(json!({
                        "addr": address.to_string(),
                        "error": format!("unknown actor code {}", actor.code),
                    }));
                    continue;
                }
            };

            let Some(extractor) = self.extractors.get(family) else {
                warn!(address = %address, family = %family, "no extractor for actor family");
                continue;
            };

            let info = ActorInfo {
                address: address.clone(),
                actor: actor.clone(),
                height: pts.epoch(),
                state_root: pts.parent_state().to_string(),
            };

            match extractor.extract(&info, inputs.store.as_ref(), &self.registry) {
                Ok(p) => {
                    data.0.push(p);
                }
                Err(e) => {
                    errors.push(json!({
                        "addr": address.to_string(),
                        "error": e.to_string(),
                    }));
                }
            }
        }

        let report =
            ReportDraft::ok(pts.epoch(), pts.parent_state().to_string()).with_errors(errors);
        Ok(TaskOutput::new(data, report))
    }
}

/// Fallback extractor recording the bare actor row plus a JSON dump of its
/// state head.
pub struct RawActorExtractor;

impl ActorStateExtractor for RawActorExtractor {
    fn extract(
        &self,
        info: &ActorInfo,
        store: &dyn IpldStore,
        _registry: &ActorRegistry,
    ) -> anyhow::Result<Box<dyn Persistable>> {
        let actor_row = crate::model::actors::Actor {
            height: info.height,
            id: info.address.to_string(),
            state_root: info.state_root.clone(),
            code: info.actor.code.to_string(),
            head: info.actor.state.to_string(),
            balance: info.actor.balance.to_string(),
            nonce: info.actor.sequence as i64,
        };

        let state = match store.get(&info.actor.state)? {
            Some(bz) => serde_cbor::from_slice::<serde_cbor::Value>(&bz)
                .ok()
                .map(crate::node::messages::cbor_to_json),
            None => None,
        };
        let state_row = crate::model::actors::ActorState {
            height: info.height,
            head: info.actor.state.to_string(),
            code: info.actor.code.to_string(),
            state_root: info.state_root.clone(),
            state,
        };

        let mut list = PersistableList::new();
        list.add(actor_row);
        list.add(state_row);
        Ok(Box::new(list))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::actors::{multisig, reward, FilterEstimate};
    use crate::bigint::BigInt;
    use crate::ipld::IpldStoreExt;
    use crate::node::NodeApi;
    use crate::state_tree::ActorState;
    use crate::storage::Storage;
    use crate::tasks::TaskInputs;
    use crate::testutil::{ChainBuilder, MemoryStorage};

    fn reward_actor(b: &ChainBuilder, epoch_reward: i64) -> ActorState {
        let head = b
            .store()
            .put_obj(&reward::StateRepr {
                cumsum_baseline: BigInt::from(10),
                cumsum_realized: BigInt::from(9),
                effective_network_time: 4,
                effective_baseline_power: BigInt::from(1i64 << 40),
                this_epoch_reward: BigInt::from(epoch_reward),
                this_epoch_reward_smoothed: FilterEstimate {
                    position: BigInt::from(3),
                    velocity: BigInt::from(1),
                },
                this_epoch_baseline_power: BigInt::from(1i64 << 39),
                total_storage_power_reward: BigInt::from(1000),
            })
            .unwrap();
        ActorState::new(
            b.registry()
                .code_for(crate::actors::ActorFamily::Reward, 0)
                .unwrap(),
            head,
            BigInt::from(0),
            0,
        )
    }

    async fn run_processor(b: &ChainBuilder) -> Arc<MemoryStorage> {
        let node = b.node();
        let ts = b.tipset_at(2).unwrap();
        let pts = b.tipset_at(1).unwrap();
        let changed = node
            .state_changed_actors(pts.parent_state(), ts.parent_state())
            .await
            .unwrap();

        let inputs = TaskInputs {
            ts,
            pts: Some(pts),
            store: node.store(),
            messages: None,
            actors: Some(Arc::new(changed)),
        };

        let processor =
            ActorStatesProcessor::new(b.registry(), Arc::new(ActorExtractorRegistry::with_defaults()));
        let output = processor
            .process(&Cancel::new(), &inputs)
            .await
            .unwrap();
        assert!(output.report.errors_detected.is_none());

        let storage = Arc::new(MemoryStorage::new());
        storage
            .persist_batch(&[output.data.as_ref().unwrap().as_ref()])
            .await
            .unwrap();
        storage
    }

    /// A changed reward actor lands in `chain_rewards`, tagged with the
    /// parent pair's height and state root.
    #[tokio::test]
    async fn changed_reward_actor_is_extracted() {
        let mut b = ChainBuilder::new();
        b.set_actor(Address::new_id(2), reward_actor(&b, 500));
        b.extend(); // genesis
        b.extend(); // height 1
        b.set_actor(Address::new_id(2), reward_actor(&b, 777));
        b.extend(); // height 2 sees the change

        let storage = run_processor(&b).await;
        let rows = storage.rows("chain_rewards");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["height"], serde_json::json!(1));
        assert_eq!(rows[0]["new_reward"], serde_json::json!("777"));
        assert_eq!(rows[0]["total_mined_reward"], serde_json::json!("1000"));
    }

    /// A changed multisig's pending transactions land in
    /// `multisig_transactions`.
    #[tokio::test]
    async fn changed_multisig_is_extracted() {
        let mut b = ChainBuilder::new();
        let make_actor = |b: &ChainBuilder, txns: Vec<(i64, multisig::Transaction)>| {
            let pending = b.store().put_obj(&txns).unwrap();
            let head = b
                .store()
                .put_obj(&multisig::StateRepr {
                    signers: vec![Address::new_id(100)],
                    num_approvals_threshold: 1,
                    next_txn_id: 2,
                    initial_balance: BigInt::from(0),
                    start_epoch: 0,
                    unlock_duration: 0,
                    pending_txns: pending,
                })
                .unwrap();
            ActorState::new(
                b.registry()
                    .code_for(crate::actors::ActorFamily::Multisig, 0)
                    .unwrap(),
                head,
                BigInt::from(0),
                0,
            )
        };

        b.set_actor(Address::new_id(300), make_actor(&b, vec![]));
        b.extend();
        b.extend();
        let txn = multisig::Transaction {
            to: Address::new_id(101),
            value: BigInt::from(11),
            method: 0,
            params: vec![],
            approved: vec![],
        };
        b.set_actor(Address::new_id(300), make_actor(&b, vec![(1, txn)]));
        b.extend();

        let storage = run_processor(&b).await;
        let rows = storage.rows("multisig_transactions");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["multisig_id"], serde_json::json!("f0300"));
        assert_eq!(rows[0]["transaction_id"], serde_json::json!(1));
        assert_eq!(rows[0]["value"], serde_json::json!("11"));
    }

    /// Unknown actor codes are reported, not fatal.
    #[tokio::test]
    async fn unknown_code_is_a_row_error() {
        let mut b = ChainBuilder::new();
        b.extend();
        b.extend();
        let head = b.store().put_obj(&(1u64,)).unwrap();
        let bogus = ActorState::new(
            crate::encoding::cid_from_cbor(b"mystery actor"),
            head,
            BigInt::from(0),
            0,
        );
        b.set_actor(Address::new_id(400), bogus);
        b.extend();

        let node = b.node();
        let ts = b.tipset_at(2).unwrap();
        let pts = b.tipset_at(1).unwrap();
        let changed = node
            .state_changed_actors(pts.parent_state(), ts.parent_state())
            .await
            .unwrap();
        let inputs = TaskInputs {
            ts,
            pts: Some(pts),
            store: node.store(),
            messages: None,
            actors: Some(Arc::new(changed)),
        };
        let processor =
            ActorStatesProcessor::new(b.registry(), Arc::new(ActorExtractorRegistry::with_defaults()));
        let output = processor.process(&Cancel::new(), &inputs).await.unwrap();
        assert!(output.report.errors_detected.is_some());
    }
}
