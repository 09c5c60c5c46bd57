// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Test fixtures: a deterministic synthetic chain, an in-process node API
//! over it, and an in-memory storage with the production upsert semantics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cid::Cid;
use parking_lot::{Mutex, RwLock};

use crate::actors::ActorRegistry;
use crate::address::Address;
use crate::bigint::BigInt;
use crate::blocks::{BeaconEntry, BlockHeader, Ticket, Tipset, TipsetKeys};
use crate::chain::Clock;
use crate::clock::ChainEpoch;
use crate::encoding;
use crate::ipld::{self, IpldStore, IpldStoreExt, MemoryStore};
use crate::message::{ExitCode, Message, MsgMeta, Receipt};
use crate::model::{ModelSpec, Persistable, StorageBatch, Value, Version};
use crate::node::{HeadChange, NodeApi, NodeError};
use crate::state_tree::{changed_actors, ActorState, StateTree};
use crate::storage::{migrations::latest_schema_version, GapSummary, ReportStatus, Storage, StorageError};

pub fn dummy_cid(seed: &[u8]) -> Cid {
    encoding::cid_from_cbor(seed)
}

/// A clock pinned to one instant so repeated runs produce identical rows.
pub struct MockClock(DateTime<Utc>);

impl MockClock {
    pub fn new() -> Self {
        Self(Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap())
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// An IPLD store with injectable read faults, for exercising partial
/// failures.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    deny: Mutex<AHashSet<Cid>>,
}

impl FaultyStore {
    pub fn deny(&self, cid: Cid) {
        self.deny.lock().insert(cid);
    }

    pub fn allow(&self, cid: &Cid) {
        self.deny.lock().remove(cid);
    }
}

impl IpldStore for FaultyStore {
    fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>, ipld::Error> {
        if self.deny.lock().contains(cid) {
            return Err(ipld::Error::Store("injected read fault".to_string()));
        }
        self.inner.get(cid)
    }

    fn put(&self, bytes: Vec<u8>) -> Result<Cid, ipld::Error> {
        self.inner.put(bytes)
    }
}

/// In-memory [`Storage`] applying the same version gating and upsert
/// semantics as the SQL batch, so driver tests run without a database.
pub struct MemoryStorage {
    pub version: Version,
    pub upsert: bool,
    tables: Mutex<BTreeMap<&'static str, BTreeMap<String, BTreeMap<String, serde_json::Value>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            version: latest_schema_version(),
            upsert: true,
            tables: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn rows(&self, table: &str) -> Vec<BTreeMap<String, serde_json::Value>> {
        self.tables
            .lock()
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, |rows| rows.len())
    }

    /// Byte-stable rendering of the whole store, for idempotence checks.
    pub fn snapshot(&self) -> String {
        serde_json::to_string(&*self.tables.lock()).expect("tables are json")
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryBatch<'a> {
    storage: &'a MemoryStorage,
    staged: Vec<(&'static str, String, BTreeMap<String, serde_json::Value>)>,
}

#[async_trait]
impl StorageBatch for MemoryBatch<'_> {
    fn version(&self) -> Version {
        self.storage.version
    }

    async fn persist_row(
        &mut self,
        spec: &'static ModelSpec,
        values: Vec<Value>,
    ) -> Result<(), StorageError> {
        let major = self.storage.version.major;
        if !spec.supported_at(major) {
            return Ok(());
        }

        let mut row = BTreeMap::new();
        let mut key_parts = Vec::new();
        for (field, value) in spec.fields.iter().zip(values.iter()) {
            if !field.included_at(major) {
                continue;
            }
            let json = value.to_json();
            if field.is_pk() {
                key_parts.push((field.column, json.clone()));
            }
            row.insert(field.column.to_string(), json);
        }
        key_parts.sort_by_key(|(c, _)| *c);
        let key = serde_json::to_string(&key_parts).expect("key is json");

        if !self.storage.upsert {
            let exists = self
                .storage
                .tables
                .lock()
                .get(spec.table)
                .map_or(false, |rows| rows.contains_key(&key));
            let staged = self
                .staged
                .iter()
                .any(|(t, k, _)| *t == spec.table && *k == key);
            if exists || staged {
                return Err(StorageError::Conflict {
                    table: spec.table.to_string(),
                });
            }
        }

        self.staged.push((spec.table, key, row));
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn persist_batch(&self, models: &[&dyn Persistable]) -> Result<(), StorageError> {
        let mut batch = MemoryBatch {
            storage: self,
            staged: Vec::new(),
        };
        for model in models {
            model.persist(&mut batch).await?;
        }
        // All rows staged without error: apply atomically.
        let mut tables = self.tables.lock();
        for (table, key, row) in batch.staged {
            tables.entry(table).or_default().insert(key, row);
        }
        Ok(())
    }

    async fn report_statuses(&self, min: i64, max: i64) -> Result<Vec<ReportStatus>, StorageError> {
        Ok(self
            .rows("visor_processing_reports")
            .into_iter()
            .filter_map(|row| {
                let height = row.get("height")?.as_i64()?;
                if height < min || height > max {
                    return None;
                }
                Some(ReportStatus {
                    height,
                    task: row.get("task")?.as_str()?.to_string(),
                    status: row.get("status")?.as_str()?.to_string(),
                })
            })
            .collect())
    }

    async fn unfilled_gaps(&self, min: i64, max: i64) -> Result<Vec<GapSummary>, StorageError> {
        Ok(self
            .rows("visor_gap_reports")
            .into_iter()
            .filter_map(|row| {
                let height = row.get("height")?.as_i64()?;
                if height < min || height > max {
                    return None;
                }
                if row.get("status")?.as_str()? != crate::model::reports::GAP_STATUS_GAP {
                    return None;
                }
                Some(GapSummary {
                    height,
                    task: row.get("task")?.as_str()?.to_string(),
                })
            })
            .collect())
    }
}

/// A message queued for the next tipset together with the receipt its
/// execution will produce in the tipset after that.
pub struct QueuedMessage {
    pub message: Message,
    pub receipt: Receipt,
}

/// Deterministic synthetic chain: tipsets, messages, receipts, state trees
/// and actor snapshots all live in one [`FaultyStore`]. The first `extend`
/// creates genesis from the current state, so genesis actors are whatever
/// was set up before it.
pub struct ChainBuilder {
    store: Arc<FaultyStore>,
    registry: Arc<ActorRegistry>,
    state: StateTree,
    tipsets: Vec<Arc<Tipset>>,
    by_key: AHashMap<TipsetKeys, Arc<Tipset>>,
    msgs_by_tipset: AHashMap<TipsetKeys, Vec<QueuedMessage>>,
    pending: Vec<QueuedMessage>,
    pub base_fee: BigInt,
    pub blocks_per_tipset: usize,
}

impl ChainBuilder {
    pub fn new() -> Self {
        let store = Arc::new(FaultyStore::default());
        let registry = Arc::new(ActorRegistry::new());

        let mut state = StateTree::empty();
        // A populated init actor plus a few accounts to send from.
        let init_map = store
            .put_obj(&Vec::<(Address, u64)>::new())
            .expect("store is writable");
        let init_head = store
            .put_obj(&crate::actors::init::StateRepr {
                address_map: init_map,
                next_id: 100,
                network_name: "testnet".to_string(),
            })
            .expect("store is writable");
        state.set_actor(
            crate::actors::builtin_addr::INIT,
            ActorState::new(
                registry
                    .code_for(crate::actors::ActorFamily::Init, 0)
                    .expect("init code registered"),
                init_head,
                BigInt::from(0),
                0,
            ),
        );
        let account_code = registry
            .code_for(crate::actors::ActorFamily::Account, 0)
            .expect("account code registered");
        for id in 100..104u64 {
            let head = store
                .put_obj(&(id, "account"))
                .expect("store is writable");
            state.set_actor(
                Address::new_id(id),
                ActorState::new(account_code, head, BigInt::from(1_000_000), 0),
            );
        }

        Self {
            store,
            registry,
            state,
            tipsets: Vec::new(),
            by_key: AHashMap::new(),
            msgs_by_tipset: AHashMap::new(),
            pending: Vec::new(),
            base_fee: BigInt::from(100),
            blocks_per_tipset: 1,
        }
    }

    pub fn store(&self) -> Arc<FaultyStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<ActorRegistry> {
        self.registry.clone()
    }

    /// Edits the state the next tipset's parent-state root will capture.
    /// Before the first `extend` this shapes the genesis state.
    pub fn set_actor(&mut self, addr: Address, actor: ActorState) -> &mut Self {
        self.state.set_actor(addr, actor);
        self
    }

    /// Queues a message for the next tipset with a default success receipt.
    pub fn with_message(&mut self, message: Message) -> &mut Self {
        let gas_used = message.gas_limit / 2;
        self.with_message_and_receipt(
            message,
            Receipt {
                exit_code: ExitCode::OK,
                return_data: Vec::new(),
                gas_used,
            },
        )
    }

    pub fn with_message_and_receipt(&mut self, message: Message, receipt: Receipt) -> &mut Self {
        self.pending.push(QueuedMessage { message, receipt });
        self
    }

    /// Appends the next tipset, one epoch after the current head.
    pub fn extend(&mut self) -> Arc<Tipset> {
        self.extend_at_offset(1)
    }

    /// Appends the next tipset after `nulls` empty rounds.
    pub fn extend_after_nulls(&mut self, nulls: i64) -> Arc<Tipset> {
        self.extend_at_offset(nulls + 1)
    }

    fn extend_at_offset(&mut self, offset: i64) -> Arc<Tipset> {
        let state_root = self.state.flush(self.store.as_ref()).expect("state flushes");

        let (height, parents, parent_weight) = match self.tipsets.last() {
            Some(parent) => (
                parent.epoch() + offset,
                parent.key().clone(),
                parent.weight().clone(),
            ),
            None => (0, TipsetKeys::default(), BigInt::from(0)),
        };

        // Receipts for the parent tipset's messages, in execution order.
        let parent_receipts: Vec<Receipt> = match self.tipsets.last() {
            Some(parent) => self
                .msgs_by_tipset
                .get(parent.key())
                .map(|msgs| msgs.iter().map(|qm| qm.receipt.clone()).collect())
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let receipts_root = self
            .store
            .put_obj(&parent_receipts)
            .expect("store is writable");

        let msgs: Vec<QueuedMessage> = std::mem::take(&mut self.pending);

        let mut headers = Vec::with_capacity(self.blocks_per_tipset);
        for block_idx in 0..self.blocks_per_tipset {
            // All queued messages ride in the first block.
            let meta = if block_idx == 0 {
                let mut cids = Vec::with_capacity(msgs.len());
                for qm in &msgs {
                    let bz = crate::encoding::to_vec(&qm.message).expect("message encodes");
                    cids.push(self.store.put(bz).expect("store is writable"));
                }
                MsgMeta {
                    bls_messages: cids,
                    secp_messages: Vec::new(),
                }
            } else {
                MsgMeta::default()
            };
            let messages_root = self.store.put_obj(&meta).expect("store is writable");

            let header = BlockHeader::builder()
                .epoch(height)
                .miner_address(Address::new_id(1000 + block_idx as u64))
                .ticket(Ticket::new(
                    [height.to_be_bytes().as_slice(), &[block_idx as u8]].concat(),
                ))
                .beacon_entries(vec![BeaconEntry::new(
                    (height * 10) as u64 + block_idx as u64,
                    vec![block_idx as u8],
                )])
                .parents(parents.clone())
                .weight(&parent_weight + 10)
                .state_root(state_root)
                .message_receipts(receipts_root)
                .messages(messages_root)
                .timestamp(1_600_000_000 + (height as u64) * 30)
                .parent_base_fee(self.base_fee.clone())
                .build()
                .expect("header builds");
            headers.push(header);
        }

        let ts = Arc::new(Tipset::new(headers).expect("tipset is valid"));
        self.by_key.insert(ts.key().clone(), ts.clone());
        self.msgs_by_tipset.insert(ts.key().clone(), msgs);
        self.tipsets.push(ts.clone());
        ts
    }

    pub fn tipsets(&self) -> &[Arc<Tipset>] {
        &self.tipsets
    }

    pub fn head(&self) -> Arc<Tipset> {
        self.tipsets.last().expect("chain has tipsets").clone()
    }

    pub fn tipset_at(&self, height: ChainEpoch) -> Option<Arc<Tipset>> {
        self.tipsets.iter().find(|ts| ts.epoch() == height).cloned()
    }

    /// An in-process node over everything built so far.
    pub fn node(&self) -> Arc<FakeNode> {
        Arc::new(FakeNode {
            store: self.store.clone(),
            tipsets: self.tipsets.clone(),
            by_key: self.by_key.clone(),
            head: RwLock::new(self.head()),
            subscribers: Mutex::new(Vec::new()),
            fail_changed_actors: AtomicBool::new(false),
            notify_failures: AtomicU32::new(0),
        })
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Node API over a [`ChainBuilder`]'s chain, with fault injection.
pub struct FakeNode {
    store: Arc<FaultyStore>,
    tipsets: Vec<Arc<Tipset>>,
    by_key: AHashMap<TipsetKeys, Arc<Tipset>>,
    head: RwLock<Arc<Tipset>>,
    subscribers: Mutex<Vec<flume::Sender<Vec<HeadChange>>>>,
    fail_changed_actors: AtomicBool,
    notify_failures: AtomicU32,
}

impl FakeNode {
    pub fn set_fail_changed_actors(&self, fail: bool) {
        self.fail_changed_actors.store(fail, Ordering::Relaxed);
    }

    /// Makes the next `n` `chain_notify` calls fail, to exercise the
    /// watcher's reconnect path.
    pub fn fail_next_subscribes(&self, n: u32) {
        self.notify_failures.store(n, Ordering::Relaxed);
    }

    /// Publishes an apply event and advances the head.
    pub fn apply_head(&self, ts: Arc<Tipset>) {
        *self.head.write() = ts.clone();
        self.publish(HeadChange::Apply(ts));
    }

    pub fn revert_head(&self, ts: Arc<Tipset>) {
        self.publish(HeadChange::Revert(ts));
    }

    fn publish(&self, event: HeadChange) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(vec![event.clone()]).is_ok());
    }
}

#[async_trait]
impl NodeApi for FakeNode {
    async fn chain_head(&self) -> Result<Arc<Tipset>, NodeError> {
        Ok(self.head.read().clone())
    }

    async fn chain_notify(&self) -> Result<flume::Receiver<Vec<HeadChange>>, NodeError> {
        let failures = self.notify_failures.load(Ordering::Relaxed);
        if failures > 0 {
            self.notify_failures.store(failures - 1, Ordering::Relaxed);
            return Err(NodeError::Transport("injected subscribe failure".into()));
        }
        let (tx, rx) = flume::unbounded();
        let _ = tx.send(vec![HeadChange::Current(self.head.read().clone())]);
        self.subscribers.lock().push(tx);
        Ok(rx)
    }

    async fn chain_get_tipset(&self, key: &TipsetKeys) -> Result<Arc<Tipset>, NodeError> {
        self.by_key
            .get(key)
            .cloned()
            .ok_or_else(|| NodeError::TipsetNotFound(key.to_string()))
    }

    async fn chain_get_tipset_by_height(
        &self,
        height: ChainEpoch,
        anchor: &TipsetKeys,
    ) -> Result<Arc<Tipset>, NodeError> {
        let anchor = self
            .by_key
            .get(anchor)
            .ok_or_else(|| NodeError::TipsetNotFound(anchor.to_string()))?;
        self.tipsets
            .iter()
            .rev()
            .find(|ts| ts.epoch() <= height && ts.epoch() <= anchor.epoch())
            .cloned()
            .ok_or_else(|| NodeError::TipsetNotFound(format!("height {}", height)))
    }

    fn store(&self) -> Arc<dyn IpldStore> {
        self.store.clone()
    }

    async fn state_changed_actors(
        &self,
        parent_root: &Cid,
        child_root: &Cid,
    ) -> Result<AHashMap<Address, ActorState>, NodeError> {
        if self.fail_changed_actors.load(Ordering::Relaxed) {
            return Err(NodeError::State("injected state diff failure".into()));
        }
        changed_actors(self.store.as_ref(), parent_root, child_root)
            .map_err(|e| NodeError::State(e.to_string()))
    }

    async fn state_get_actor(
        &self,
        addr: &Address,
        key: &TipsetKeys,
    ) -> Result<Option<ActorState>, NodeError> {
        let ts = self
            .by_key
            .get(key)
            .ok_or_else(|| NodeError::TipsetNotFound(key.to_string()))?;
        let tree = StateTree::load(self.store.as_ref(), ts.parent_state())
            .map_err(|e| NodeError::State(e.to_string()))?;
        Ok(tree.get_actor(addr).cloned())
    }

    fn should_burn(
        &self,
        _parent_state: &Cid,
        _msg: &Message,
        _exit_code: ExitCode,
    ) -> Result<bool, NodeError> {
        Ok(true)
    }
}

/// A plain value-transfer message between two test accounts.
pub fn test_message(from: u64, to: u64, nonce: u64) -> Message {
    Message {
        from: Address::new_id(from),
        to: Address::new_id(to),
        sequence: nonce,
        value: BigInt::from(42),
        method_num: crate::message::METHOD_SEND,
        params: Vec::new(),
        gas_limit: 1_000_000,
        gas_fee_cap: BigInt::from(101),
        gas_premium: BigInt::from(5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldSpec, ModelRow};

    /// A model whose `message` column only exists from schema major 3 on.
    struct VersionedModel {
        height: i64,
        block: String,
        message: String,
    }

    impl ModelRow for VersionedModel {
        const SPEC: &'static ModelSpec = &ModelSpec::new(
            "versioned_model",
            &[
                FieldSpec::pk("height"),
                FieldSpec::col("block"),
                FieldSpec::col_since("message", 3),
            ],
        );

        fn values(&self) -> Vec<Value> {
            vec![
                self.height.into(),
                self.block.clone().into(),
                self.message.clone().into(),
            ]
        }
    }

    crate::model::impl_persistable!(VersionedModel);

    fn miner_info(owner: &str) -> crate::model::actors::MinerInfo {
        crate::model::actors::MinerInfo {
            height: 1,
            miner_id: "f01001".to_string(),
            state_root: "stateroot".to_string(),
            owner_id: owner.to_string(),
            worker_id: "f0101".to_string(),
            new_worker: None,
            worker_change_epoch: -1,
            peer_id: None,
            control_addresses: vec![],
            sector_size: 32 << 30,
        }
    }

    /// Scenario: re-persisting under upsert updates in place; with upsert
    /// disabled the duplicate key surfaces as a conflict and the original
    /// row stands.
    #[tokio::test]
    async fn upsert_updates_and_insert_conflicts() {
        let storage = MemoryStorage::new();
        storage
            .persist_batch(&[&miner_info("f0100")])
            .await
            .unwrap();
        storage
            .persist_batch(&[&miner_info("f0999")])
            .await
            .unwrap();
        assert_eq!(storage.count("miner_infos"), 1);
        assert_eq!(
            storage.rows("miner_infos")[0]["owner_id"],
            serde_json::json!("f0999")
        );

        let storage = MemoryStorage::new().with_upsert(false);
        storage
            .persist_batch(&[&miner_info("f0100")])
            .await
            .unwrap();
        let err = storage
            .persist_batch(&[&miner_info("f0999")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { ref table } if table == "miner_infos"));
        assert_eq!(storage.count("miner_infos"), 1);
        assert_eq!(
            storage.rows("miner_infos")[0]["owner_id"],
            serde_json::json!("f0100")
        );
    }

    /// Scenario: persisting a model with a field newer than the schema
    /// succeeds and elides the field; a current schema keeps it.
    #[tokio::test]
    async fn version_gated_fields_are_elided() {
        let vm = VersionedModel {
            height: 42,
            block: "blocka".to_string(),
            message: "msg1".to_string(),
        };

        let old = MemoryStorage::new().with_version(Version::new(2, 0));
        old.persist_batch(&[&vm]).await.unwrap();
        let row = &old.rows("versioned_model")[0];
        assert_eq!(row.get("block"), Some(&serde_json::json!("blocka")));
        assert_eq!(row.get("message"), None);

        let new = MemoryStorage::new().with_version(Version::new(3, 0));
        new.persist_batch(&[&vm]).await.unwrap();
        let row = &new.rows("versioned_model")[0];
        assert_eq!(row.get("message"), Some(&serde_json::json!("msg1")));
    }

    /// A failed batch applies none of its rows.
    #[tokio::test]
    async fn batches_are_atomic() {
        let storage = MemoryStorage::new().with_upsert(false);
        storage
            .persist_batch(&[&miner_info("f0100")])
            .await
            .unwrap();

        // Second batch: a fresh row plus a duplicate; the conflict aborts
        // both.
        let fresh = VersionedModel {
            height: 1,
            block: "b".to_string(),
            message: "m".to_string(),
        };
        let dup = miner_info("f0200");
        let err = storage.persist_batch(&[&fresh, &dup]).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
        assert_eq!(storage.count("versioned_model"), 0);
        assert_eq!(storage.count("miner_infos"), 1);
    }

    #[test]
    fn chain_builder_links_parents() {
        let mut b = ChainBuilder::new();
        b.extend();
        b.extend();
        b.extend_after_nulls(2);
        let tipsets = b.tipsets();

        assert!(tipsets[0].is_genesis());
        assert_eq!(tipsets[1].epoch(), 1);
        assert_eq!(tipsets[2].epoch(), 4);
        assert_eq!(tipsets[2].parents(), tipsets[1].key());
    }
}
