// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{ActorInfo, ActorStateExtractor};
use crate::actors::{miner, ActorRegistry};
use crate::ipld::IpldStore;
use crate::model::actors::{MinerInfo, MinerLockedFund};
use crate::model::{Persistable, PersistableList};

/// Extracts storage miner state into `miner_infos` and
/// `miner_locked_funds`.
pub struct MinerExtractor;

impl ActorStateExtractor for MinerExtractor {
    fn extract(
        &self,
        info: &ActorInfo,
        store: &dyn IpldStore,
        registry: &ActorRegistry,
    ) -> anyhow::Result<Box<dyn Persistable>> {
        let mstate = miner::State::load(registry, store, &info.actor)?;
        let minfo = mstate.info(store)?;

        let miner_id = info.address.to_string();

        let info_row = MinerInfo {
            height: info.height,
            miner_id: miner_id.clone(),
            state_root: info.state_root.clone(),
            owner_id: minfo.owner.to_string(),
            worker_id: minfo.worker.to_string(),
            new_worker: minfo
                .pending_worker_key
                .as_ref()
                .map(|k| k.new_worker.to_string()),
            worker_change_epoch: minfo
                .pending_worker_key
                .as_ref()
                .map(|k| k.effective_at)
                .unwrap_or(-1),
            peer_id: if minfo.peer_id.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(&minfo.peer_id).into_owned())
            },
            control_addresses: minfo
                .control_addresses
                .iter()
                .map(|a| a.to_string())
                .collect(),
            sector_size: minfo.sector_size as i64,
        };

        let funds_row = MinerLockedFund {
            height: info.height,
            miner_id,
            state_root: info.state_root.clone(),
            locked_funds: mstate.locked_funds().to_string(),
            initial_pledge: mstate.initial_pledge().to_string(),
            pre_commit_deposits: mstate.pre_commit_deposits().to_string(),
        };

        let mut list = PersistableList::new();
        list.add(info_row);
        list.add(funds_row);
        Ok(Box::new(list))
    }
}
