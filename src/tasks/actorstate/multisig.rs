// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{ActorInfo, ActorStateExtractor};
use crate::actors::{multisig, ActorRegistry};
use crate::ipld::IpldStore;
use crate::model::actors::MultisigTransaction;
use crate::model::Persistable;

/// Extracts a multisig's pending transactions into
/// `multisig_transactions`.
pub struct MultisigExtractor;

impl ActorStateExtractor for MultisigExtractor {
    fn extract(
        &self,
        info: &ActorInfo,
        store: &dyn IpldStore,
        registry: &ActorRegistry,
    ) -> anyhow::Result<Box<dyn Persistable>> {
        let mstate = multisig::State::load(registry, store, &info.actor)?;

        let mut rows = Vec::new();
        mstate.for_each_pending_txn(store, |id, txn| {
            rows.push(MultisigTransaction {
                height: info.height,
                multisig_id: info.address.to_string(),
                state_root: info.state_root.clone(),
                transaction_id: id,
                to: txn.to.to_string(),
                value: txn.value.to_string(),
                method: txn.method as i64,
                params: txn.params.clone(),
                approved: txn.approved.iter().map(|a| a.to_string()).collect(),
            });
            Ok(())
        })?;

        Ok(Box::new(rows))
    }
}
