// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{ActorInfo, ActorStateExtractor};
use crate::actors::{init, ActorRegistry};
use crate::ipld::IpldStore;
use crate::model::actors::IdAddress;
use crate::model::Persistable;

/// Extracts the init actor's address map into `id_addresses`.
pub struct InitExtractor;

impl ActorStateExtractor for InitExtractor {
    fn extract(
        &self,
        info: &ActorInfo,
        store: &dyn IpldStore,
        registry: &ActorRegistry,
    ) -> anyhow::Result<Box<dyn Persistable>> {
        let istate = init::State::load(registry, store, &info.actor)?;

        let mut rows = Vec::new();
        istate.for_each_address(store, |id, robust| {
            rows.push(IdAddress {
                height: info.height,
                id: crate::address::Address::new_id(id).to_string(),
                address: robust.to_string(),
                state_root: info.state_root.clone(),
            });
            Ok(())
        })?;

        Ok(Box::new(rows))
    }
}
