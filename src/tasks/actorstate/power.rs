// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{ActorInfo, ActorStateExtractor};
use crate::actors::{power, ActorRegistry};
use crate::ipld::IpldStore;
use crate::model::actors::ChainPower;
use crate::model::Persistable;

/// Extracts storage power actor state into `chain_powers`.
pub struct PowerExtractor;

impl ActorStateExtractor for PowerExtractor {
    fn extract(
        &self,
        info: &ActorInfo,
        store: &dyn IpldStore,
        registry: &ActorRegistry,
    ) -> anyhow::Result<Box<dyn Persistable>> {
        let pstate = power::State::load(registry, store, &info.actor)?;
        let smoothed = pstate.this_epoch_qa_power_smoothed();

        Ok(Box::new(ChainPower {
            height: info.height,
            state_root: info.state_root.clone(),
            total_raw_bytes_power: pstate.total_raw_byte_power().to_string(),
            total_qa_bytes_power: pstate.total_quality_adj_power().to_string(),
            total_pledge_collateral: pstate.total_pledge_collateral().to_string(),
            qa_smoothed_position_estimate: smoothed.position.to_string(),
            qa_smoothed_velocity_estimate: smoothed.velocity.to_string(),
            miner_count: pstate.miner_count(),
            participating_miner_count: pstate.miner_above_min_power_count(),
        }))
    }
}
