// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{ActorInfo, ActorStateExtractor};
use crate::actors::{reward, ActorRegistry};
use crate::ipld::IpldStore;
use crate::model::actors::ChainReward;
use crate::model::Persistable;

/// Extracts reward actor state into `chain_rewards`.
pub struct RewardExtractor;

impl ActorStateExtractor for RewardExtractor {
    fn extract(
        &self,
        info: &ActorInfo,
        store: &dyn IpldStore,
        registry: &ActorRegistry,
    ) -> anyhow::Result<Box<dyn Persistable>> {
        let rstate = reward::State::load(registry, store, &info.actor)?;
        let smoothed = rstate.this_epoch_reward_smoothed();

        Ok(Box::new(ChainReward {
            height: info.height,
            state_root: info.state_root.clone(),
            cum_sum_baseline: rstate.cumsum_baseline().to_string(),
            cum_sum_realized: rstate.cumsum_realized().to_string(),
            effective_baseline_power: rstate.effective_baseline_power().to_string(),
            new_baseline_power: rstate.this_epoch_baseline_power().to_string(),
            new_reward_smoothed_position_estimate: smoothed.position.to_string(),
            new_reward_smoothed_velocity_estimate: smoothed.velocity.to_string(),
            total_mined_reward: rstate.total_storage_power_reward().to_string(),
            new_reward: rstate.this_epoch_reward().to_string(),
            effective_network_time: rstate.effective_network_time(),
        }))
    }
}
