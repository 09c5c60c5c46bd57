// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{ActorInfo, ActorStateExtractor};
use crate::actors::{market, ActorRegistry};
use crate::ipld::IpldStore;
use crate::model::actors::{MarketDealProposal, MarketDealState};
use crate::model::{Persistable, PersistableList};

/// Extracts storage market state into `market_deal_proposals` and
/// `market_deal_states`.
pub struct MarketExtractor;

impl ActorStateExtractor for MarketExtractor {
    fn extract(
        &self,
        info: &ActorInfo,
        store: &dyn IpldStore,
        registry: &ActorRegistry,
    ) -> anyhow::Result<Box<dyn Persistable>> {
        let mstate = market::State::load(registry, store, &info.actor)?;

        let mut proposals = Vec::new();
        mstate.for_each_deal_proposal(store, |deal_id, proposal| {
            proposals.push(MarketDealProposal {
                height: info.height,
                deal_id: deal_id as i64,
                state_root: info.state_root.clone(),
                padded_piece_size: proposal.piece_size as i64,
                unpadded_piece_size: proposal.unpadded_piece_size() as i64,
                start_epoch: proposal.start_epoch,
                end_epoch: proposal.end_epoch,
                client_id: proposal.client.to_string(),
                provider_id: proposal.provider.to_string(),
                client_collateral: proposal.client_collateral.to_string(),
                provider_collateral: proposal.provider_collateral.to_string(),
                storage_price_per_epoch: proposal.storage_price_per_epoch.to_string(),
                piece_cid: proposal.piece_cid.to_string(),
                is_verified: proposal.verified_deal,
                label: if proposal.label.is_empty() {
                    None
                } else {
                    Some(proposal.label.clone())
                },
            });
            Ok(())
        })?;

        let mut states = Vec::new();
        mstate.for_each_deal_state(store, |deal_id, state| {
            states.push(MarketDealState {
                height: info.height,
                deal_id: deal_id as i64,
                state_root: info.state_root.clone(),
                sector_start_epoch: state.sector_start_epoch,
                last_update_epoch: state.last_updated_epoch,
                slash_epoch: state.slash_epoch,
            });
            Ok(())
        })?;

        let mut list = PersistableList::new();
        list.add(proposals);
        list.add(states);
        Ok(Box::new(list))
    }
}
