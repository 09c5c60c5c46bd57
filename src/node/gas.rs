// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use num_traits::ToPrimitive;

use crate::bigint::{BigInt, TokenAmount};

/// Gas limit of a full block.
pub const BLOCK_GAS_LIMIT: i64 = 10_000_000_000;

/// Target gas usage per block; the base fee adjusts toward it.
pub const BLOCK_GAS_TARGET: i64 = BLOCK_GAS_LIMIT / 2;

/// Base fee adjustment factor per epoch: at most 12.5%.
pub const BASE_FEE_MAX_CHANGE_DENOM: f64 = 8.0;

const GAS_OVERUSE_NUM: i64 = 11;
const GAS_OVERUSE_DENOM: i64 = 10;

/// Where the funds charged for a message execution went.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GasOutputs {
    pub base_fee_burn: TokenAmount,
    pub over_estimation_burn: TokenAmount,
    pub miner_penalty: TokenAmount,
    pub miner_tip: TokenAmount,
    pub refund: TokenAmount,
    pub gas_refund: i64,
    pub gas_burned: i64,
}

/// Splits unused gas into the portion refunded and the portion burned for
/// over-estimation. Limits more than 10% over actual usage burn the excess.
fn compute_gas_overestimation_burn(gas_used: i64, gas_limit: i64) -> (i64, i64) {
    if gas_used == 0 {
        return (0, gas_limit);
    }

    let over = gas_limit - (GAS_OVERUSE_NUM * gas_used) / GAS_OVERUSE_DENOM;
    let over = over.min(gas_used);
    if over < 0 {
        return (gas_limit - gas_used, 0);
    }

    let gas_to_burn = (BigInt::from(gas_limit - gas_used) * over) / gas_used;
    let gas_to_burn = gas_to_burn.to_i64().unwrap_or(i64::MAX);
    (gas_limit - gas_used - gas_to_burn, gas_to_burn)
}

/// Derives the full gas accounting for an executed message from its receipt,
/// limit, fee cap, premium and the base fee of the carrying block. Pure.
pub fn compute_gas_outputs(
    gas_used: i64,
    gas_limit: i64,
    base_fee: &TokenAmount,
    fee_cap: &TokenAmount,
    gas_premium: &TokenAmount,
    charge_network_fee: bool,
) -> GasOutputs {
    let mut out = GasOutputs::default();

    let mut base_fee_to_pay = base_fee;
    if base_fee > fee_cap {
        base_fee_to_pay = fee_cap;
        out.miner_penalty = (base_fee - fee_cap) * gas_used;
    }

    if charge_network_fee {
        out.base_fee_burn = base_fee_to_pay * gas_used;
    }

    let mut miner_tip = gas_premium.clone();
    if &(base_fee_to_pay + &miner_tip) > fee_cap {
        miner_tip = fee_cap - base_fee_to_pay;
    }
    out.miner_tip = &miner_tip * gas_limit;

    let (gas_refund, gas_burned) = compute_gas_overestimation_burn(gas_used, gas_limit);
    out.gas_refund = gas_refund;
    out.gas_burned = gas_burned;

    if gas_burned != 0 {
        out.over_estimation_burn = base_fee_to_pay * gas_burned;
    }

    let required_funds = fee_cap * gas_limit;
    out.refund =
        required_funds - &out.base_fee_burn - &out.miner_tip - &out.over_estimation_burn;

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amt(v: i64) -> TokenAmount {
        TokenAmount::from(v)
    }

    #[test]
    fn exact_usage_burns_nothing_extra() {
        let out = compute_gas_outputs(1000, 1000, &amt(10), &amt(20), &amt(2), true);
        assert_eq!(out.base_fee_burn, amt(10_000));
        assert_eq!(out.gas_burned, 0);
        assert_eq!(out.gas_refund, 0);
        assert_eq!(out.over_estimation_burn, amt(0));
        assert_eq!(out.miner_tip, amt(2_000));
        // refund = 20*1000 - 10000 - 2000
        assert_eq!(out.refund, amt(8_000));
        assert_eq!(out.miner_penalty, amt(0));
    }

    #[test]
    fn small_overestimate_is_refunded() {
        // 10% over usage stays within the allowance
        let (refund, burned) = compute_gas_overestimation_burn(1000, 1100);
        assert_eq!((refund, burned), (100, 0));
    }

    #[test]
    fn large_overestimate_is_burned() {
        let (refund, burned) = compute_gas_overestimation_burn(1000, 2000);
        assert_eq!(refund + burned, 1000);
        assert!(burned > 0);
    }

    #[test]
    fn unused_message_refunds_whole_limit() {
        let (refund, burned) = compute_gas_overestimation_burn(0, 5000);
        assert_eq!((refund, burned), (0, 5000));
    }

    #[test]
    fn fee_cap_below_base_fee_penalizes_miner() {
        let out = compute_gas_outputs(100, 100, &amt(50), &amt(30), &amt(1), true);
        assert_eq!(out.miner_penalty, amt(2_000));
        assert_eq!(out.base_fee_burn, amt(3_000));
        // premium clamped to fee_cap - base_fee_to_pay = 0
        assert_eq!(out.miner_tip, amt(0));
    }

    #[test]
    fn network_fee_can_be_waived() {
        let out = compute_gas_outputs(100, 100, &amt(50), &amt(60), &amt(1), false);
        assert_eq!(out.base_fee_burn, amt(0));
    }
}
