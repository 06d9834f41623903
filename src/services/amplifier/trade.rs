// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@on1.no>

//! Bait sizing. Phi-scaled base, per-pair multipliers, gas-price buckets,
//! a confidence term and the consensus-window multiplier, floored at the
//! minimum trade size.

use crate::domain::constants::{
    AERO_BASE, CBETH_BASE, DAI_BASE, MIN_TRADE_WEI, TOKEN_WHITELIST, TRADE_BASE_WEI, USDBC_BASE,
    USDC_BASE, WETH_BASE,
};
use crate::domain::phi::FIB_BOOST;
use alloy::primitives::{Address, U256};

/// Confidence boundary; the boost applies strictly above it.
pub const CONFIDENCE_BOOST_THRESHOLD: f64 = 0.95;

fn pair_multiplier(from: Address, to: Address) -> f64 {
    let pair = (from, to);
    if pair == (WETH_BASE, USDC_BASE) || pair == (USDC_BASE, WETH_BASE) {
        1.0
    } else if pair == (WETH_BASE, DAI_BASE) || pair == (DAI_BASE, WETH_BASE) {
        0.9
    } else if pair == (USDC_BASE, DAI_BASE)
        || pair == (DAI_BASE, USDC_BASE)
        || pair.0 == USDBC_BASE
        || pair.1 == USDBC_BASE
    {
        0.8
    } else if pair.0 == AERO_BASE || pair.1 == AERO_BASE || pair.0 == CBETH_BASE || pair.1 == CBETH_BASE
    {
        0.7
    } else {
        0.5
    }
}

/// Size shrinks as gas climbs; tiny Base fees keep the full size.
fn gas_bucket_multiplier(gas_gwei: f64) -> f64 {
    if gas_gwei < 1.0 {
        1.0
    } else if gas_gwei < 5.0 {
        0.8
    } else if gas_gwei < 20.0 {
        0.5
    } else {
        0.25
    }
}

/// Compute the bait trade size in wei.
pub fn compute_trade_amount(
    from: Address,
    to: Address,
    gas_gwei: f64,
    confidence: f64,
    window_multiplier: f64,
) -> U256 {
    let mut scale = pair_multiplier(from, to)
        * gas_bucket_multiplier(gas_gwei)
        * (0.5 + confidence.clamp(0.0, 1.0) / 2.0)
        * window_multiplier;
    if confidence > CONFIDENCE_BOOST_THRESHOLD {
        scale *= FIB_BOOST;
    }

    let scaled = mul_f64(*TRADE_BASE_WEI, scale);
    scaled.max(*MIN_TRADE_WEI)
}

/// Semantic legibility gate for a record's announced swap.
pub fn validate_legibility(from: Address, to: Address, amount: U256) -> Result<(), String> {
    if !TOKEN_WHITELIST.contains(&from) {
        return Err(format!("token {from:#x} outside whitelist"));
    }
    if !TOKEN_WHITELIST.contains(&to) {
        return Err(format!("token {to:#x} outside whitelist"));
    }
    if from == to {
        return Err("degenerate path".to_string());
    }
    if amount < *MIN_TRADE_WEI {
        return Err(format!("amount {amount} below dust floor"));
    }
    Ok(())
}

fn mul_f64(value: U256, factor: f64) -> U256 {
    let ppm = (factor * 1_000_000.0).max(0.0) as u64;
    value * U256::from(ppm) / U256::from(1_000_000u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_is_enforced() {
        // Worst-case multipliers still never go below the floor.
        let amount = compute_trade_amount(AERO_BASE, WETH_BASE, 100.0, 0.0, 1.0);
        assert_eq!(amount, *MIN_TRADE_WEI);
    }

    #[test]
    fn confidence_boost_is_strict_at_boundary() {
        let at = compute_trade_amount(WETH_BASE, USDC_BASE, 0.1, 0.95, 1.0);
        let above = compute_trade_amount(WETH_BASE, USDC_BASE, 0.1, 0.9500001, 1.0);
        // At exactly 0.95 no boost; strictly above it the boost applies.
        assert!(above > at);
        let ratio = above.to::<u128>() as f64 / at.to::<u128>() as f64;
        assert!((ratio - FIB_BOOST).abs() < 0.01);
    }

    #[test]
    fn elevated_gas_shrinks_size() {
        let calm = compute_trade_amount(WETH_BASE, USDC_BASE, 0.5, 0.8, 1.0);
        let busy = compute_trade_amount(WETH_BASE, USDC_BASE, 10.0, 0.8, 1.0);
        assert!(busy < calm);
    }

    #[test]
    fn whitelist_violations_fail_legibility() {
        let stranger = Address::from([0x42u8; 20]);
        assert!(validate_legibility(stranger, WETH_BASE, *TRADE_BASE_WEI).is_err());
        assert!(validate_legibility(WETH_BASE, stranger, *TRADE_BASE_WEI).is_err());
        assert!(validate_legibility(WETH_BASE, WETH_BASE, *TRADE_BASE_WEI).is_err());
        assert!(validate_legibility(WETH_BASE, USDC_BASE, U256::from(1u64)).is_err());
        assert!(validate_legibility(WETH_BASE, USDC_BASE, *TRADE_BASE_WEI).is_ok());
    }
}
