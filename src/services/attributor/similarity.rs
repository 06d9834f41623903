// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@on1.no>

//! Coarse transaction fingerprinting and the pattern-similarity measure
//! used to attribute later transactions to emitted signals.

use crate::domain::constants::SIMILARITY_THRESHOLD;
use crate::domain::phi::{
    ALIGNMENT_ANCHORS_ETH, ALIGNMENT_TOLERANCE_ETH, ATTRIBUTION_WINDOW_MAX_SECS,
    ATTRIBUTION_WINDOW_MIN_SECS,
};
use crate::infrastructure::network::contracts::{SolidlyRouter, UniV2Router, UniV3Router};
use alloy::primitives::{Address, U256};
use alloy_sol_types::SolCall;

/// What we can read off a candidate transaction without deep simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct TxPattern {
    pub action: &'static str,
    pub path: Vec<Address>,
    pub phi_aligned: bool,
}

/// `value` (wei) tested against the anchor set at 1e-3 ETH tolerance.
pub fn phi_aligned(value: U256) -> bool {
    let wei = value.min(U256::from(u128::MAX)).to::<u128>();
    let eth = wei as f64 / 1e18;
    ALIGNMENT_ANCHORS_ETH
        .iter()
        .any(|anchor| (eth - anchor).abs() <= ALIGNMENT_TOLERANCE_ETH)
}

fn decode_swap_path(input: &[u8]) -> Vec<Address> {
    if input.len() < 4 {
        return Vec::new();
    }
    if let Ok(call) = UniV2Router::swapExactETHForTokensCall::abi_decode(input) {
        return call.path;
    }
    if let Ok(call) = UniV2Router::swapExactTokensForTokensCall::abi_decode(input) {
        return call.path;
    }
    if let Ok(call) = UniV2Router::swapExactTokensForETHCall::abi_decode(input) {
        return call.path;
    }
    if let Ok(call) = UniV3Router::exactInputSingleCall::abi_decode(input) {
        return vec![call.params.tokenIn, call.params.tokenOut];
    }
    if let Ok(call) = SolidlyRouter::swapExactTokensForTokensCall::abi_decode(input) {
        let mut path: Vec<Address> = call.routes.iter().map(|r| r.from).collect();
        if let Some(last) = call.routes.last() {
            path.push(last.to);
        }
        return path;
    }
    Vec::new()
}

/// Extract the coarse pattern of a transaction.
pub fn extract_tx_pattern(
    to: Option<Address>,
    input: &[u8],
    value: U256,
    router_whitelist: &[Address],
) -> TxPattern {
    let is_swap = to.map(|t| router_whitelist.contains(&t)).unwrap_or(false);
    TxPattern {
        action: if is_swap { "SWAP" } else { "TRANSFER" },
        path: if is_swap { decode_swap_path(input) } else { Vec::new() },
        phi_aligned: phi_aligned(value),
    }
}

fn path_score(record_path: &[Address], tx_path: &[Address]) -> f64 {
    if record_path.is_empty() || tx_path.is_empty() {
        return 0.0;
    }
    if record_path == tx_path {
        return 1.0;
    }
    // Same tokens, different shape: half credit.
    if record_path.iter().all(|t| tx_path.contains(t)) {
        return 0.5;
    }
    0.0
}

/// Similarity of a candidate transaction to a record's announced swap:
/// token-path equality and action match each weigh one factor, the phi
/// bonus adds 0.2, normalized over the two factors.
pub fn similarity(record_path: &[Address], record_action: &str, tx: &TxPattern) -> f64 {
    let path = path_score(record_path, &tx.path);
    let action = if tx.action.contains(record_action) || record_action.contains(tx.action) {
        1.0
    } else {
        0.0
    };
    let phi = if tx.phi_aligned { 0.2 } else { 0.0 };
    (path + action + phi) / 2.0
}

pub fn meets_similarity(score: f64) -> bool {
    score >= SIMILARITY_THRESHOLD
}

/// Inclusive Φ-window test between the bait confirmation and a candidate
/// transaction's block timestamp.
pub fn within_phi_window(amplification_at_ms: u64, block_timestamp_secs: u64) -> bool {
    let dt = block_timestamp_secs as f64 - amplification_at_ms as f64 / 1000.0;
    (ATTRIBUTION_WINDOW_MIN_SECS..=ATTRIBUTION_WINDOW_MAX_SECS).contains(&dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::constants::{DAI_BASE, USDC_BASE, WETH_BASE, router_whitelist};
    use crate::domain::phi::PHI;

    fn swap_tx(path: Vec<Address>) -> TxPattern {
        TxPattern {
            action: "SWAP",
            path,
            phi_aligned: false,
        }
    }

    #[test]
    fn exact_match_scores_one() {
        let record = [WETH_BASE, USDC_BASE];
        let tx = swap_tx(vec![WETH_BASE, USDC_BASE]);
        assert_eq!(similarity(&record, "SWAP", &tx), 1.0);
    }

    #[test]
    fn partial_path_with_phi_scores_085() {
        let record = [WETH_BASE, USDC_BASE];
        let mut tx = swap_tx(vec![USDC_BASE, WETH_BASE]);
        tx.phi_aligned = true;
        let score = similarity(&record, "SWAP", &tx);
        assert!((score - 0.85).abs() < 1e-9);
        assert!(meets_similarity(score));
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        assert!(meets_similarity(0.8));
        assert!(!meets_similarity(0.7999));
    }

    #[test]
    fn action_mismatch_blocks_attribution() {
        let record = [WETH_BASE, USDC_BASE];
        let tx = TxPattern {
            action: "TRANSFER",
            path: vec![WETH_BASE, USDC_BASE],
            phi_aligned: true,
        };
        assert!(!meets_similarity(similarity(&record, "SWAP", &tx)));
    }

    #[test]
    fn foreign_path_scores_low() {
        let record = [WETH_BASE, USDC_BASE];
        let tx = swap_tx(vec![DAI_BASE, WETH_BASE]);
        assert!(!meets_similarity(similarity(&record, "SWAP", &tx)));
    }

    #[test]
    fn phi_window_boundaries_are_inclusive() {
        // Δt of 1.0s is too early even with perfect similarity elsewhere.
        assert!(!within_phi_window(1_700_000_000_000, 1_700_000_001));
        let base = 1_700_000_000_000u64;
        assert!(within_phi_window(base - 1_618, 1_700_000_000));
        assert!(within_phi_window(base - 4_236, 1_700_000_000));
        // Just outside either edge is rejected.
        assert!(!within_phi_window(base - 1_617, 1_700_000_000));
        assert!(!within_phi_window(base - 4_237, 1_700_000_000));
    }

    #[test]
    fn value_alignment_respects_tolerance() {
        // Φ ETH, exact.
        let phi_wei = U256::from((PHI * 1e18) as u128);
        assert!(phi_aligned(phi_wei));
        // Just inside tolerance.
        let near = U256::from(((PHI + 0.0009) * 1e18) as u128);
        assert!(phi_aligned(near));
        // Outside tolerance.
        let far = U256::from(((PHI + 0.002) * 1e18) as u128);
        assert!(!phi_aligned(far));
        assert!(!phi_aligned(U256::ZERO));
    }

    #[test]
    fn router_targets_read_as_swaps() {
        let routers = router_whitelist();
        let to = routers[0];
        let pattern = extract_tx_pattern(Some(to), &[], U256::ZERO, &routers);
        assert_eq!(pattern.action, "SWAP");
        let other = extract_tx_pattern(Some(Address::ZERO), &[], U256::ZERO, &routers);
        assert_eq!(other.action, "TRANSFER");
    }

    #[test]
    fn v2_swap_calldata_decodes_to_path() {
        let call = UniV2Router::swapExactETHForTokensCall {
            amountOutMin: U256::ZERO,
            path: vec![WETH_BASE, USDC_BASE],
            to: Address::ZERO,
            deadline: U256::ZERO,
        };
        let input = call.abi_encode();
        let routers = router_whitelist();
        let pattern = extract_tx_pattern(Some(routers[0]), &input, U256::ZERO, &routers);
        assert_eq!(pattern.path, vec![WETH_BASE, USDC_BASE]);
    }
}
