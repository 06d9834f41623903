// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

//! Deterministic DEX cascade and tagged-variant swap encoding. The cascade
//! ordering is a pure function of `(resonance, depth, topology)`; dispatch
//! over router families replaces any runtime ABI lookup.

use crate::domain::constants::{DEX_ROUTERS_BASE, v3_fee_for_pair};
use crate::domain::phi::{INV_PHI, PHI};
use crate::infrastructure::data::schema::EchoTopology;
use crate::infrastructure::network::contracts::{SolidlyRouter, UniV2Router, UniV3Router};
use alloy::primitives::{Address, U256};
use alloy_sol_types::SolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DexKind {
    ConcentratedLiquidity,
    UniV2,
    UniV2Fork,
    Solidly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DexId {
    pub name: &'static str,
    pub kind: DexKind,
}

impl DexId {
    pub fn router(&self) -> Address {
        DEX_ROUTERS_BASE
            .get(self.name)
            .copied()
            .unwrap_or(Address::ZERO)
    }
}

const DEXES: [DexId; 4] = [
    DexId {
        name: "uniswap_v3_swaprouter02",
        kind: DexKind::ConcentratedLiquidity,
    },
    DexId {
        name: "uniswap_v2_router02",
        kind: DexKind::UniV2,
    },
    DexId {
        name: "baseswap_router",
        kind: DexKind::UniV2Fork,
    },
    DexId {
        name: "aerodrome_router",
        kind: DexKind::Solidly,
    },
];

fn kind_weight(kind: DexKind, resonance: f64, depth: u32, topology: &EchoTopology) -> f64 {
    match kind {
        // Concentrated liquidity reads strong signals best.
        DexKind::ConcentratedLiquidity => resonance * PHI,
        // Plain V2 favors deeper causal chains.
        DexKind::UniV2 => 1.0 + depth as f64 * INV_PHI,
        DexKind::UniV2Fork => 0.5 * (topology.alt + 1) as f64,
        DexKind::Solidly => 0.4 * (topology.primary + 1) as f64,
    }
}

/// Prioritized router cascade. Pure in its inputs; ties break on name so
/// the ordering is total.
pub fn cascade(resonance: f64, depth: u32, topology: &EchoTopology) -> Vec<DexId> {
    let mut scored: Vec<(f64, DexId)> = DEXES
        .iter()
        .map(|dex| (kind_weight(dex.kind, resonance, depth, topology), *dex))
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.name.cmp(b.1.name))
    });
    scored.into_iter().map(|(_, dex)| dex).collect()
}

#[derive(Debug, Clone)]
pub struct SwapEncoding {
    pub to: Address,
    pub calldata: Vec<u8>,
    pub value: U256,
}

fn solidly_route(from: Address, to: Address) -> Vec<SolidlyRouter::Route> {
    vec![SolidlyRouter::Route {
        from,
        to,
        stable: false,
    }]
}

/// Public bait leg: native value in, tokens out, recipient = primary wallet.
pub fn encode_bait_swap(
    dex: DexId,
    from: Address,
    to: Address,
    amount_in: U256,
    min_out: U256,
    recipient: Address,
    deadline: u64,
) -> SwapEncoding {
    let calldata = match dex.kind {
        DexKind::UniV2 | DexKind::UniV2Fork => UniV2Router::swapExactETHForTokensCall {
            amountOutMin: min_out,
            path: vec![from, to],
            to: recipient,
            deadline: U256::from(deadline),
        }
        .abi_encode(),
        DexKind::ConcentratedLiquidity => UniV3Router::exactInputSingleCall {
            params: UniV3Router::ExactInputSingleParams {
                tokenIn: from,
                tokenOut: to,
                fee: alloy::primitives::aliases::U24::from(v3_fee_for_pair(from, to) as u16),
                recipient,
                deadline: U256::from(deadline),
                amountIn: amount_in,
                amountOutMinimum: min_out,
                sqrtPriceLimitX96: alloy::primitives::aliases::U160::ZERO,
            },
        }
        .abi_encode(),
        DexKind::Solidly => SolidlyRouter::swapExactETHForTokensCall {
            amountOutMin: min_out,
            routes: solidly_route(from, to),
            to: recipient,
            deadline: U256::from(deadline),
        }
        .abi_encode(),
    };
    SwapEncoding {
        to: dex.router(),
        calldata,
        value: amount_in,
    }
}

/// Mirror capture leg: token in, token out, no native value.
pub fn encode_capture_swap(
    dex: DexId,
    from: Address,
    to: Address,
    amount_in: U256,
    min_out: U256,
    recipient: Address,
    deadline: u64,
) -> SwapEncoding {
    let calldata = match dex.kind {
        DexKind::UniV2 | DexKind::UniV2Fork => UniV2Router::swapExactTokensForTokensCall {
            amountIn: amount_in,
            amountOutMin: min_out,
            path: vec![from, to],
            to: recipient,
            deadline: U256::from(deadline),
        }
        .abi_encode(),
        DexKind::ConcentratedLiquidity => UniV3Router::exactInputSingleCall {
            params: UniV3Router::ExactInputSingleParams {
                tokenIn: from,
                tokenOut: to,
                fee: alloy::primitives::aliases::U24::from(v3_fee_for_pair(from, to) as u16),
                recipient,
                deadline: U256::from(deadline),
                amountIn: amount_in,
                amountOutMinimum: min_out,
                sqrtPriceLimitX96: alloy::primitives::aliases::U160::ZERO,
            },
        }
        .abi_encode(),
        DexKind::Solidly => SolidlyRouter::swapExactTokensForTokensCall {
            amountIn: amount_in,
            amountOutMin: min_out,
            routes: solidly_route(from, to),
            to: recipient,
            deadline: U256::from(deadline),
        }
        .abi_encode(),
    };
    SwapEncoding {
        to: dex.router(),
        calldata,
        value: U256::ZERO,
    }
}

/// Quote probe for the capture leg. V3 routers have no free quote call, so
/// quoting falls back to the V2 router's view.
pub fn encode_amounts_out(dex: DexId, amount_in: U256, from: Address, to: Address) -> SwapEncoding {
    let (router, calldata) = match dex.kind {
        DexKind::Solidly => (
            dex.router(),
            SolidlyRouter::getAmountsOutCall {
                amountIn: amount_in,
                routes: solidly_route(from, to),
            }
            .abi_encode(),
        ),
        DexKind::UniV2 | DexKind::UniV2Fork => (
            dex.router(),
            UniV2Router::getAmountsOutCall {
                amountIn: amount_in,
                path: vec![from, to],
            }
            .abi_encode(),
        ),
        DexKind::ConcentratedLiquidity => (
            DEX_ROUTERS_BASE
                .get("uniswap_v2_router02")
                .copied()
                .unwrap_or(Address::ZERO),
            UniV2Router::getAmountsOutCall {
                amountIn: amount_in,
                path: vec![from, to],
            }
            .abi_encode(),
        ),
    };
    SwapEncoding {
        to: router,
        calldata,
        value: U256::ZERO,
    }
}

pub fn decode_amounts_out(dex: DexId, out: &[u8]) -> Option<U256> {
    let amounts = match dex.kind {
        DexKind::Solidly => SolidlyRouter::getAmountsOutCall::abi_decode_returns(out).ok()?,
        _ => UniV2Router::getAmountsOutCall::abi_decode_returns(out).ok()?,
    };
    amounts.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::constants::{USDC_BASE, WETH_BASE};

    #[test]
    fn cascade_is_deterministic() {
        let topology = EchoTopology::default();
        let a = cascade(1.618, 2, &topology);
        let b = cascade(1.618, 2, &topology);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn high_resonance_prefers_concentrated_liquidity() {
        let order = cascade(2.6, 1, &EchoTopology::default());
        assert_eq!(order[0].kind, DexKind::ConcentratedLiquidity);
    }

    #[test]
    fn deep_chains_promote_univ2() {
        let order = cascade(0.2, 10, &EchoTopology::default());
        assert_eq!(order[0].kind, DexKind::UniV2);
    }

    #[test]
    fn every_dex_has_a_router_address() {
        for dex in cascade(1.0, 1, &EchoTopology::default()) {
            assert_ne!(dex.router(), Address::ZERO, "{} missing router", dex.name);
        }
    }

    #[test]
    fn bait_encoding_attaches_value() {
        let dex = DexId {
            name: "uniswap_v2_router02",
            kind: DexKind::UniV2,
        };
        let enc = encode_bait_swap(
            dex,
            WETH_BASE,
            USDC_BASE,
            U256::from(1_000_000u64),
            U256::from(950u64),
            Address::ZERO,
            1_700_000_300,
        );
        assert_eq!(enc.value, U256::from(1_000_000u64));
        assert!(!enc.calldata.is_empty());
        // swapExactETHForTokens selector
        assert_eq!(
            &enc.calldata[..4],
            UniV2Router::swapExactETHForTokensCall::SELECTOR
        );
    }

    #[test]
    fn capture_encoding_carries_no_value() {
        let dex = DexId {
            name: "aerodrome_router",
            kind: DexKind::Solidly,
        };
        let enc = encode_capture_swap(
            dex,
            USDC_BASE,
            WETH_BASE,
            U256::from(5u64),
            U256::ZERO,
            Address::ZERO,
            0,
        );
        assert_eq!(enc.value, U256::ZERO);
        assert_eq!(
            &enc.calldata[..4],
            SolidlyRouter::swapExactTokensForTokensCall::SELECTOR
        );
    }
}
