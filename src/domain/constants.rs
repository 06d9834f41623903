// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use alloy::primitives::{Address, U256, address};
use lazy_static::lazy_static;
use std::collections::HashMap;

// Common assets (Base mainnet)
pub const WETH_BASE: Address = address!("4200000000000000000000000000000000000006");
pub const USDC_BASE: Address = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
pub const USDBC_BASE: Address = address!("d9aAEc86B65D86f6A7B5B1b0c42FFA531710b6CA");
pub const DAI_BASE: Address = address!("50c5725949A6F0c72E6C4a641F24049A917DB0Cb");
pub const CBETH_BASE: Address = address!("2Ae3F1Ec7F1F5012CFEab0185bfc7aa3cf0DEc22");
pub const AERO_BASE: Address = address!("940181a94A35A4569E4529A3CDfB74e38FD98631");

// =============================================================================
// NETWORK CONSTANTS
// =============================================================================

pub const CHAIN_BASE: u64 = 8453;

/// Block time in seconds.
pub const BLOCK_TIME_SECS: u64 = 2;

// =============================================================================
// GAS & TRANSACTION CONSTANTS
// =============================================================================

pub const SIGNAL_BASE_GAS_LIMIT: u64 = 300_000;
pub const SWAP_GAS_LIMIT: u64 = 250_000;
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Priority fee clamp during normal emission, in wei.
pub const MAX_PRIORITY_FEE_WEI: u128 = 2_000_000_000;
/// Priority fee ceiling under escalation, in wei.
pub const ESCALATED_PRIORITY_CAP_WEI: u128 = 3_000_000_000;
/// Max fee ceiling under escalation, in wei.
pub const MAX_FEE_CAP_WEI: u128 = 70_000_000_000;

// =============================================================================
// PIPELINE CONSTANTS
// =============================================================================

/// Records older than this many blocks are no longer matched.
pub const ATTRIBUTION_MAX_BLOCK_AGE: u64 = 50;
/// Trailing window scanned each attribution tick.
pub const ATTRIBUTION_SCAN_DEPTH: u64 = 5;
/// Minimum normalized similarity for an attestation.
pub const SIMILARITY_THRESHOLD: f64 = 0.8;
/// Similarity above which a matched record reinforces its pattern.
pub const REINFORCEMENT_SIMILARITY: f64 = 0.9;

/// Emission lock is considered stale after this many milliseconds.
pub const LOCK_STALE_MS: u64 = 5 * 60 * 1000;
/// Bounded wait for a live lock holder to release, in milliseconds.
pub const LOCK_GRACE_MS: u64 = 30_000;
/// Poll interval inside the grace window.
pub const LOCK_POLL_MS: u64 = 5_000;

/// Nonce cache is refreshed after this many milliseconds.
pub const NONCE_STALE_MS: u64 = 60_000;

lazy_static! {
    // 0.0001 ETH floor under any computed trade size.
    pub static ref MIN_TRADE_WEI: U256 = U256::from(100_000_000_000_000u64);

    // 0.000618 ETH phi-scaled sizing base.
    pub static ref TRADE_BASE_WEI: U256 = U256::from(618_000_000_000_000u64);

    // Tokens the amplifier will touch. Everything else fails legibility checks.
    pub static ref TOKEN_WHITELIST: Vec<Address> = vec![
        WETH_BASE, USDC_BASE, USDBC_BASE, DAI_BASE, CBETH_BASE, AERO_BASE,
    ];

    // -------------------------
    // DEX Routers (Base)
    // -------------------------

    pub static ref DEX_ROUTERS_BASE: HashMap<&'static str, Address> = {
        let mut m = HashMap::new();

        // Uniswap
        m.insert("uniswap_v3_swaprouter02", address!("2626664c2603336E57B271c5C0b26F421741e481"));
        m.insert("uniswap_v2_router02", address!("4752ba5DBc23f44D87826276BF6Fd6b1C372aD24"));

        // BaseSwap (UniV2-style fork)
        m.insert("baseswap_router", address!("327Df1E6de05895d2ab08513aaDD9313Fe505d86"));

        // Aerodrome (solidly-style routes)
        m.insert("aerodrome_router", address!("cF77a3Ba9A5CA399B7c97c74d54e5b1Beb874E43"));

        m
    };

    // -------------------------
    // V2 factories probed for pair reserves (closed list)
    // -------------------------

    pub static ref PAIR_FACTORIES_BASE: Vec<Address> = vec![
        address!("8909Dc15e40173Ff4699343b6eB8132c65e18eC6"), // uniswap v2
        address!("FDa619b6d20975be80A10332cD39b9a4b0FAa8BB"), // baseswap
    ];

    // Pair -> v3 fee tier, for concentrated-liquidity swaps.
    pub static ref V3_FEE_BY_PAIR: HashMap<(Address, Address), u32> = {
        let mut m = HashMap::new();
        m.insert((WETH_BASE, USDC_BASE), 500);
        m.insert((USDC_BASE, WETH_BASE), 500);
        m.insert((WETH_BASE, DAI_BASE), 3000);
        m.insert((DAI_BASE, WETH_BASE), 3000);
        m.insert((USDC_BASE, DAI_BASE), 100);
        m.insert((DAI_BASE, USDC_BASE), 100);
        m.insert((WETH_BASE, AERO_BASE), 3000);
        m.insert((AERO_BASE, WETH_BASE), 3000);
        m
    };
}

pub fn router_whitelist() -> Vec<Address> {
    DEX_ROUTERS_BASE.values().copied().collect()
}

pub fn v3_fee_for_pair(from: Address, to: Address) -> u32 {
    V3_FEE_BY_PAIR.get(&(from, to)).copied().unwrap_or(3000)
}

// =============================================================================
// LOGGING DEFAULTS
// =============================================================================

pub const DEFAULT_LOG_LEVEL: &str = "info";
