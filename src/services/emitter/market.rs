// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

//! Market snapshot for emission-time sizing. Pair reserves come from a
//! small closed factory list; any failure degrades to defaults instead of
//! blocking the tick.

use crate::domain::constants::PAIR_FACTORIES_BASE;
use crate::domain::error::AppError;
use crate::infrastructure::network::contracts::{UniV2Factory, UniV2Pair};
use crate::infrastructure::network::rpc::FailoverRpc;
use alloy::primitives::{Address, TxKind, U256};
use alloy::rpc::types::eth::{TransactionInput, TransactionRequest};
use alloy_sol_types::SolCall;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub gas_gwei: f64,
    /// Oriented reserves per `(from, to)` pair.
    pub reserves: HashMap<(Address, Address), (U256, U256)>,
}

impl MarketSnapshot {
    pub fn reserve_depth(&self, from: Address, to: Address) -> Option<(U256, U256)> {
        self.reserves.get(&(from, to)).copied()
    }
}

fn view_call(to: Address, calldata: Vec<u8>) -> TransactionRequest {
    TransactionRequest {
        to: Some(TxKind::Call(to)),
        input: TransactionInput::new(calldata.into()),
        ..Default::default()
    }
}

async fn pair_address(
    rpc: &FailoverRpc,
    factory: Address,
    token_a: Address,
    token_b: Address,
) -> Result<Address, AppError> {
    let calldata = UniV2Factory::getPairCall {
        tokenA: token_a,
        tokenB: token_b,
    }
    .abi_encode();
    let out = rpc.call(view_call(factory, calldata)).await?;
    UniV2Factory::getPairCall::abi_decode_returns(&out)
        .map_err(|e| AppError::Strategy(format!("getPair decode failed: {e}")))
}

async fn oriented_reserves(
    rpc: &FailoverRpc,
    pair: Address,
    from: Address,
) -> Result<(U256, U256), AppError> {
    let out = rpc
        .call(view_call(pair, UniV2Pair::getReservesCall {}.abi_encode()))
        .await?;
    let reserves = UniV2Pair::getReservesCall::abi_decode_returns(&out)
        .map_err(|e| AppError::Strategy(format!("getReserves decode failed: {e}")))?;

    let out = rpc
        .call(view_call(pair, UniV2Pair::token0Call {}.abi_encode()))
        .await?;
    let token0 = UniV2Pair::token0Call::abi_decode_returns(&out)
        .map_err(|e| AppError::Strategy(format!("token0 decode failed: {e}")))?;

    let r0 = U256::from(reserves.reserve0.to::<u128>());
    let r1 = U256::from(reserves.reserve1.to::<u128>());
    if token0 == from {
        Ok((r0, r1))
    } else {
        Ok((r1, r0))
    }
}

/// Snapshot the pairs we may announce. Missing pairs and RPC faults leave
/// gaps; the caller sizes from defaults where data is absent.
pub async fn fetch_market(rpc: &FailoverRpc, pairs: &[(Address, Address)]) -> MarketSnapshot {
    let mut snapshot = MarketSnapshot::default();

    match rpc.fee_history(3).await {
        Ok(history) => {
            if let Some(base) = history.latest_block_base_fee() {
                snapshot.gas_gwei = base as f64 / 1e9;
            }
        }
        Err(e) => {
            tracing::debug!(target: "market", error = %e, "Fee history unavailable for snapshot");
        }
    }

    for &(from, to) in pairs {
        let mut found = None;
        for &factory in PAIR_FACTORIES_BASE.iter() {
            match pair_address(rpc, factory, from, to).await {
                Ok(pair) if pair != Address::ZERO => {
                    match oriented_reserves(rpc, pair, from).await {
                        Ok(depth) => {
                            found = Some(depth);
                            break;
                        }
                        Err(e) => {
                            tracing::debug!(target: "market", pair = %pair, error = %e, "Reserve read failed");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(target: "market", factory = %factory, error = %e, "getPair failed");
                }
            }
        }
        if let Some(depth) = found {
            snapshot.reserves.insert((from, to), depth);
        }
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::constants::{USDC_BASE, WETH_BASE};

    #[test]
    fn missing_pair_reads_as_none() {
        let snapshot = MarketSnapshot::default();
        assert!(snapshot.reserve_depth(WETH_BASE, USDC_BASE).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_rpc_degrades_to_defaults() {
        let rpc = FailoverRpc::new(&["http://127.0.0.1:1/".to_string()]).unwrap();
        let snapshot = fetch_market(&rpc, &[(WETH_BASE, USDC_BASE)]).await;
        assert_eq!(snapshot.gas_gwei, 0.0);
        assert!(snapshot.reserves.is_empty());
    }
}
