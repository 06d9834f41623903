// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::constants::MAX_PRIORITY_FEE_WEI;
use crate::domain::error::AppError;
use crate::domain::phi::INV_PHI;
use crate::infrastructure::network::rpc::FailoverRpc;
use alloy::rpc::types::eth::FeeHistory;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct GasFees {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub base_fee_per_gas: u128,
}

/// EIP-1559 fee estimator over the failover client, with a last-good cache
/// and a latest-block fallback for nodes that disable feeHistory.
#[derive(Clone)]
pub struct GasOracle {
    rpc: Arc<FailoverRpc>,
    last_good: Arc<Mutex<Option<GasFees>>>,
}

impl GasOracle {
    pub fn new(rpc: Arc<FailoverRpc>) -> Self {
        Self {
            rpc,
            last_good: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn estimate(&self) -> Result<GasFees, AppError> {
        match self.rpc.fee_history(5).await {
            Ok(history) => {
                let fees = Self::fees_from_history(history)?;
                if let Ok(mut guard) = self.last_good.lock() {
                    *guard = Some(fees.clone());
                }
                Ok(fees)
            }
            Err(_) => {
                if let Ok(guard) = self.last_good.lock() {
                    if let Some(fees) = guard.clone() {
                        return Ok(fees);
                    }
                }
                self.fallback_estimate().await
            }
        }
    }

    fn fees_from_history(history: FeeHistory) -> Result<GasFees, AppError> {
        let latest_base_fee = history
            .latest_block_base_fee()
            .or_else(|| history.base_fee_per_gas.iter().rev().nth(1).copied())
            .ok_or(AppError::Initialization("No base fee history".into()))?;

        let mut tip_sum = 0u128;
        let mut tip_count = 0u128;
        if let Some(rewards) = &history.reward {
            for block_reward in rewards {
                if let Some(r) = block_reward.first() {
                    tip_sum = tip_sum.saturating_add(*r);
                    tip_count = tip_count.saturating_add(1);
                }
            }
        }
        let avg_tip = if tip_count > 0 {
            tip_sum / tip_count
        } else {
            // Base sequencers are happy with a small tip.
            10_000_000
        };

        Ok(Self::emission_fees(latest_base_fee, avg_tip))
    }

    async fn fallback_estimate(&self) -> Result<GasFees, AppError> {
        let block = self.rpc.latest_block().await?;
        let base: u128 = block
            .as_ref()
            .and_then(|b| b.header.base_fee_per_gas)
            .map(|v| v as u128)
            .unwrap_or(50_000_000u128); // 0.05 gwei conservative default on Base

        Ok(Self::emission_fees(base, 10_000_000))
    }

    /// Priority is the observed tip clamped to the 2 gwei ceiling; the max
    /// fee is the base fee scaled by the inverse weighting constant plus
    /// the priority component. Viable on Base where the base fee is tiny
    /// relative to the tip.
    pub fn emission_fees(base_fee: u128, observed_tip: u128) -> GasFees {
        let priority = observed_tip.min(MAX_PRIORITY_FEE_WEI);
        let scaled_base = ((base_fee as f64) * INV_PHI) as u128;
        GasFees {
            max_fee_per_gas: scaled_base.saturating_add(priority),
            max_priority_fee_per_gas: priority,
            base_fee_per_gas: base_fee,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::phi::PHI;

    #[test]
    fn priority_is_clamped_to_two_gwei() {
        let fees = GasOracle::emission_fees(1_000_000_000, 9_000_000_000);
        assert_eq!(fees.max_priority_fee_per_gas, MAX_PRIORITY_FEE_WEI);
    }

    #[test]
    fn max_fee_is_scaled_base_plus_priority() {
        let base = 1_000_000_000u128;
        let tip = 100_000_000u128;
        let fees = GasOracle::emission_fees(base, tip);
        let expected_base = ((base as f64) / PHI) as u128;
        assert_eq!(fees.max_fee_per_gas, expected_base + tip);
    }
}
