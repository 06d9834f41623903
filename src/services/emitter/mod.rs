// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

//! The emitter: single-writer, lock-guarded signal publication on a fixed
//! cadence. One tick runs the full acquire → select → build → submit →
//! confirm → persist sequence; ticks never overlap.

pub mod market;
pub mod selector;

use crate::common::metrics::ProcessStats;
use crate::common::time::current_unix_ms;
use crate::domain::constants::{
    ESCALATED_PRIORITY_CAP_WEI, MAX_FEE_CAP_WEI, SIGNAL_BASE_GAS_LIMIT,
};
use crate::domain::error::AppError;
use crate::domain::phi::{INV_PHI, PHI, PHI_SQUARED};
use crate::infrastructure::data::record_store::RecordStore;
use crate::infrastructure::data::schema::{CompressedRecord, LatestJam, SignalRecord};
use crate::infrastructure::data::state_store::StateStore;
use crate::infrastructure::network::contracts::Dmap;
use crate::infrastructure::network::echo::EchoChain;
use crate::infrastructure::network::gas::GasOracle;
use crate::infrastructure::network::nonce::NonceManager;
use crate::infrastructure::network::relay::sign_eip1559;
use crate::infrastructure::network::rpc::{FailoverRpc, ReceiptProbe};
use alloy::primitives::{Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy_sol_types::{SolCall, SolEvent};
use rand::Rng;
use selector::Selection;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::sleep;

const SUBMIT_ATTEMPTS: u32 = 5;
const CONFIRM_POLL: Duration = Duration::from_secs(3);
const FUNDS_PAUSE: Duration = Duration::from_secs(30);

#[derive(Clone, Copy)]
enum Confirmation {
    Confirmed { block: u64, timestamp_ms: u64 },
    Optimistic(&'static str),
    Reverted,
}

pub struct Emitter {
    pub rpc: Arc<FailoverRpc>,
    pub store: RecordStore,
    pub state: StateStore,
    pub nonce: NonceManager,
    pub gas: GasOracle,
    pub signer: PrivateKeySigner,
    pub echo: Arc<EchoChain>,
    pub stats: Arc<ProcessStats>,
    pub chain_id: u64,
    pub dmap: Address,
    pub category_id: u64,
    pub interval: Duration,
    pub dry_run: bool,
}

impl Emitter {
    pub async fn run(self) -> Result<(), AppError> {
        tracing::info!(
            target: "emitter",
            interval_ms = self.interval.as_millis() as u64,
            dmap = %self.dmap,
            "Emitter loop starting"
        );
        loop {
            if let Err(e) = self.tick().await {
                self.stats.emission_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(target: "emitter", error = %e, "Tick failed");
            }
            // Next tick is scheduled only after the previous one completed.
            sleep(self.interval).await;
        }
    }

    pub async fn tick(&self) -> Result<(), AppError> {
        if !self.state.acquire_emission_lock().await {
            tracing::info!(target: "emitter", "Lock unavailable, skipping tick");
            return Ok(());
        }
        let result = self.locked_tick().await;
        self.state.release_emission_lock();
        result
    }

    async fn locked_tick(&self) -> Result<(), AppError> {
        let nonce = self.nonce.next().await?;

        let state = self.state.load();
        let now_ms = current_unix_ms();
        let selection = selector::select(&state.metrics.patterns, now_ms, None);
        let Selection::Pattern {
            pattern,
            score,
            window_multiplier,
        } = selection
        else {
            self.stats.vetoed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };

        let steps = pattern.steps();
        let snapshot = market::fetch_market(&self.rpc, &[(steps[0].from, steps[0].to)]).await;
        tracing::info!(
            target: "emitter",
            pattern = pattern.name(),
            score,
            gas_gwei = snapshot.gas_gwei,
            "Pattern selected"
        );

        // Build and persist the record before any submission is attempted.
        let parent_hash = state.last_hash.clone();
        let cascade_depth = parent_hash
            .as_deref()
            .and_then(|p| self.store.get(p))
            .map(|parent| parent.cascade_depth + 1)
            .unwrap_or(1);
        let resonance = ((score + window_multiplier) * INV_PHI).min(PHI_SQUARED);
        let mut record = SignalRecord::new(
            pattern,
            parent_hash,
            cascade_depth,
            resonance,
            now_ms,
        );
        record.meta.bait_hooks = vec![
            "REVERSIBLE".to_string(),
            format!("PAIR:{:#x}->{:#x}", steps[0].from, steps[0].to),
        ];
        self.store.put(&record);
        self.state.record_attempt(pattern.name(), now_ms);

        let fees = self.gas.estimate().await?;
        let gas_limit = signal_gas_limit(cascade_depth, resonance);

        // Pre-flight: the wallet must cover the estimated cost with headroom.
        let est_cost = U256::from(gas_limit as u128 * fees.max_fee_per_gas);
        let required = mul_f64(est_cost, PHI_SQUARED);
        let available = self.rpc.balance(self.signer.address()).await?;
        if available < required {
            self.state.bump_error("insufficient_funds");
            tracing::warn!(
                target: "emitter",
                required = %required,
                available = %available,
                "Insufficient funds, keeping record off-chain"
            );
            sleep(FUNDS_PAUSE).await;
            return Ok(());
        }

        if self.dry_run {
            tracing::info!(target: "emitter", hash = %record.hash, "Dry-run: would register signal");
            return Ok(());
        }

        let tx_hash = self
            .submit_with_escalation(&record, nonce, fees.max_fee_per_gas, fees.max_priority_fee_per_gas, gas_limit)
            .await?;
        self.nonce.add_pending(tx_hash).await;
        self.nonce.increment().await;

        let confirmation = self.await_confirmation(tx_hash).await;
        self.nonce.remove_pending(tx_hash).await;

        let block_label = match confirmation {
            Confirmation::Confirmed { block, .. } => block.to_string(),
            Confirmation::Optimistic(reason) => reason.to_string(),
            Confirmation::Reverted => {
                self.state.bump_error("reverted");
                tracing::warn!(target: "emitter", tx = %tx_hash, "registerSignal reverted, not retrying");
                return Ok(());
            }
        };

        if let Confirmation::Confirmed { block, .. } = confirmation {
            self.bind_registry_identity(&record.hash, tx_hash, block).await;
        }

        self.store.update(&record.hash, |r| {
            r.onchain_tx = Some(format!("{tx_hash:#x}"));
        });
        self.store.append_successful(&CompressedRecord {
            hash: record.hash.clone(),
            pattern: pattern.name().to_string(),
            intent_class: record.meta.intent_class.clone(),
            cascade_depth,
            resonance,
            created_at: record.created_at,
            onchain_tx: Some(format!("{tx_hash:#x}")),
            block_number: block_label.clone(),
        });
        self.state.set_last_hash(&record.hash);
        self.state.record_success(pattern.name());

        let confirmed_timestamp = match confirmation {
            Confirmation::Confirmed { timestamp_ms, .. } => timestamp_ms,
            _ => record.created_at,
        };
        self.store.write_latest(&LatestJam {
            hash: record.hash.clone(),
            confirmed_timestamp,
        });

        self.stats.emitted.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target: "emitter",
            hash = %record.hash,
            tx = %tx_hash,
            block = %block_label,
            depth = cascade_depth,
            resonance,
            "Signal registered"
        );

        if self.echo.is_empty() {
            return Ok(());
        }
        let echo = self.echo.clone();
        let store = self.store.clone();
        let stats = self.stats.clone();
        let hash = record.hash.clone();
        let echoed = record.clone();
        tokio::spawn(async move {
            let topology = echo.publish(&echoed).await;
            stats.echoes.fetch_add(1, Ordering::Relaxed);
            store.update(&hash, |r| r.recursive_topology = topology);
        });
        Ok(())
    }

    /// Submission retry loop with class-aware fee escalation.
    async fn submit_with_escalation(
        &self,
        record: &SignalRecord,
        initial_nonce: u64,
        mut max_fee: u128,
        mut priority: u128,
        gas_limit: u64,
    ) -> Result<B256, AppError> {
        let mut nonce = initial_nonce;
        let mut last_error = String::new();

        for attempt in 1..=SUBMIT_ATTEMPTS {
            // Unique suffix keeps the registry from colliding descriptions.
            let description = format!(
                "{{\"pattern\":\"{}\",\"resonance\":{:.4},\"uuid\":\"{}_{}_{}_{}\",\"tags\":\"PHI_ALIGNED,REVERSIBLE\"}}",
                record.pattern.name(),
                record.resonance,
                current_unix_ms(),
                rand::thread_rng().gen::<u32>(),
                std::process::id(),
                attempt,
            );
            let calldata = Dmap::registerSignalCall {
                description,
                categoryId: U256::from(self.category_id),
            }
            .abi_encode();

            let (raw, _) = sign_eip1559(
                &self.signer,
                self.chain_id,
                nonce,
                self.dmap,
                U256::ZERO,
                gas_limit,
                max_fee,
                priority,
                calldata,
            )?;

            match self.rpc.send_raw_tx(&raw).await {
                Ok(hash) => return Ok(hash),
                Err(e) => {
                    last_error = e.to_string();
                    let lower = last_error.to_ascii_lowercase();
                    if lower.contains("underpriced") {
                        priority = mul_u128(priority, PHI).min(ESCALATED_PRIORITY_CAP_WEI);
                        max_fee = mul_u128(max_fee, PHI).min(MAX_FEE_CAP_WEI);
                        self.state.bump_error("underpriced");
                    } else if lower.contains("nonce") || lower.contains("already known") {
                        self.nonce.reset().await;
                        nonce = self.nonce.next().await?;
                        self.state.bump_error("nonce");
                    } else {
                        priority = mul_u128(priority, 1.2).min(ESCALATED_PRIORITY_CAP_WEI);
                        max_fee = mul_u128(max_fee, 1.2).min(MAX_FEE_CAP_WEI);
                        self.state.bump_error("submit_other");
                    }
                    tracing::warn!(
                        target: "emitter",
                        attempt,
                        error = %last_error,
                        next_priority = priority,
                        "registerSignal submission failed"
                    );
                    let jitter = rand::thread_rng().gen_range(0..250);
                    sleep(Duration::from_millis(
                        (PHI * 1000.0) as u64 * attempt as u64 + jitter,
                    ))
                    .await;
                }
            }
        }

        Err(AppError::Transaction {
            hash: String::new(),
            reason: format!("registerSignal failed after {SUBMIT_ATTEMPTS} attempts: {last_error}"),
        })
    }

    /// Bounded confirmation wait; an unreadable receipt after broadcast is
    /// optimistic success, labeled with the fault class.
    async fn await_confirmation(&self, tx_hash: B256) -> Confirmation {
        let deadline = current_unix_ms() + (PHI * 30_000.0) as u64;
        while current_unix_ms() < deadline {
            match self.rpc.receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if !receipt.status() {
                        return Confirmation::Reverted;
                    }
                    let block = receipt.block_number.unwrap_or_default();
                    let timestamp_ms = match self.rpc.block(block).await {
                        Ok(Some(b)) => b.header.timestamp * 1000,
                        _ => current_unix_ms(),
                    };
                    return Confirmation::Confirmed {
                        block,
                        timestamp_ms,
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(target: "emitter", error = %e, "Receipt poll failed");
                }
            }
            sleep(CONFIRM_POLL).await;
        }

        match self.rpc.receipt_probe(tx_hash).await {
            ReceiptProbe::Confirmed(receipt) => {
                if !receipt.status() {
                    return Confirmation::Reverted;
                }
                let block = receipt.block_number.unwrap_or_default();
                Confirmation::Confirmed {
                    block,
                    timestamp_ms: current_unix_ms(),
                }
            }
            ReceiptProbe::NotFound => Confirmation::Optimistic("error_recovery"),
            ReceiptProbe::Pending(reason) => Confirmation::Optimistic(reason),
        }
    }

    /// Bind the registry-assigned hash from the receipt's event to the
    /// stored record, verifying via `getSignal` when possible.
    async fn bind_registry_identity(&self, content_hash: &str, tx_hash: B256, block: u64) {
        let Ok(Some(receipt)) = self.rpc.receipt(tx_hash).await else {
            return;
        };
        let registry_hash = receipt
            .inner
            .logs()
            .iter()
            .filter(|log| log.address() == self.dmap)
            .find_map(|log| {
                (log.topic0() == Some(&Dmap::SignalRegistered::SIGNATURE_HASH))
                    .then(|| log.data().topics().get(1).copied())
                    .flatten()
            });
        let Some(registry_hash) = registry_hash else {
            tracing::warn!(target: "emitter", tx = %tx_hash, block, "No SignalRegistered event in receipt");
            return;
        };

        let registry_hex = format!("{registry_hash:#x}");
        self.store.put_registry_alias(&registry_hex, content_hash);
        self.store.update(content_hash, |r| {
            r.meta.registry_hash = Some(registry_hex.clone());
        });

        // Best-effort identity verification against the registry.
        let calldata = Dmap::getSignalCall {
            hash: registry_hash,
        }
        .abi_encode();
        let probe = alloy::rpc::types::eth::TransactionRequest {
            to: Some(alloy::primitives::TxKind::Call(self.dmap)),
            input: alloy::rpc::types::eth::TransactionInput::new(calldata.into()),
            ..Default::default()
        };
        match self.rpc.call(probe).await {
            Ok(out) => match Dmap::getSignalCall::abi_decode_returns(&out) {
                Ok(ret) if ret.emitter == self.signer.address() => {}
                Ok(ret) => {
                    tracing::warn!(
                        target: "emitter",
                        expected = %self.signer.address(),
                        got = %ret.emitter,
                        "Registry binds signal to a different emitter"
                    );
                }
                Err(e) => {
                    tracing::debug!(target: "emitter", error = %e, "getSignal decode failed");
                }
            },
            Err(e) => {
                tracing::debug!(target: "emitter", error = %e, "getSignal probe failed");
            }
        }
    }
}

/// Gas limit scaled by cascade depth and resonance.
pub fn signal_gas_limit(cascade_depth: u32, resonance: f64) -> u64 {
    let depth_multiplier = (1.0 + 0.1 * (cascade_depth.saturating_sub(1)) as f64).min(1.5);
    let resonance_multiplier = (resonance / PHI).clamp(1.0, 1.5);
    (SIGNAL_BASE_GAS_LIMIT as f64 * depth_multiplier * resonance_multiplier) as u64
}

fn mul_u128(value: u128, factor: f64) -> u128 {
    (value as f64 * factor) as u128
}

fn mul_f64(value: U256, factor: f64) -> U256 {
    // Scale through parts-per-million to stay in integer math.
    let ppm = (factor * 1_000_000.0) as u64;
    value * U256::from(ppm) / U256::from(1_000_000u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_limit_scales_with_depth_and_resonance() {
        let flat = signal_gas_limit(1, 1.0);
        assert_eq!(flat, SIGNAL_BASE_GAS_LIMIT);

        let deep = signal_gas_limit(4, 1.0);
        assert!(deep > flat);

        let resonant = signal_gas_limit(1, PHI_SQUARED);
        assert!(resonant > flat);

        // Multipliers saturate.
        assert_eq!(signal_gas_limit(100, 100.0), signal_gas_limit(6, 3.0));
    }

    #[test]
    fn preflight_headroom_is_phi_squared() {
        let cost = U256::from(1_000_000u64);
        let required = mul_f64(cost, PHI_SQUARED);
        assert_eq!(required, U256::from(2_618_033u64));
    }

    #[test]
    fn fee_escalation_respects_caps() {
        let escalated = mul_u128(2_500_000_000, PHI).min(ESCALATED_PRIORITY_CAP_WEI);
        assert_eq!(escalated, ESCALATED_PRIORITY_CAP_WEI);
        let fee = mul_u128(60_000_000_000, PHI).min(MAX_FEE_CAP_WEI);
        assert_eq!(fee, MAX_FEE_CAP_WEI);
    }
}
