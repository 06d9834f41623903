// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

//! The amplifier: watches for our own registered signals, executes the
//! public bait leg against the first accepting router in the cascade, and
//! submits the mirror capture bundle for the block after the bait lands.

pub mod cascade;
pub mod trade;

use crate::common::metrics::ProcessStats;
use crate::common::seen_cache::remember_with_bounded_order;
use crate::common::time::{current_unix, current_unix_ms};
use crate::domain::constants::{SWAP_GAS_LIMIT, TRANSFER_GAS_LIMIT};
use crate::domain::error::AppError;
use crate::domain::phi::PHI_SQUARED;
use crate::infrastructure::data::record_store::RecordStore;
use crate::infrastructure::data::schema::{LatestJam, ProfitRecord, SignalRecord};
use crate::infrastructure::network::contracts::{Dmap, Erc20};
use crate::infrastructure::network::echo::EchoChain;
use crate::infrastructure::network::gas::GasOracle;
use crate::infrastructure::network::relay::{BundleOutcome, BundleSender, sign_eip1559};
use crate::infrastructure::network::rpc::FailoverRpc;
use crate::services::emitter::selector;
use alloy::consensus::Transaction as _;
use alloy::primitives::{Address, B256, TxKind, U256};
use alloy::rpc::types::eth::{Filter, TransactionInput, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy_sol_types::{SolCall, SolEvent};
use dashmap::DashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

const POLL_INTERVAL: Duration = Duration::from_secs(12);
const BAIT_DELAY: Duration = Duration::from_secs(10);
const BAIT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(90);
const BAIT_CONFIRM_POLL: Duration = Duration::from_secs(2);
const SWAP_DEADLINE_SECS: u64 = 300;
const OUTER_BACKOFFS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(30),
];
/// Share of the expected edge paid forward to the proposer.
const BRIBE_SHARE_PPM: u64 = 800_000;
/// Slippage applied to quoted capture output, parts-per-million.
const SLIPPAGE_PPM: u64 = 950_000;
/// Bounded dedupe window for already-handled signal events.
const SEEN_MAX: usize = 1_024;

struct BaitReceipt {
    tx_hash: B256,
    block: u64,
    timestamp_ms: u64,
    effective_gas_price: u128,
}

pub struct Amplifier {
    pub rpc: Arc<FailoverRpc>,
    pub store: RecordStore,
    pub gas: GasOracle,
    pub bundles: BundleSender,
    pub signer: PrivateKeySigner,
    pub mirror_signer: PrivateKeySigner,
    pub echo: Arc<EchoChain>,
    pub stats: Arc<ProcessStats>,
    pub chain_id: u64,
    pub dmap: Address,
    pub vault: Address,
    pub wallet_address: Address,
    pub max_gas_gwei: u64,
    pub honeypot_address: Option<Address>,
    pub dry_run: bool,
    last_processed: AtomicU64,
    is_amplifying: AtomicBool,
    seen: DashSet<B256>,
    seen_order: Mutex<VecDeque<B256>>,
}

impl Amplifier {
    pub fn new(
        rpc: Arc<FailoverRpc>,
        store: RecordStore,
        gas: GasOracle,
        bundles: BundleSender,
        signer: PrivateKeySigner,
        mirror_signer: PrivateKeySigner,
        echo: Arc<EchoChain>,
        stats: Arc<ProcessStats>,
        chain_id: u64,
        dmap: Address,
        vault: Address,
        wallet_address: Address,
        max_gas_gwei: u64,
        honeypot_address: Option<Address>,
        dry_run: bool,
    ) -> Self {
        Self {
            rpc,
            store,
            gas,
            bundles,
            signer,
            mirror_signer,
            echo,
            stats,
            chain_id,
            dmap,
            vault,
            wallet_address,
            max_gas_gwei,
            honeypot_address,
            dry_run,
            last_processed: AtomicU64::new(0),
            is_amplifying: AtomicBool::new(false),
            seen: DashSet::new(),
            seen_order: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn run(self) -> Result<(), AppError> {
        tracing::info!(target: "amplifier", dmap = %self.dmap, "Amplifier loop starting");
        let head = self.rpc.block_number().await?;
        self.last_processed.store(head, Ordering::Relaxed);

        loop {
            if let Err(e) = self.poll_once().await {
                tracing::error!(target: "amplifier", error = %e, "Poll failed");
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn poll_once(&self) -> Result<(), AppError> {
        // One signal at a time; a long-running amplification simply delays
        // the next poll from picking up newer events.
        if self.is_amplifying.load(Ordering::Relaxed) {
            return Ok(());
        }

        let head = self.rpc.block_number().await?;
        let from = self.last_processed.load(Ordering::Relaxed) + 1;
        if from > head {
            return Ok(());
        }

        let filter = Filter::new()
            .address(self.dmap)
            .event_signature(Dmap::SignalRegistered::SIGNATURE_HASH)
            .from_block(from)
            .to_block(head);
        let logs = self.rpc.logs(filter).await?;

        self.is_amplifying.store(true, Ordering::Relaxed);
        for log in logs {
            let Some(registry_hash) = log.data().topics().get(1).copied() else {
                continue;
            };
            let Some(emit_tx) = log.transaction_hash else {
                continue;
            };
            // Ranges can be re-read after an error; never replay a signal.
            if !remember_with_bounded_order(&self.seen, &self.seen_order, registry_hash, SEEN_MAX)
                .await
            {
                continue;
            }
            self.handle_signal_with_retry(registry_hash, emit_tx).await;
        }
        self.is_amplifying.store(false, Ordering::Relaxed);

        self.last_processed.store(head, Ordering::Relaxed);
        Ok(())
    }

    async fn handle_signal_with_retry(&self, registry_hash: B256, emit_tx: B256) {
        for (attempt, backoff) in OUTER_BACKOFFS.iter().enumerate() {
            match self.handle_signal(registry_hash, emit_tx).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(
                        target: "amplifier",
                        signal = %registry_hash,
                        attempt = attempt + 1,
                        error = %e,
                        "Amplification attempt failed"
                    );
                    sleep(*backoff).await;
                }
            }
        }
        self.stats.captures_failed.fetch_add(1, Ordering::Relaxed);
        tracing::error!(target: "amplifier", signal = %registry_hash, "Amplification abandoned");
    }

    async fn handle_signal(&self, registry_hash: B256, emit_tx: B256) -> Result<(), AppError> {
        // Only act on our own emitter's signals.
        let tx = self
            .rpc
            .transaction(emit_tx)
            .await?
            .ok_or_else(|| AppError::Strategy("Emitting transaction not found".into()))?;
        let from = tx.inner.signer();
        if from != self.wallet_address {
            tracing::debug!(target: "amplifier", from = %from, "Foreign signal, skipping");
            return Ok(());
        }
        if tx.to() == Some(self.vault) {
            let input = tx.input().to_vec();
            if Dmap::emitSignalCall::abi_decode(&input).is_err() {
                tracing::debug!(target: "amplifier", "Vault-routed tx is not emitSignal, skipping");
                return Ok(());
            }
        }

        // De-obviousness pause between the signal landing and the bait.
        sleep(BAIT_DELAY).await;

        let registry_hex = format!("{registry_hash:#x}");
        let content_hash = self
            .store
            .resolve_registry_hash(&registry_hex)
            .or_else(|| self.store.read_latest().map(|l| l.hash))
            .ok_or_else(|| AppError::Store("No record for registered signal".into()))?;
        let record = self
            .store
            .get(&content_hash)
            .ok_or_else(|| AppError::Store(format!("Record {content_hash} missing")))?;

        if !record.meta.audit_pass {
            tracing::debug!(target: "amplifier", hash = %record.hash, "Audit gate closed, skipping");
            return Ok(());
        }

        let amplifier_step = record
            .amplifier_step()
            .ok_or_else(|| AppError::Validation {
                field: "steps".into(),
                message: "no amplifier step".into(),
            })?
            .clone();
        let mirror_step = record
            .mirror_step()
            .ok_or_else(|| AppError::Validation {
                field: "steps".into(),
                message: "no mirror step".into(),
            })?
            .clone();
        if !record.has_reverse_pattern() || record.resonance < 1.0 {
            tracing::info!(
                target: "amplifier",
                hash = %record.hash,
                resonance = record.resonance,
                "Pattern not amplifiable, skipping"
            );
            return Ok(());
        }

        let fees = self.gas.estimate().await?;
        let gas_gwei = fees.base_fee_per_gas as f64 / 1e9;
        let confidence = (record.resonance / PHI_SQUARED).min(1.0);
        let window = selector::window_multiplier(selector::minute_of_day(current_unix())).unwrap_or(1.0);
        let trade_amount = trade::compute_trade_amount(
            amplifier_step.from,
            amplifier_step.to,
            gas_gwei,
            confidence,
            window,
        );
        trade::validate_legibility(amplifier_step.from, amplifier_step.to, trade_amount).map_err(
            |message| AppError::Validation {
                field: "pattern".into(),
                message,
            },
        )?;

        let order = cascade::cascade(
            record.resonance,
            record.cascade_depth,
            &record.recursive_topology,
        );

        self.prefund_mirror(mirror_step.from).await;

        let balance_before = self.rpc.balance(self.wallet_address).await?;
        let mut bait: Option<(cascade::DexId, BaitReceipt)> = None;
        for dex in order {
            match self
                .execute_bait(dex, &amplifier_step, trade_amount, fees.max_priority_fee_per_gas)
                .await
            {
                Ok(receipt) => {
                    bait = Some((dex, receipt));
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        target: "amplifier",
                        dex = dex.name,
                        error = %e,
                        "Bait rejected, trying next router"
                    );
                }
            }
        }
        let Some((dex, bait)) = bait else {
            self.store.append_profit(&ProfitRecord {
                timestamp: current_unix_ms(),
                signal_hash: record.hash.clone(),
                bait_tx: None,
                target_block: None,
                balance_before_wei: balance_before.to_string(),
                balance_after_wei: balance_before.to_string(),
                success: false,
                reason: Some("All DEX cascades failed".to_string()),
            });
            self.stats.captures_failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(target: "amplifier", hash = %record.hash, "Cascade exhausted");
            return Ok(());
        };

        // Stamp the record and the sync beacon with the bait confirmation.
        self.store.update(&record.hash, |r| {
            r.amplification_at = Some(bait.timestamp_ms);
            r.amplification_block = Some(bait.block);
        });
        self.store.write_latest(&LatestJam {
            hash: record.hash.clone(),
            confirmed_timestamp: bait.timestamp_ms,
        });

        let outcome = self
            .capture(&record, dex, &mirror_step, &bait, balance_before)
            .await?;
        if outcome == BundleOutcome::Included {
            self.stats.amplified.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.captures_failed.fetch_add(1, Ordering::Relaxed);
        }

        self.best_effort_followups(&record).await;
        Ok(())
    }

    /// Move any primary-wallet inventory of the capture input token over to
    /// the mirror before the bait lands.
    async fn prefund_mirror(&self, token: Address) {
        let result: Result<(), AppError> = async {
            let balance = self.erc20_balance(token, self.wallet_address).await?;
            if balance.is_zero() {
                return Ok(());
            }
            if self.dry_run {
                tracing::info!(target: "amplifier", token = %token, amount = %balance, "Dry-run: would pre-fund mirror");
                return Ok(());
            }
            let fees = self.gas.estimate().await?;
            let nonce = self.rpc.transaction_count(self.wallet_address).await?;
            let calldata = Erc20::transferCall {
                to: self.mirror_signer.address(),
                amount: balance,
            }
            .abi_encode();
            let (raw, hash) = sign_eip1559(
                &self.signer,
                self.chain_id,
                nonce,
                token,
                U256::ZERO,
                SWAP_GAS_LIMIT,
                self.capped_fee(fees.max_fee_per_gas),
                fees.max_priority_fee_per_gas,
                calldata,
            )?;
            self.rpc.send_raw_tx(&raw).await?;
            tracing::info!(target: "amplifier", token = %token, amount = %balance, tx = %hash, "Mirror pre-funded");
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(target: "amplifier", error = %e, "Mirror pre-funding failed, continuing");
        }
    }

    async fn execute_bait(
        &self,
        dex: cascade::DexId,
        step: &crate::infrastructure::data::schema::PatternStep,
        trade_amount: U256,
        priority: u128,
    ) -> Result<BaitReceipt, AppError> {
        // Coarse min-output with 5% slippage over the downscaled quote.
        let min_out = trade_amount * U256::from(950u64) / U256::from(1_000_000u64);
        let deadline = current_unix() + SWAP_DEADLINE_SECS;
        let encoding = cascade::encode_bait_swap(
            dex,
            step.from,
            step.to,
            trade_amount,
            min_out,
            self.wallet_address,
            deadline,
        );

        let fees = self.gas.estimate().await?;
        let nonce = self.rpc.transaction_count(self.wallet_address).await?;
        let (raw, tx_hash) = sign_eip1559(
            &self.signer,
            self.chain_id,
            nonce,
            encoding.to,
            encoding.value,
            SWAP_GAS_LIMIT,
            self.capped_fee(fees.max_fee_per_gas),
            priority,
            encoding.calldata,
        )?;

        if self.dry_run {
            return Err(AppError::Strategy("Dry-run: bait not submitted".into()));
        }
        self.rpc.send_raw_tx(&raw).await?;
        tracing::info!(
            target: "amplifier",
            dex = dex.name,
            tx = %tx_hash,
            amount = %trade_amount,
            "Bait submitted"
        );

        // Wait for the bait to land; a router-side revert moves the cascade on.
        let deadline_ms = current_unix_ms() + BAIT_CONFIRM_TIMEOUT.as_millis() as u64;
        while current_unix_ms() < deadline_ms {
            if let Ok(Some(receipt)) = self.rpc.receipt(tx_hash).await {
                if !receipt.status() {
                    return Err(AppError::Transaction {
                        hash: format!("{tx_hash:#x}"),
                        reason: "bait reverted".into(),
                    });
                }
                let block = receipt.block_number.unwrap_or_default();
                let timestamp_ms = match self.rpc.block(block).await? {
                    Some(b) => b.header.timestamp * 1000,
                    None => current_unix_ms(),
                };
                return Ok(BaitReceipt {
                    tx_hash,
                    block,
                    timestamp_ms,
                    effective_gas_price: receipt.effective_gas_price,
                });
            }
            sleep(BAIT_CONFIRM_POLL).await;
        }
        Err(AppError::Transaction {
            hash: format!("{tx_hash:#x}"),
            reason: "bait confirmation timed out".into(),
        })
    }

    /// Build and submit the single-shot mirror bundle for `bait.block + 1`.
    async fn capture(
        &self,
        record: &SignalRecord,
        dex: cascade::DexId,
        mirror_step: &crate::infrastructure::data::schema::PatternStep,
        bait: &BaitReceipt,
        balance_before: U256,
    ) -> Result<BundleOutcome, AppError> {
        let mirror = self.mirror_signer.address();
        let inventory = self.erc20_balance(mirror_step.from, mirror).await?;
        if inventory.is_zero() {
            tracing::info!(target: "amplifier", hash = %record.hash, "Mirror holds no inventory, stopping");
            return Ok(BundleOutcome::NotIncluded);
        }

        // Quote the reverse leg through the same router family.
        let probe = cascade::encode_amounts_out(dex, inventory, mirror_step.from, mirror_step.to);
        let expected = match self
            .rpc
            .call(TransactionRequest {
                to: Some(TxKind::Call(probe.to)),
                input: TransactionInput::new(probe.calldata.into()),
                ..Default::default()
            })
            .await
        {
            Ok(out) => cascade::decode_amounts_out(dex, &out).unwrap_or(U256::ZERO),
            Err(e) => {
                tracing::warn!(target: "amplifier", error = %e, "Quote failed, assuming zero");
                U256::ZERO
            }
        };
        let min_out = expected * U256::from(SLIPPAGE_PPM) / U256::from(1_000_000u64);

        let capture_gas_price = bait.effective_gas_price.saturating_mul(2);
        let gas_cost = U256::from(SWAP_GAS_LIMIT as u128 * capture_gas_price);
        let bribe = expected.saturating_sub(gas_cost) * U256::from(BRIBE_SHARE_PPM)
            / U256::from(1_000_000u64);

        let target_block = bait.block + 1;
        let deadline = current_unix() + SWAP_DEADLINE_SECS;
        let mut raw_txs: Vec<Vec<u8>> = Vec::with_capacity(3);

        // Mirror legs: approval then the reverse swap.
        let mirror_nonce = self.rpc.transaction_count(mirror).await?;
        let approve = Erc20::approveCall {
            spender: dex.router(),
            amount: inventory,
        }
        .abi_encode();
        let (raw_approve, _) = sign_eip1559(
            &self.mirror_signer,
            self.chain_id,
            mirror_nonce,
            mirror_step.from,
            U256::ZERO,
            SWAP_GAS_LIMIT,
            capture_gas_price,
            capture_gas_price,
            approve,
        )?;
        raw_txs.push(raw_approve);

        let swap = cascade::encode_capture_swap(
            dex,
            mirror_step.from,
            mirror_step.to,
            inventory,
            min_out,
            mirror,
            deadline,
        );
        let (raw_swap, swap_hash) = sign_eip1559(
            &self.mirror_signer,
            self.chain_id,
            mirror_nonce + 1,
            swap.to,
            U256::ZERO,
            SWAP_GAS_LIMIT,
            capture_gas_price,
            capture_gas_price,
            swap.calldata,
        )?;
        raw_txs.push(raw_swap);

        // Proposer tip rides along when there is an edge to share.
        if bribe > U256::ZERO {
            if let Some(proposer) = self.proposer_hint(bait.block).await {
                let primary_nonce = self.rpc.transaction_count(self.wallet_address).await?;
                let (raw_bribe, _) = sign_eip1559(
                    &self.signer,
                    self.chain_id,
                    primary_nonce,
                    proposer,
                    bribe,
                    TRANSFER_GAS_LIMIT,
                    capture_gas_price,
                    capture_gas_price,
                    Vec::new(),
                )?;
                raw_txs.push(raw_bribe);
            }
        }

        self.bundles.send_bundle(&raw_txs, target_block).await?;
        let outcome = self.bundles.await_inclusion(swap_hash, target_block).await?;

        let balance_after = self.rpc.balance(self.wallet_address).await?;
        let success = outcome == BundleOutcome::Included;
        self.store.append_profit(&ProfitRecord {
            timestamp: current_unix_ms(),
            signal_hash: record.hash.clone(),
            bait_tx: Some(format!("{:#x}", bait.tx_hash)),
            target_block: Some(target_block),
            balance_before_wei: balance_before.to_string(),
            balance_after_wei: balance_after.to_string(),
            success,
            reason: (!success).then(|| "Capture reverted or not included".to_string()),
        });
        tracing::info!(
            target: "amplifier",
            hash = %record.hash,
            target_block,
            outcome = outcome.reason(),
            balance_before = %balance_before,
            balance_after = %balance_after,
            "Capture settled"
        );
        Ok(outcome)
    }

    /// Optional recursive signal, cross-chain echo and honeypot hint. All
    /// best-effort; nothing here undoes prior state.
    async fn best_effort_followups(&self, record: &SignalRecord) {
        // Store-only child record extending the causal chain.
        let mut child = SignalRecord::new(
            record.pattern,
            Some(record.hash.clone()),
            record.cascade_depth + 1,
            record.resonance,
            current_unix_ms(),
        );
        child.meta.intent_class = "RECURSIVE".to_string();
        child.hash = child.content_hash();
        if !self.store.put(&child) {
            tracing::debug!(target: "amplifier", "Recursive record write failed");
        }

        if !self.echo.is_empty() {
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
        }

        if let Some(honeypot) = self.honeypot_address {
            if let Err(e) = self.send_honeypot_hint(honeypot, record).await {
                tracing::debug!(target: "amplifier", error = %e, "Honeypot hint failed");
            }
        }
    }

    async fn send_honeypot_hint(
        &self,
        honeypot: Address,
        record: &SignalRecord,
    ) -> Result<(), AppError> {
        if self.dry_run {
            return Ok(());
        }
        let fees = self.gas.estimate().await?;
        let nonce = self.rpc.transaction_count(self.wallet_address).await?;
        let calldata = format!("JAM:{}", record.hash).into_bytes();
        let (raw, _) = sign_eip1559(
            &self.signer,
            self.chain_id,
            nonce,
            honeypot,
            U256::ZERO,
            SWAP_GAS_LIMIT,
            self.capped_fee(fees.max_fee_per_gas),
            fees.max_priority_fee_per_gas,
            calldata,
        )?;
        self.rpc.send_raw_tx(&raw).await?;
        Ok(())
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256, AppError> {
        let calldata = Erc20::balanceOfCall { owner }.abi_encode();
        let out = self
            .rpc
            .call(TransactionRequest {
                to: Some(TxKind::Call(token)),
                input: TransactionInput::new(calldata.into()),
                ..Default::default()
            })
            .await?;
        Erc20::balanceOfCall::abi_decode_returns(&out)
            .map_err(|e| AppError::Strategy(format!("balanceOf decode failed: {e}")))
    }

    /// Best available destination for the proposer tip: the fee recipient
    /// of the bait block.
    async fn proposer_hint(&self, block: u64) -> Option<Address> {
        match self.rpc.block(block).await {
            Ok(Some(b)) => Some(b.header.beneficiary),
            _ => None,
        }
    }

    fn capped_fee(&self, max_fee: u128) -> u128 {
        max_fee.min(self.max_gas_gwei as u128 * 1_000_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bribe_is_eighty_percent_of_positive_edge() {
        let expected = U256::from(1_000_000u64);
        let gas_cost = U256::from(200_000u64);
        let bribe =
            expected.saturating_sub(gas_cost) * U256::from(BRIBE_SHARE_PPM) / U256::from(1_000_000u64);
        assert_eq!(bribe, U256::from(640_000u64));

        // Negative edge clamps to zero.
        let under = U256::from(100u64);
        let none =
            under.saturating_sub(U256::from(200u64)) * U256::from(BRIBE_SHARE_PPM) / U256::from(1_000_000u64);
        assert_eq!(none, U256::ZERO);
    }

    #[test]
    fn min_out_applies_five_percent_slippage() {
        let expected = U256::from(1_000_000u64);
        let min_out = expected * U256::from(SLIPPAGE_PPM) / U256::from(1_000_000u64);
        assert_eq!(min_out, U256::from(950_000u64));
    }
}
