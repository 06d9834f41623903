// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

//! The attributor: scans recent blocks for transactions correlated to our
//! emitted signals, attests the attributed yield on-chain, and feeds the
//! result back into pattern selection.

pub mod similarity;

use crate::common::metrics::ProcessStats;
use crate::common::time::current_unix_ms;
use crate::domain::constants::{
    ATTRIBUTION_MAX_BLOCK_AGE, ATTRIBUTION_SCAN_DEPTH, REINFORCEMENT_SIMILARITY, SWAP_GAS_LIMIT,
    router_whitelist,
};
use crate::domain::error::AppError;
use crate::domain::phi::{PHI, YIELD_PROXY_FACTOR};
use crate::infrastructure::data::record_store::RecordStore;
use crate::infrastructure::data::schema::{AttributionEvent, InteractionEvent, SignalRecord};
use crate::infrastructure::data::state_store::StateStore;
use crate::infrastructure::network::contracts::SignalVault;
use crate::infrastructure::network::gas::GasOracle;
use crate::infrastructure::network::relay::sign_eip1559;
use crate::infrastructure::network::rpc::FailoverRpc;
use alloy::consensus::Transaction as _;
use alloy::primitives::{Address, B256, Bytes, TxKind, U256, keccak256};
use alloy::rpc::types::eth::{TransactionInput, TransactionRequest};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use alloy_sol_types::{SolCall, SolValue};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::sleep;

const SCAN_INTERVAL: Duration = Duration::from_secs(12);
const ATTEST_CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);
const ATTEST_CONFIRM_POLL: Duration = Duration::from_secs(2);

pub struct Attributor {
    pub rpc: Arc<FailoverRpc>,
    pub store: RecordStore,
    pub state: StateStore,
    pub gas: GasOracle,
    pub signer: PrivateKeySigner,
    pub stats: Arc<ProcessStats>,
    pub chain_id: u64,
    pub vault: Address,
    pub dry_run: bool,
    routers: Vec<Address>,
    seen: HashSet<(String, String)>,
    attributed_yields: HashMap<String, U256>,
    last_scanned: u64,
}

impl Attributor {
    pub fn new(
        rpc: Arc<FailoverRpc>,
        store: RecordStore,
        state: StateStore,
        gas: GasOracle,
        signer: PrivateKeySigner,
        stats: Arc<ProcessStats>,
        chain_id: u64,
        vault: Address,
        dry_run: bool,
    ) -> Self {
        // Rebuild the de-duplication set from the attribution log so a
        // restart never re-attests a pair it already covered.
        let seen = store
            .list_attributions()
            .into_iter()
            .map(|e| (e.signal_hash, e.tx_hash))
            .collect();
        Self {
            rpc,
            store,
            state,
            gas,
            signer,
            stats,
            chain_id,
            vault,
            dry_run,
            routers: router_whitelist(),
            seen,
            attributed_yields: HashMap::new(),
            last_scanned: 0,
        }
    }

    pub async fn run(mut self) -> Result<(), AppError> {
        tracing::info!(target: "attributor", vault = %self.vault, "Attributor loop starting");
        self.ensure_authorized().await;

        loop {
            if let Err(e) = self.scan_once().await {
                tracing::error!(target: "attributor", error = %e, "Scan failed");
            }
            sleep(SCAN_INTERVAL).await;
        }
    }

    /// Self-authorize against the vault if this wallet is not yet a trapper.
    async fn ensure_authorized(&self) {
        let me = self.signer.address();
        let calldata = SignalVault::authorizedTrappersCall { trapper: me }.abi_encode();
        let probe = TransactionRequest {
            to: Some(TxKind::Call(self.vault)),
            input: TransactionInput::new(calldata.into()),
            ..Default::default()
        };
        let authorized = match self.rpc.call(probe).await {
            Ok(out) => SignalVault::authorizedTrappersCall::abi_decode_returns(&out).unwrap_or(false),
            Err(e) => {
                tracing::warn!(target: "attributor", error = %e, "Authorization probe failed");
                return;
            }
        };
        if authorized || self.dry_run {
            return;
        }

        tracing::info!(target: "attributor", wallet = %me, "Submitting self-authorization");
        let result: Result<(), AppError> = async {
            let fees = self.gas.estimate().await?;
            let nonce = self.rpc.transaction_count(me).await?;
            let calldata = SignalVault::authorizeTrapperCall { trapper: me }.abi_encode();
            let (raw, hash) = sign_eip1559(
                &self.signer,
                self.chain_id,
                nonce,
                self.vault,
                U256::ZERO,
                SWAP_GAS_LIMIT,
                fees.max_fee_per_gas,
                fees.max_priority_fee_per_gas,
                calldata,
            )?;
            self.rpc.send_raw_tx(&raw).await?;
            self.await_confirmed(hash).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(target: "attributor", error = %e, "Self-authorization failed");
        }
    }

    async fn scan_once(&mut self) -> Result<(), AppError> {
        let head = self.rpc.block_number().await?;
        let floor = head.saturating_sub(ATTRIBUTION_SCAN_DEPTH);
        let start = floor.max(self.last_scanned + 1);
        if start > head {
            return Ok(());
        }

        let records: Vec<SignalRecord> = self
            .store
            .list_records()
            .into_iter()
            .filter(|r| r.meta.audit_pass)
            .collect();
        if records.is_empty() {
            self.last_scanned = head;
            return Ok(());
        }

        for number in start..=head {
            if let Err(e) = self.scan_block(number, head, &records).await {
                tracing::warn!(target: "attributor", block = number, error = %e, "Block scan failed");
            }
        }
        self.last_scanned = head;
        Ok(())
    }

    async fn scan_block(
        &mut self,
        number: u64,
        head: u64,
        records: &[SignalRecord],
    ) -> Result<(), AppError> {
        let Some(block) = self.rpc.block_with_txs(number).await? else {
            return Ok(());
        };
        let block_timestamp = block.header.timestamp;
        let own = self.signer.address();

        let txs: Vec<_> = block.transactions.into_transactions().collect();
        for tx in txs {
            let counterparty = tx.inner.signer();
            if counterparty == own {
                continue;
            }

            let tx_hash = *tx.inner.tx_hash();
            let pattern = similarity::extract_tx_pattern(
                tx.to(),
                tx.input(),
                tx.value(),
                &self.routers,
            );
            // Non-swaps never clear the similarity threshold.
            if pattern.action != "SWAP" {
                continue;
            }

            // Receipt gate: failed transactions carry no yield.
            let Some(receipt) = self.rpc.receipt(tx_hash).await? else {
                continue;
            };
            if !receipt.status() {
                continue;
            }

            for record in records {
                let Some(score) = self.matches_record(record, &pattern, head, block_timestamp)
                else {
                    continue;
                };
                let yield_wei = U256::from(
                    ((receipt.gas_used as u128 * receipt.effective_gas_price) as f64
                        * YIELD_PROXY_FACTOR) as u128,
                );
                if let Err(e) = self
                    .attest(record, counterparty, yield_wei, tx_hash, score)
                    .await
                {
                    tracing::warn!(
                        target: "attributor",
                        hash = %record.hash,
                        tx = %tx_hash,
                        error = %e,
                        "Attestation failed, record stays eligible"
                    );
                }
            }
        }
        Ok(())
    }

    /// All gates for one `(record, tx)` pairing; returns the similarity
    /// score when the pair qualifies for attestation.
    fn matches_record(
        &self,
        record: &SignalRecord,
        pattern: &similarity::TxPattern,
        head: u64,
        block_timestamp: u64,
    ) -> Option<f64> {
        // Never attribute before the bait was confirmed.
        let amplification_at = record.amplification_at?;
        if !within_block_age(head, record.amplification_block.unwrap_or(head)) {
            return None;
        }
        if !similarity::within_phi_window(amplification_at, block_timestamp) {
            return None;
        }
        let step = record.amplifier_step()?;
        let record_path = [step.from, step.to];
        let score = similarity::similarity(&record_path, &step.action, pattern);
        similarity::meets_similarity(score).then_some(score)
    }

    async fn attest(
        &mut self,
        record: &SignalRecord,
        counterparty: Address,
        yield_wei: U256,
        tx_hash: B256,
        score: f64,
    ) -> Result<(), AppError> {
        let tx_hex = format!("{tx_hash:#x}");
        let dedupe_key = (record.hash.clone(), tx_hex.clone());
        if self.seen.contains(&dedupe_key) {
            return Ok(());
        }

        let signal_hash = record
            .meta
            .registry_hash
            .as_deref()
            .unwrap_or(record.hash.as_str());
        let signal_hash = B256::from_str(signal_hash)
            .map_err(|e| AppError::Validation {
                field: "signal_hash".into(),
                message: e.to_string(),
            })?;

        // EIP-191 signature over keccak256(abi.encode(hash, frontrunner, amount)).
        let encoded = (signal_hash, counterparty, yield_wei).abi_encode();
        let message_hash = keccak256(&encoded);
        let signature = self
            .signer
            .sign_message_sync(message_hash.as_slice())
            .map_err(|e| AppError::Strategy(format!("Attestation signing failed: {e}")))?;

        if self.dry_run {
            tracing::info!(target: "attributor", hash = %record.hash, tx = %tx_hex, "Dry-run: would attest");
            return Ok(());
        }

        let calldata = SignalVault::attestYieldCall {
            signalHash: signal_hash,
            frontrunner: counterparty,
            yieldAmount: yield_wei,
            signature: Bytes::from(signature.as_bytes().to_vec()),
        }
        .abi_encode();
        let fees = self.gas.estimate().await?;
        let nonce = self.rpc.transaction_count(self.signer.address()).await?;
        let (raw, attest_hash) = sign_eip1559(
            &self.signer,
            self.chain_id,
            nonce,
            self.vault,
            U256::ZERO,
            SWAP_GAS_LIMIT,
            fees.max_fee_per_gas,
            fees.max_priority_fee_per_gas,
            calldata,
        )?;
        self.rpc.send_raw_tx(&raw).await?;
        self.await_confirmed(attest_hash).await?;

        let now = current_unix_ms();
        self.store.append_attribution(&AttributionEvent {
            timestamp: now,
            signal_hash: record.hash.clone(),
            counterparty: format!("{counterparty:#x}"),
            yield_wei: yield_wei.to_string(),
            similarity: score,
            tx_hash: tx_hex.clone(),
        });
        self.store.append_interaction(&InteractionEvent {
            timestamp: now,
            signal_hash: record.hash.clone(),
            counterparty: format!("{counterparty:#x}"),
            yield_wei: yield_wei.to_string(),
        });
        self.store.update(&record.hash, |r| {
            r.attested_at = Some(now);
        });
        self.seen.insert(dedupe_key);
        *self
            .attributed_yields
            .entry(record.hash.clone())
            .or_insert(U256::ZERO) += yield_wei;
        self.stats.attested.fetch_add(1, Ordering::Relaxed);

        self.maybe_reinforce(record, score, yield_wei);
        tracing::info!(
            target: "attributor",
            hash = %record.hash,
            counterparty = %counterparty,
            yield_wei = %yield_wei,
            similarity = score,
            attest_tx = %attest_hash,
            "Yield attested"
        );
        Ok(())
    }

    async fn await_confirmed(&self, tx_hash: B256) -> Result<(), AppError> {
        let deadline = current_unix_ms() + ATTEST_CONFIRM_TIMEOUT.as_millis() as u64;
        while current_unix_ms() < deadline {
            if let Ok(Some(receipt)) = self.rpc.receipt(tx_hash).await {
                if receipt.status() {
                    return Ok(());
                }
                return Err(AppError::Transaction {
                    hash: format!("{tx_hash:#x}"),
                    reason: "attestation reverted".into(),
                });
            }
            sleep(ATTEST_CONFIRM_POLL).await;
        }
        Err(AppError::Transaction {
            hash: format!("{tx_hash:#x}"),
            reason: "attestation confirmation timed out".into(),
        })
    }

    /// Reinforcement gate: strong similarity and meaningful yield boost the
    /// pattern's weight on the next selection pass.
    pub fn maybe_reinforce(&self, record: &SignalRecord, score: f64, yield_wei: U256) {
        let threshold_wei = U256::from((PHI * 1e12) as u64); // Φ / 10^6 ETH
        if score > REINFORCEMENT_SIMILARITY && yield_wei > threshold_wei {
            self.state.reinforce_pattern(record.pattern.name());
            tracing::info!(
                target: "attributor",
                pattern = record.pattern.name(),
                score,
                "Pattern reinforced"
            );
        }
    }
}

/// Record freshness gate: the bait must have landed within the last 50
/// blocks, inclusive at the boundary.
fn within_block_age(head: u64, amplification_block: u64) -> bool {
    head.saturating_sub(amplification_block) <= ATTRIBUTION_MAX_BLOCK_AGE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::phi::PHI;

    #[test]
    fn block_age_boundary_is_inclusive() {
        assert!(within_block_age(150, 100)); // exactly 50
        assert!(!within_block_age(151, 100)); // 51
        assert!(within_block_age(100, 100));
    }

    #[test]
    fn yield_proxy_uses_floored_phi() {
        let gas_used: u128 = 100_000;
        let price: u128 = 1_000_000_000;
        let yield_wei = ((gas_used * price) as f64 * YIELD_PROXY_FACTOR) as u128;
        assert_eq!(yield_wei, 161_000_000_000_000);
        assert!(YIELD_PROXY_FACTOR < PHI);
    }

    #[test]
    fn reinforcement_threshold_is_phi_micro_eth() {
        let threshold_wei = U256::from((PHI * 1e12) as u64);
        assert_eq!(threshold_wei, U256::from(1_618_033_988_700u64));
    }

    #[test]
    fn attestation_message_is_eip191_over_abi_encoding() {
        let signer = PrivateKeySigner::random();
        let signal = B256::from([7u8; 32]);
        let counterparty = Address::from([9u8; 20]);
        let amount = U256::from(1_500_000_000_000u64);

        let encoded = (signal, counterparty, amount).abi_encode();
        // bytes32 ++ address ++ uint256, each padded to a 32-byte word.
        assert_eq!(encoded.len(), 96);

        let message_hash = keccak256(&encoded);
        let sig = signer.sign_message_sync(message_hash.as_slice()).unwrap();
        let recovered = sig
            .recover_address_from_msg(message_hash.as_slice())
            .unwrap();
        assert_eq!(recovered, signer.address());
    }
}
