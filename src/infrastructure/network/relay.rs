// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@on1.no>

use crate::domain::error::AppError;
use crate::infrastructure::network::rpc::FailoverRpc;
use alloy::consensus::{SignableTransaction, TxEip1559};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, B256, Bytes, TxKind, U256, keccak256};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use alloy_consensus::TxEnvelope;
use reqwest::header::HeaderValue;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Sign a plain EIP-1559 call and return the 2718-encoded payload plus hash.
pub fn sign_eip1559(
    signer: &PrivateKeySigner,
    chain_id: u64,
    nonce: u64,
    to: Address,
    value: U256,
    gas_limit: u64,
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
    calldata: Vec<u8>,
) -> Result<(Vec<u8>, B256), AppError> {
    let mut tx = TxEip1559 {
        chain_id,
        nonce,
        max_priority_fee_per_gas,
        max_fee_per_gas,
        gas_limit,
        to: TxKind::Call(to),
        value,
        access_list: Default::default(),
        input: Bytes::from(calldata),
    };
    let sig = TxSignerSync::sign_transaction_sync(signer, &mut tx)
        .map_err(|e| AppError::Strategy(format!("Sign tx failed: {}", e)))?;
    let signed: TxEnvelope = tx.into_signed(sig).into();
    let raw = signed.encoded_2718();
    let hash = *signed.tx_hash();
    Ok((raw, hash))
}

/// Terminal state of a single-shot capture bundle. "Reverted" and
/// "not included" are both failures, reported with distinct reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleOutcome {
    Included,
    Reverted,
    NotIncluded,
}

impl BundleOutcome {
    pub fn reason(&self) -> &'static str {
        match self {
            BundleOutcome::Included => "included",
            BundleOutcome::Reverted => "reverted",
            BundleOutcome::NotIncluded => "not_included",
        }
    }
}

/// Submits signed bundles to the single configured builder relay.
pub struct BundleSender {
    rpc: Arc<FailoverRpc>,
    relay_url: String,
    signer: PrivateKeySigner,
    dry_run: bool,
}

impl BundleSender {
    pub fn new(
        rpc: Arc<FailoverRpc>,
        relay_url: String,
        signer: PrivateKeySigner,
        dry_run: bool,
    ) -> Self {
        Self {
            rpc,
            relay_url,
            signer,
            dry_run,
        }
    }

    /// Submit raw transactions as one bundle for exactly `target_block`.
    /// There is no resubmission for later blocks.
    pub async fn send_bundle(&self, raw_txs: &[Vec<u8>], target_block: u64) -> Result<(), AppError> {
        if self.dry_run {
            tracing::info!(
                target: "relay",
                txs = raw_txs.len(),
                target_block,
                "Dry-run: would send bundle"
            );
            return Ok(());
        }

        let params = json!({
            "txs": raw_txs.iter().map(|r| format!("0x{}", hex::encode(r))).collect::<Vec<_>>(),
            "blockNumber": format!("0x{:x}", target_block),
        });
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_sendBundle",
            "params": [params]
        });
        let body_bytes =
            serde_json::to_vec(&body).map_err(|e| AppError::Initialization(e.to_string()))?;
        let sig_header = self.sign_request(&body_bytes)?;

        let client = reqwest::Client::new();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let resp = client
                .post(&self.relay_url)
                .header("Content-Type", "application/json")
                .header(
                    "X-Flashbots-Signature",
                    HeaderValue::from_str(&sig_header).map_err(|e| {
                        AppError::Connection(format!("Signature header invalid: {}", e))
                    })?,
                )
                .body(body_bytes.clone())
                .send()
                .await
                .map_err(|e| AppError::Connection(format!("Relay POST failed: {}", e)))?;

            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            if status.is_success() {
                tracing::info!(
                    target: "relay",
                    relay = %self.relay_url,
                    target_block,
                    txs = raw_txs.len(),
                    body = %body_text,
                    "Bundle submitted"
                );
                return Ok(());
            } else if attempts < 2 {
                tracing::warn!(
                    target: "relay",
                    status = %status,
                    body = %body_text,
                    attempt = attempts,
                    "Relay rejected bundle, retrying"
                );
                continue;
            } else {
                return Err(AppError::Connection(format!(
                    "Relay rejected bundle: {} body={}",
                    status, body_text
                )));
            }
        }
    }

    /// Wait until `target_block` has passed, then resolve the terminal state
    /// of the bundle from the probe transaction's receipt.
    pub async fn await_inclusion(
        &self,
        probe_tx: B256,
        target_block: u64,
    ) -> Result<BundleOutcome, AppError> {
        if self.dry_run {
            return Ok(BundleOutcome::NotIncluded);
        }

        // Bounded wait for the chain to move past the target.
        for _ in 0..30 {
            let head = self.rpc.block_number().await?;
            if head > target_block {
                break;
            }
            sleep(Duration::from_secs(2)).await;
        }

        match self.rpc.receipt(probe_tx).await? {
            Some(receipt) if receipt.status() => Ok(BundleOutcome::Included),
            Some(_) => Ok(BundleOutcome::Reverted),
            None => Ok(BundleOutcome::NotIncluded),
        }
    }

    fn sign_request(&self, body_bytes: &[u8]) -> Result<String, AppError> {
        let hash = keccak256(body_bytes);
        let sig = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| AppError::Connection(format!("Bundle signing failed: {}", e)))?;
        let sig_hex = format!("0x{}", hex::encode(sig.as_bytes()));
        Ok(format!("{:#x}:{}", self.signer.address(), sig_hex))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_payload_round_trips_to_a_hash() {
        let signer = PrivateKeySigner::random();
        let (raw, hash) = sign_eip1559(
            &signer,
            8453,
            0,
            Address::ZERO,
            U256::ZERO,
            21_000,
            1_000_000_000,
            100_000_000,
            Vec::new(),
        )
        .unwrap();
        assert!(!raw.is_empty());
        // Hash commits to the encoded payload.
        assert_eq!(hash, keccak256(&raw));
    }

    #[test]
    fn outcome_reasons_are_distinct() {
        assert_ne!(
            BundleOutcome::Reverted.reason(),
            BundleOutcome::NotIncluded.reason()
        );
    }
}
