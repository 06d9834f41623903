// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@on1.no>

use crate::domain::error::AppError;
use alloy::network::Ethereum;
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::eth::{Block, FeeHistory, Filter, Log, Transaction, TransactionReceipt};
use alloy::rpc::types::eth::{BlockNumberOrTag, TransactionRequest};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use url::Url;

pub type HttpProvider = RootProvider<Ethereum>;

/// Base per-attempt timeout. Receipt reads run at 0.6x, and every attempt
/// after one full endpoint rotation runs at 1.5x.
const BASE_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(48);
const RECEIPT_TIMEOUT_SCALE: f64 = 0.6;

/// Fault classes with distinct backoff reactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    Indexing,
    RateLimit,
    Network,
    Other,
}

pub fn classify_fault(message: &str) -> FaultClass {
    let msg = message.to_ascii_lowercase();
    if msg.contains("indexing") || msg.contains("still syncing") || msg.contains("not ready") {
        FaultClass::Indexing
    } else if msg.contains("429")
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("capacity exceeded")
    {
        FaultClass::RateLimit
    } else if msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection")
        || msg.contains("connect error")
        || msg.contains("dns")
        || msg.contains("broken pipe")
        || msg.contains("reset by peer")
    {
        FaultClass::Network
    } else {
        FaultClass::Other
    }
}

/// Outcome of a resilient receipt probe. An unreadable receipt after a
/// broadcast is `Pending`, never success.
#[derive(Debug)]
pub enum ReceiptProbe {
    Confirmed(Box<TransactionReceipt>),
    NotFound,
    Pending(&'static str),
}

struct Endpoint {
    url: String,
    provider: HttpProvider,
}

/// Multi-endpoint JSON-RPC client. Every call rotates round-robin through
/// the configured endpoints for up to `2 * N` attempts with class-aware
/// sleeps and exponential inter-rotation backoff.
pub struct FailoverRpc {
    endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
    indexing_streak: AtomicU32,
    failovers: AtomicU64,
}

impl FailoverRpc {
    pub fn new(rpc_urls: &[String]) -> Result<Self, AppError> {
        if rpc_urls.is_empty() {
            return Err(AppError::Config("At least one RPC URL is required".into()));
        }
        let mut endpoints = Vec::with_capacity(rpc_urls.len());
        for raw in rpc_urls {
            let url =
                Url::parse(raw).map_err(|e| AppError::Config(format!("Invalid RPC URL: {e}")))?;
            endpoints.push(Endpoint {
                url: raw.clone(),
                provider: RootProvider::new_http(url),
            });
        }
        Ok(Self {
            endpoints,
            cursor: AtomicUsize::new(0),
            indexing_streak: AtomicU32::new(0),
            failovers: AtomicU64::new(0),
        })
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn failover_count(&self) -> u64 {
        self.failovers.load(Ordering::Relaxed)
    }

    async fn request<T, F, Fut>(
        &self,
        method: &'static str,
        timeout_scale: f64,
        op: F,
    ) -> Result<T, AppError>
    where
        F: Fn(HttpProvider) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let n = self.endpoints.len();
        let budget = 2 * n;
        let mut last_error = String::from("no attempts made");
        let mut rotations: u32 = 0;

        for attempt in 0..budget {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
            let endpoint = &self.endpoints[idx];

            let mut attempt_timeout = BASE_ATTEMPT_TIMEOUT.mul_f64(timeout_scale);
            if rotations >= 1 {
                attempt_timeout = attempt_timeout.mul_f64(1.5);
            }

            match timeout(attempt_timeout, op(endpoint.provider.clone())).await {
                Ok(Ok(value)) => {
                    self.indexing_streak.store(0, Ordering::Relaxed);
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    last_error = e;
                    let class = classify_fault(&last_error);
                    tracing::debug!(
                        target: "rpc",
                        method,
                        endpoint = %endpoint.url,
                        class = ?class,
                        error = %last_error,
                        "RPC attempt failed, rotating"
                    );
                    self.failovers.fetch_add(1, Ordering::Relaxed);
                    match class {
                        FaultClass::Indexing => {
                            let streak = self.indexing_streak.fetch_add(1, Ordering::Relaxed) + 1;
                            if streak >= 3 {
                                let pause = Duration::from_secs(5)
                                    .saturating_mul(rotations + 1)
                                    .min(Duration::from_secs(30));
                                sleep(pause).await;
                                self.indexing_streak.store(0, Ordering::Relaxed);
                            }
                        }
                        FaultClass::RateLimit => sleep(Duration::from_secs(5)).await,
                        FaultClass::Network => sleep(Duration::from_secs(1)).await,
                        FaultClass::Other => {}
                    }
                }
                Err(_) => {
                    last_error = format!("timeout after {attempt_timeout:?}");
                    self.failovers.fetch_add(1, Ordering::Relaxed);
                    sleep(Duration::from_secs(1)).await;
                }
            }

            if (attempt + 1) % n == 0 {
                rotations += 1;
                let backoff =
                    Duration::from_secs(1u64 << rotations.min(4)).min(Duration::from_secs(10));
                sleep(backoff).await;
            }
        }

        Err(AppError::AllEndpointsFailed {
            method: method.to_string(),
            last_error,
        })
    }

    // ------------------------------------------------------------------
    // Surface
    // ------------------------------------------------------------------

    pub async fn block_number(&self) -> Result<u64, AppError> {
        self.request("eth_blockNumber", 1.0, |p| async move {
            p.get_block_number().await.map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn balance(&self, address: Address) -> Result<U256, AppError> {
        self.request("eth_getBalance", 1.0, move |p| async move {
            p.get_balance(address).await.map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn transaction_count(&self, address: Address) -> Result<u64, AppError> {
        self.request("eth_getTransactionCount", 1.0, move |p| async move {
            p.get_transaction_count(address)
                .pending()
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn fee_history(&self, block_count: u64) -> Result<FeeHistory, AppError> {
        self.request("eth_feeHistory", 1.0, move |p| async move {
            p.get_fee_history(block_count, BlockNumberOrTag::Latest, &[50.0f64])
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn call(&self, tx: TransactionRequest) -> Result<Bytes, AppError> {
        self.request("eth_call", 1.0, move |p| {
            let tx = tx.clone();
            async move { p.call(tx).await.map_err(|e| e.to_string()) }
        })
        .await
    }

    pub async fn block_with_txs(&self, number: u64) -> Result<Option<Block>, AppError> {
        self.request("eth_getBlockByNumber", 1.0, move |p| async move {
            p.get_block_by_number(BlockNumberOrTag::Number(number))
                .full()
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn block(&self, number: u64) -> Result<Option<Block>, AppError> {
        self.request("eth_getBlockByNumber", 1.0, move |p| async move {
            p.get_block_by_number(BlockNumberOrTag::Number(number))
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn latest_block(&self) -> Result<Option<Block>, AppError> {
        self.request("eth_getBlockByNumber", 1.0, |p| async move {
            p.get_block_by_number(BlockNumberOrTag::Latest)
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn transaction(&self, hash: B256) -> Result<Option<Transaction>, AppError> {
        self.request("eth_getTransactionByHash", 1.0, move |p| async move {
            p.get_transaction_by_hash(hash)
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>, AppError> {
        self.request(
            "eth_getTransactionReceipt",
            RECEIPT_TIMEOUT_SCALE,
            move |p| async move {
                p.get_transaction_receipt(hash)
                    .await
                    .map_err(|e| e.to_string())
            },
        )
        .await
    }

    pub async fn send_raw_tx(&self, raw: &[u8]) -> Result<B256, AppError> {
        let raw = raw.to_vec();
        self.request("eth_sendRawTransaction", 1.0, move |p| {
            let raw = raw.clone();
            async move {
                p.send_raw_transaction(&raw)
                    .await
                    .map(|pending| *pending.tx_hash())
                    .map_err(|e| e.to_string())
            }
        })
        .await
    }

    pub async fn logs(&self, filter: Filter) -> Result<Vec<Log>, AppError> {
        self.request("eth_getLogs", 1.0, move |p| {
            let filter = filter.clone();
            async move { p.get_logs(&filter).await.map_err(|e| e.to_string()) }
        })
        .await
    }

    /// Raw passthrough for methods without a typed helper.
    pub async fn send(&self, method_name: &str, params: Value) -> Result<Value, AppError> {
        let owned = method_name.to_string();
        self.request("raw_send", 1.0, move |p| {
            let method = owned.clone();
            let params = params.clone();
            async move {
                p.raw_request::<Value, Value>(method.into(), params)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await
    }

    /// Resilient receipt probe. A receipt the chain cannot serve right now
    /// is reported as `Pending` with the fault class, never as confirmed.
    pub async fn receipt_probe(&self, hash: B256) -> ReceiptProbe {
        match self.receipt(hash).await {
            Ok(Some(receipt)) => ReceiptProbe::Confirmed(Box::new(receipt)),
            Ok(None) => ReceiptProbe::NotFound,
            Err(AppError::AllEndpointsFailed { last_error, .. }) => {
                if classify_fault(&last_error) == FaultClass::Indexing {
                    ReceiptProbe::Pending("indexing")
                } else {
                    ReceiptProbe::Pending("rpc_failure")
                }
            }
            Err(_) => ReceiptProbe::Pending("error_recovery"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_indexing_faults() {
        assert_eq!(
            classify_fault("node is indexing blocks, retry later"),
            FaultClass::Indexing
        );
        assert_eq!(classify_fault("chain still syncing"), FaultClass::Indexing);
    }

    #[test]
    fn classifies_rate_limits() {
        assert_eq!(classify_fault("HTTP 429"), FaultClass::RateLimit);
        assert_eq!(
            classify_fault("Too Many Requests from this key"),
            FaultClass::RateLimit
        );
    }

    #[test]
    fn classifies_network_faults() {
        assert_eq!(classify_fault("request timed out"), FaultClass::Network);
        assert_eq!(
            classify_fault("connection reset by peer"),
            FaultClass::Network
        );
    }

    #[test]
    fn unknown_faults_are_other() {
        assert_eq!(classify_fault("execution reverted"), FaultClass::Other);
    }

    #[test]
    fn rejects_empty_endpoint_list() {
        assert!(FailoverRpc::new(&[]).is_err());
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(FailoverRpc::new(&["not a url".to_string()]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_reports_all_endpoints_failed() {
        // Unroutable address: every attempt fails fast with a network error.
        let rpc = FailoverRpc::new(&["http://127.0.0.1:1/".to_string()]).unwrap();
        let err = rpc.block_number().await.unwrap_err();
        match err {
            AppError::AllEndpointsFailed { method, .. } => {
                assert_eq!(method, "eth_blockNumber");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(rpc.failover_count() >= 2);
    }
}
