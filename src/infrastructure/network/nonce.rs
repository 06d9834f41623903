// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use crate::common::time::current_unix_ms;
use crate::domain::constants::NONCE_STALE_MS;
use crate::domain::error::AppError;
use crate::infrastructure::network::rpc::FailoverRpc;
use alloy::primitives::{Address, B256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

const REFRESH_ATTEMPTS: usize = 5;
const CONTENTION_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Default)]
struct NonceCache {
    nonce: Option<u64>,
    last_refresh_ms: u64,
    pending: HashSet<B256>,
}

/// Serialized per-wallet nonce issuer. Refreshes from the chain's pending
/// transaction count when the cache is unset, stale, or any tracked
/// transaction is still in flight.
#[derive(Clone)]
pub struct NonceManager {
    rpc: Arc<FailoverRpc>,
    address: Address,
    cache: Arc<Mutex<NonceCache>>,
}

impl NonceManager {
    pub fn new(rpc: Arc<FailoverRpc>, address: Address) -> Self {
        Self {
            rpc,
            address,
            cache: Arc::new(Mutex::new(NonceCache::default())),
        }
    }

    async fn lock_cache(&self) -> tokio::sync::MutexGuard<'_, NonceCache> {
        loop {
            match self.cache.try_lock() {
                Ok(guard) => return guard,
                Err(_) => sleep(CONTENTION_BACKOFF).await,
            }
        }
    }

    /// Issue the next nonce for this wallet.
    pub async fn next(&self) -> Result<u64, AppError> {
        let mut cache = self.lock_cache().await;
        let now = current_unix_ms();
        let needs_refresh = cache.nonce.is_none()
            || now.saturating_sub(cache.last_refresh_ms) > NONCE_STALE_MS
            || !cache.pending.is_empty();

        if needs_refresh {
            let fetched = self.fetch_with_regression_guard(cache.nonce).await?;
            cache.nonce = Some(fetched);
            cache.last_refresh_ms = now;
        }

        cache
            .nonce
            .ok_or_else(|| AppError::Initialization("Nonce cache empty after refresh".into()))
    }

    /// Fetch the pending count, retrying both transport failures and values
    /// that would regress below the cached nonce.
    async fn fetch_with_regression_guard(&self, cached: Option<u64>) -> Result<u64, AppError> {
        let mut delay = Duration::from_secs(2);
        let mut last_error = String::new();
        for attempt in 1..=REFRESH_ATTEMPTS {
            match self.rpc.transaction_count(self.address).await {
                Ok(fetched) => {
                    match cached {
                        Some(current) if fetched < current => {
                            tracing::warn!(
                                target: "nonce",
                                fetched,
                                cached = current,
                                attempt,
                                "Fetched nonce regresses below cache, retrying"
                            );
                            last_error = format!("nonce regression: {fetched} < {current}");
                        }
                        _ => return Ok(fetched),
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(target: "nonce", attempt, error=%last_error, "Nonce refresh failed");
                }
            }
            if attempt < REFRESH_ATTEMPTS {
                sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }
        Err(AppError::Connection(format!(
            "Failed to refresh nonce after {REFRESH_ATTEMPTS} attempts: {last_error}"
        )))
    }

    pub async fn add_pending(&self, hash: B256) {
        self.lock_cache().await.pending.insert(hash);
    }

    pub async fn remove_pending(&self, hash: B256) {
        self.lock_cache().await.pending.remove(&hash);
    }

    pub async fn pending_count(&self) -> usize {
        self.lock_cache().await.pending.len()
    }

    /// Advance the cached nonce after a successful submission.
    pub async fn increment(&self) {
        let mut cache = self.lock_cache().await;
        if let Some(n) = cache.nonce {
            cache.nonce = Some(n + 1);
        }
    }

    /// Roll back an optimistic increment when a submission never went out.
    pub async fn revert(&self) {
        let mut cache = self.lock_cache().await;
        if let Some(n) = cache.nonce {
            cache.nonce = Some(n.saturating_sub(1));
        }
    }

    /// Drop all cached state; next `next()` refreshes from the chain.
    pub async fn reset(&self) {
        let mut cache = self.lock_cache().await;
        cache.nonce = None;
        cache.last_refresh_ms = 0;
        cache.pending.clear();
    }

    /// Force the cache (used when the chain rejected our cached value).
    pub async fn force_set(&self, nonce: u64) {
        let mut cache = self.lock_cache().await;
        cache.nonce = Some(nonce);
        cache.last_refresh_ms = current_unix_ms();
    }
}
