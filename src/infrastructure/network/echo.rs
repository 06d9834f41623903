// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use crate::infrastructure::data::schema::{EchoTopology, SignalRecord};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

const ATTEMPTS_PER_TARGET: usize = 2;

/// Best-effort publication of a compressed record to a prioritized list of
/// alternative ledgers / pinning services. First success wins; every failure
/// is swallowed. Never blocks or rolls back the main path; callers spawn
/// this and move on.
pub struct EchoChain {
    targets: Vec<String>,
    client: Client,
}

impl EchoChain {
    pub fn new(targets: Vec<String>) -> Self {
        Self {
            targets,
            client: Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Walk the fallback chain. The returned topology counts one `primary`
    /// hit when the first target took the record, one `alt` hit when a
    /// later target did, and `failed` per target that never accepted it.
    pub async fn publish(&self, record: &SignalRecord) -> EchoTopology {
        let mut topology = EchoTopology::default();
        let body = json!({
            "hash": record.hash,
            "pattern": record.pattern,
            "cascade_depth": record.cascade_depth,
            "resonance": record.resonance,
            "created_at": record.created_at,
            "onchain_tx": record.onchain_tx,
        });

        for (rank, target) in self.targets.iter().enumerate() {
            let mut accepted = false;
            for attempt in 1..=ATTEMPTS_PER_TARGET {
                match self.client.post(target).json(&body).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        accepted = true;
                        break;
                    }
                    Ok(resp) => {
                        tracing::debug!(
                            target: "echo",
                            endpoint = %target,
                            status = %resp.status(),
                            attempt,
                            "Echo target rejected record"
                        );
                    }
                    Err(e) => {
                        tracing::debug!(
                            target: "echo",
                            endpoint = %target,
                            error = %e,
                            attempt,
                            "Echo publish failed"
                        );
                    }
                }
            }
            if accepted {
                if rank == 0 {
                    topology.primary += 1;
                } else {
                    topology.alt += 1;
                }
                tracing::info!(target: "echo", endpoint = %target, hash = %record.hash, "Record echoed");
                return topology;
            }
            topology.failed += 1;
        }

        if !self.targets.is_empty() {
            tracing::warn!(target: "echo", hash = %record.hash, "All echo targets failed");
        }
        topology
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::data::schema::SignalPattern;

    #[tokio::test]
    async fn empty_chain_is_a_noop() {
        let chain = EchoChain::new(Vec::new());
        let record = SignalRecord::new(SignalPattern::ClassicArbitrage, None, 1, 1.0, 0);
        let topology = chain.publish(&record).await;
        assert_eq!(topology, EchoTopology::default());
    }

    #[tokio::test]
    async fn unreachable_targets_count_as_failed() {
        let chain = EchoChain::new(vec!["http://127.0.0.1:1/pin".to_string()]);
        let record = SignalRecord::new(SignalPattern::ClassicArbitrage, None, 1, 1.0, 0);
        let topology = chain.publish(&record).await;
        assert_eq!(topology.failed, 1);
        assert_eq!(topology.primary, 0);
    }
}
