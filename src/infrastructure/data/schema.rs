// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::constants::{
    AERO_BASE, CBETH_BASE, DAI_BASE, USDBC_BASE, USDC_BASE, WETH_BASE,
};
use alloy::primitives::{Address, keccak256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which wallet executes a pattern step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepActor {
    Amplifier,
    Mirror,
}

/// One leg of a signal pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternStep {
    pub from: Address,
    pub to: Address,
    pub action: String,
    pub actor: StepActor,
}

/// The closed set of token-pair patterns a signal can announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalPattern {
    ClassicArbitrage,
    StableRotation,
    EthDaiFlow,
    DefiGovernance,
}

impl SignalPattern {
    pub const ALL: [SignalPattern; 4] = [
        SignalPattern::ClassicArbitrage,
        SignalPattern::StableRotation,
        SignalPattern::EthDaiFlow,
        SignalPattern::DefiGovernance,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SignalPattern::ClassicArbitrage => "CLASSIC_ARBITRAGE",
            SignalPattern::StableRotation => "STABLE_ROTATION",
            SignalPattern::EthDaiFlow => "ETH_DAI_FLOW",
            SignalPattern::DefiGovernance => "DEFI_GOVERNANCE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    fn pair(&self) -> (Address, Address) {
        match self {
            SignalPattern::ClassicArbitrage => (WETH_BASE, USDC_BASE),
            SignalPattern::StableRotation => (USDC_BASE, DAI_BASE),
            SignalPattern::EthDaiFlow => (WETH_BASE, DAI_BASE),
            SignalPattern::DefiGovernance => (WETH_BASE, AERO_BASE),
        }
    }

    /// The two-leg reversible swap this pattern announces: the amplifier
    /// buys `to` with `from`, the mirror unwinds it.
    pub fn steps(&self) -> [PatternStep; 2] {
        let (from, to) = self.pair();
        [
            PatternStep {
                from,
                to,
                action: "SWAP".to_string(),
                actor: StepActor::Amplifier,
            },
            PatternStep {
                from: to,
                to: from,
                action: "SWAP".to_string(),
                actor: StepActor::Mirror,
            },
        ]
    }

    /// Fixed legibility prior used by the selector.
    pub fn clarity_prior(&self) -> f64 {
        match self {
            SignalPattern::ClassicArbitrage => 0.90,
            SignalPattern::StableRotation => 0.80,
            SignalPattern::EthDaiFlow => 0.75,
            SignalPattern::DefiGovernance => 0.60,
        }
    }

    /// Fixed incentive prior used by the selector.
    pub fn incentive_prior(&self) -> f64 {
        match self {
            SignalPattern::ClassicArbitrage => 1.00,
            SignalPattern::StableRotation => 0.95,
            SignalPattern::EthDaiFlow => 0.92,
            SignalPattern::DefiGovernance => 0.88,
        }
    }
}

/// Counters for cross-chain echoes of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoTopology {
    pub primary: u32,
    pub alt: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub audit_pass: bool,
    pub bait_hooks: Vec<String>,
    pub intent_class: String,
    /// Identity assigned by the signal registry, bound post-submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_hash: Option<String>,
}

impl Default for RecordMeta {
    fn default() -> Self {
        Self {
            audit_pass: true,
            bait_hooks: Vec::new(),
            intent_class: "STANDARD".to_string(),
            registry_hash: None,
        }
    }
}

/// One content-addressed signal record ("JAM").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    /// Content hash over the canonical pre-hash serialization, `0x…` hex.
    pub hash: String,
    pub pattern: SignalPattern,
    pub steps: Vec<PatternStep>,
    pub parent_hash: Option<String>,
    pub cascade_depth: u32,
    pub resonance: f64,
    /// Unix milliseconds.
    pub created_at: u64,
    pub amplification_at: Option<u64>,
    /// Block the bait landed in; drives the attribution age gate.
    #[serde(default)]
    pub amplification_block: Option<u64>,
    pub attested_at: Option<u64>,
    pub onchain_tx: Option<String>,
    pub meta: RecordMeta,
    pub recursive_topology: EchoTopology,
}

impl SignalRecord {
    pub fn new(
        pattern: SignalPattern,
        parent_hash: Option<String>,
        cascade_depth: u32,
        resonance: f64,
        created_at: u64,
    ) -> Self {
        let mut record = Self {
            hash: String::new(),
            pattern,
            steps: pattern.steps().to_vec(),
            parent_hash,
            cascade_depth,
            resonance,
            created_at,
            amplification_at: None,
            amplification_block: None,
            attested_at: None,
            onchain_tx: None,
            meta: RecordMeta::default(),
            recursive_topology: EchoTopology::default(),
        };
        record.hash = record.content_hash();
        record
    }

    /// Canonical JSON of the pre-hash content: identity and post-hoc fields
    /// cleared, object keys sorted by serde_json's map ordering.
    pub fn canonical_prehash_json(&self) -> String {
        let mut pre = self.clone();
        pre.hash = String::new();
        pre.amplification_at = None;
        pre.amplification_block = None;
        pre.attested_at = None;
        pre.onchain_tx = None;
        pre.meta.registry_hash = None;
        canonical_json(&pre)
    }

    /// keccak256 over the canonical pre-hash JSON, `0x…` hex.
    pub fn content_hash(&self) -> String {
        let canonical = self.canonical_prehash_json();
        format!("0x{}", hex::encode(keccak256(canonical.as_bytes())))
    }

    pub fn amplifier_step(&self) -> Option<&PatternStep> {
        self.steps.iter().find(|s| s.actor == StepActor::Amplifier)
    }

    pub fn mirror_step(&self) -> Option<&PatternStep> {
        self.steps.iter().find(|s| s.actor == StepActor::Mirror)
    }

    /// A well-formed record announces a reversible swap.
    pub fn has_reverse_pattern(&self) -> bool {
        match (self.amplifier_step(), self.mirror_step()) {
            (Some(a), Some(m)) => a.to == m.from && m.to == a.from,
            _ => false,
        }
    }
}

/// Serialize through `serde_json::Value` so object keys come out sorted;
/// the output is a fixed point under re-serialization.
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .and_then(|v| serde_json::to_string(&v))
        .unwrap_or_default()
}

/// Per-pattern selection statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PatternStats {
    pub attempts: u64,
    pub successes: u64,
    /// Unix milliseconds of the last emission attempt.
    pub last_used_at: Option<u64>,
    /// Set by the attributor on strong matches; boosts selection weight once.
    #[serde(default)]
    pub reinforced: bool,
}

/// Aggregate metrics block inside the system state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateMetrics {
    pub patterns: HashMap<String, PatternStats>,
    pub error_counts: HashMap<String, u64>,
}

/// Cross-process emission lock, persisted inside the state document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionLock {
    pub locked: bool,
    pub pid: Option<u32>,
    /// Unix milliseconds.
    pub acquired_at: Option<u64>,
}

/// The single persisted state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemState {
    pub last_hash: Option<String>,
    pub metrics: StateMetrics,
    pub lock: EmissionLock,
    pub nonce: Option<u64>,
}

/// Compressed row appended to the successful-jams log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedRecord {
    pub hash: String,
    pub pattern: String,
    pub intent_class: String,
    pub cascade_depth: u32,
    pub resonance: f64,
    pub created_at: u64,
    pub onchain_tx: Option<String>,
    /// Numeric block, or `indexing|rpc_failure|error_recovery` when the
    /// receipt could not be read after broadcast.
    pub block_number: String,
}

/// Append-only interaction row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub timestamp: u64,
    pub signal_hash: String,
    pub counterparty: String,
    pub yield_wei: String,
}

/// Append-only attribution row; de-duplicated on `(signal_hash, tx_hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionEvent {
    pub timestamp: u64,
    pub signal_hash: String,
    pub counterparty: String,
    pub yield_wei: String,
    pub similarity: f64,
    pub tx_hash: String,
}

/// Append-only profit reconciliation row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitRecord {
    pub timestamp: u64,
    pub signal_hash: String,
    pub bait_tx: Option<String>,
    pub target_block: Option<u64>,
    pub balance_before_wei: String,
    pub balance_after_wei: String,
    pub success: bool,
    pub reason: Option<String>,
}

/// Sync beacon polled by the amplifier and attributor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestJam {
    pub hash: String,
    /// Unix milliseconds of the bait confirmation block (or emission time
    /// before amplification).
    pub confirmed_timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SignalRecord {
        SignalRecord::new(SignalPattern::ClassicArbitrage, None, 1, 1.618, 1_700_000_000_000)
    }

    #[test]
    fn content_hash_is_deterministic() {
        let a = record();
        let b = record();
        assert_eq!(a.hash, b.hash);
        assert!(a.hash.starts_with("0x"));
        assert_eq!(a.hash.len(), 66);
    }

    #[test]
    fn post_hoc_fields_do_not_change_hash() {
        let mut rec = record();
        let before = rec.content_hash();
        rec.amplification_at = Some(1_700_000_100_000);
        rec.amplification_block = Some(123);
        rec.attested_at = Some(1_700_000_200_000);
        rec.onchain_tx = Some("0xabc".into());
        rec.meta.registry_hash = Some("0xdef".into());
        assert_eq!(rec.content_hash(), before);
    }

    #[test]
    fn parent_changes_hash() {
        let orphan = record();
        let child = SignalRecord::new(
            SignalPattern::ClassicArbitrage,
            Some(orphan.hash.clone()),
            2,
            1.618,
            1_700_000_000_000,
        );
        assert_ne!(orphan.hash, child.hash);
        assert!(child.cascade_depth > 1);
    }

    #[test]
    fn canonical_json_is_a_fixed_point() {
        let rec = record();
        let once = canonical_json(&rec);
        let back: SignalRecord = serde_json::from_str(&once).unwrap();
        assert_eq!(canonical_json(&back), once);
    }

    #[test]
    fn all_patterns_are_reversible() {
        for p in SignalPattern::ALL {
            let rec = SignalRecord::new(p, None, 1, 1.0, 0);
            assert!(rec.has_reverse_pattern(), "{} not reversible", p.name());
        }
    }

    #[test]
    fn pattern_names_round_trip() {
        for p in SignalPattern::ALL {
            assert_eq!(SignalPattern::from_name(p.name()), Some(p));
        }
    }

    #[test]
    fn rehash_reproduces_stored_hash() {
        let rec = record();
        let json = serde_json::to_string(&rec).unwrap();
        let parsed: SignalRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.content_hash(), rec.hash);
    }
}
