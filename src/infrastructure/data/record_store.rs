// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::infrastructure::data::schema::{
    AttributionEvent, CompressedRecord, InteractionEvent, LatestJam, ProfitRecord, SignalRecord,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const JAMS_DIR: &str = "jams";
const INDEX_DIR: &str = "jams/index";
const SUCCESSFUL_LOG: &str = "jams/successful/successful-jams.jsonl";
const INTERACTIONS_LOG: &str = "jams/interactions.jsonl";
const ATTRIBUTIONS_LOG: &str = "logs/attributions.jsonl";
const PROFIT_LOG: &str = "logs/profit-monitor.jsonl";
const LATEST_JAM: &str = "latest-jam.json";

/// Content-addressed record persistence plus the append-only event logs.
/// Put/append failures are logged and reported as `false`; readers tolerate
/// partial writes by skipping unparseable lines.
#[derive(Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        for dir in [
            root.join(JAMS_DIR),
            root.join(INDEX_DIR),
            root.join("jams/successful"),
            root.join("logs"),
        ] {
            if let Err(e) = fs::create_dir_all(&dir) {
                tracing::error!(target: "store", path=%dir.display(), error=%e, "Failed to create store directory");
            }
        }
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, hash: &str) -> PathBuf {
        self.root.join(JAMS_DIR).join(format!("{hash}.json"))
    }

    fn index_path(&self, registry_hash: &str) -> PathBuf {
        self.root.join(INDEX_DIR).join(format!("{registry_hash}.json"))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> bool {
        let tmp = path.with_extension("json.tmp");
        let result = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, path));
        if let Err(e) = result {
            tracing::error!(target: "store", path=%path.display(), error=%e, "Atomic write failed");
            let _ = fs::remove_file(&tmp);
            return false;
        }
        true
    }

    fn append_line<T: Serialize>(&self, rel: &str, row: &T) -> bool {
        let path = self.root.join(rel);
        let line = match serde_json::to_string(row) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(target: "store", log=rel, error=%e, "Serialize for append failed");
                return false;
            }
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            tracing::error!(target: "store", log=rel, error=%e, "Append failed");
            return false;
        }
        true
    }

    fn read_lines<T: DeserializeOwned>(&self, rel: &str) -> Vec<T> {
        let path = self.root.join(rel);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };
        BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| match serde_json::from_str::<T>(&line) {
                Ok(row) => Some(row),
                Err(e) => {
                    tracing::warn!(target: "store", log=rel, error=%e, "Skipping unparseable log line");
                    None
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    pub fn put(&self, record: &SignalRecord) -> bool {
        let json = match serde_json::to_vec_pretty(record) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(target: "store", hash=%record.hash, error=%e, "Serialize record failed");
                return false;
            }
        };
        self.write_atomic(&self.record_path(&record.hash), &json)
    }

    pub fn get(&self, hash: &str) -> Option<SignalRecord> {
        let bytes = fs::read(self.record_path(hash)).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(rec) => Some(rec),
            Err(e) => {
                tracing::warn!(target: "store", hash=%hash, error=%e, "Corrupt record skipped");
                None
            }
        }
    }

    /// Read-merge-write; last writer wins. Called only by one process for a
    /// given record.
    pub fn update<F: FnOnce(&mut SignalRecord)>(&self, hash: &str, patch: F) -> bool {
        let Some(mut record) = self.get(hash) else {
            tracing::warn!(target: "store", hash=%hash, "Update on missing record");
            return false;
        };
        patch(&mut record);
        self.put(&record)
    }

    /// Bind the registry-assigned identity to a stored record's content hash.
    pub fn put_registry_alias(&self, registry_hash: &str, content_hash: &str) -> bool {
        let body = serde_json::json!({ "content_hash": content_hash });
        self.write_atomic(
            &self.index_path(registry_hash),
            body.to_string().as_bytes(),
        )
    }

    pub fn resolve_registry_hash(&self, registry_hash: &str) -> Option<String> {
        let bytes = fs::read(self.index_path(registry_hash)).ok()?;
        let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        value
            .get("content_hash")
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
    }

    /// All records currently on disk. Corrupt files are skipped.
    pub fn list_records(&self) -> Vec<SignalRecord> {
        let dir = self.root.join(JAMS_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };
        entries
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().map(|x| x == "json").unwrap_or(false))
            .filter_map(|e| {
                let name = e.file_name();
                let hash = Path::new(&name).file_stem()?.to_str()?.to_string();
                self.get(&hash)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Append-only logs
    // ------------------------------------------------------------------

    pub fn append_successful(&self, row: &CompressedRecord) -> bool {
        self.append_line(SUCCESSFUL_LOG, row)
    }

    pub fn append_interaction(&self, row: &InteractionEvent) -> bool {
        self.append_line(INTERACTIONS_LOG, row)
    }

    pub fn append_attribution(&self, row: &AttributionEvent) -> bool {
        self.append_line(ATTRIBUTIONS_LOG, row)
    }

    pub fn append_profit(&self, row: &ProfitRecord) -> bool {
        self.append_line(PROFIT_LOG, row)
    }

    pub fn list_successful(&self) -> Vec<CompressedRecord> {
        self.read_lines(SUCCESSFUL_LOG)
    }

    pub fn list_by_intent(&self, intent: &str) -> Vec<CompressedRecord> {
        self.list_successful()
            .into_iter()
            .filter(|r| r.intent_class == intent)
            .collect()
    }

    pub fn list_attributions(&self) -> Vec<AttributionEvent> {
        self.read_lines(ATTRIBUTIONS_LOG)
    }

    pub fn interaction_history(&self, signal_hash: &str) -> Vec<InteractionEvent> {
        self.read_lines::<InteractionEvent>(INTERACTIONS_LOG)
            .into_iter()
            .filter(|r| r.signal_hash == signal_hash)
            .collect()
    }

    // ------------------------------------------------------------------
    // Sync beacon
    // ------------------------------------------------------------------

    pub fn write_latest(&self, latest: &LatestJam) -> bool {
        let json = match serde_json::to_vec_pretty(latest) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(target: "store", error=%e, "Serialize latest-jam failed");
                return false;
            }
        };
        self.write_atomic(&self.root.join(LATEST_JAM), &json)
    }

    pub fn read_latest(&self) -> Option<LatestJam> {
        let bytes = fs::read(self.root.join(LATEST_JAM)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::data::schema::SignalPattern;

    fn temp_store(tag: &str) -> RecordStore {
        let dir = std::env::temp_dir().join(format!(
            "signaljam-store-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        RecordStore::new(dir)
    }

    fn record() -> SignalRecord {
        SignalRecord::new(SignalPattern::EthDaiFlow, None, 1, 1.618, 1_700_000_000_000)
    }

    #[test]
    fn put_get_round_trip_preserves_hash() {
        let store = temp_store("roundtrip");
        let rec = record();
        assert!(store.put(&rec));
        let loaded = store.get(&rec.hash).expect("record present");
        assert_eq!(loaded, rec);
        assert_eq!(loaded.content_hash(), rec.hash);
    }

    #[test]
    fn update_merges_in_place() {
        let store = temp_store("update");
        let rec = record();
        store.put(&rec);
        assert!(store.update(&rec.hash, |r| r.amplification_at = Some(42)));
        assert_eq!(store.get(&rec.hash).unwrap().amplification_at, Some(42));
    }

    #[test]
    fn interactions_return_in_append_order() {
        let store = temp_store("interactions");
        for i in 0..3u64 {
            assert!(store.append_interaction(&InteractionEvent {
                timestamp: i,
                signal_hash: "0xaa".into(),
                counterparty: format!("0x{i:040x}"),
                yield_wei: "1000".into(),
            }));
        }
        store.append_interaction(&InteractionEvent {
            timestamp: 9,
            signal_hash: "0xbb".into(),
            counterparty: "0x0".into(),
            yield_wei: "1".into(),
        });
        let history = store.interaction_history("0xaa");
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn corrupt_log_lines_are_skipped() {
        let store = temp_store("corrupt");
        store.append_successful(&CompressedRecord {
            hash: "0x1".into(),
            pattern: "CLASSIC_ARBITRAGE".into(),
            intent_class: "STANDARD".into(),
            cascade_depth: 1,
            resonance: 1.0,
            created_at: 0,
            onchain_tx: None,
            block_number: "1".into(),
        });
        let path = store.root().join("jams/successful/successful-jams.jsonl");
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "{{not json").unwrap();
        assert_eq!(store.list_successful().len(), 1);
    }

    #[test]
    fn registry_alias_resolves_to_content_hash() {
        let store = temp_store("alias");
        let rec = record();
        store.put(&rec);
        assert!(store.put_registry_alias("0xregistry", &rec.hash));
        assert_eq!(
            store.resolve_registry_hash("0xregistry").as_deref(),
            Some(rec.hash.as_str())
        );
    }

    #[test]
    fn latest_jam_beacon_round_trips() {
        let store = temp_store("latest");
        let latest = LatestJam {
            hash: "0xbeacon".into(),
            confirmed_timestamp: 1_700_000_000_123,
        };
        assert!(store.write_latest(&latest));
        let read = store.read_latest().unwrap();
        assert_eq!(read.hash, "0xbeacon");
        assert_eq!(read.confirmed_timestamp, 1_700_000_000_123);
    }

    #[test]
    fn list_by_intent_filters() {
        let store = temp_store("intent");
        for (i, intent) in ["STANDARD", "RECURSIVE", "STANDARD"].iter().enumerate() {
            store.append_successful(&CompressedRecord {
                hash: format!("0x{i}"),
                pattern: "ETH_DAI_FLOW".into(),
                intent_class: intent.to_string(),
                cascade_depth: 1,
                resonance: 1.0,
                created_at: 0,
                onchain_tx: None,
                block_number: "indexing".into(),
            });
        }
        assert_eq!(store.list_by_intent("STANDARD").len(), 2);
        assert_eq!(store.list_by_intent("RECURSIVE").len(), 1);
    }
}
