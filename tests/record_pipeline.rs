use signaljam::infrastructure::data::record_store::RecordStore;
use signaljam::infrastructure::data::schema::{
    AttributionEvent, CompressedRecord, LatestJam, SignalPattern, SignalRecord,
};
use std::fs;
use std::path::PathBuf;

fn temp_store(tag: &str) -> RecordStore {
    let dir: PathBuf = std::env::temp_dir().join(format!(
        "signaljam-pipeline-{tag}-{}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    RecordStore::new(dir)
}

/// The emitter's persistence sequence: content-addressed put, registry
/// binding, successful-log append, beacon write. The amplifier and
/// attributor then observe everything through the same store.
#[test]
fn emission_to_attribution_persistence_flow() {
    let store = temp_store("flow");

    // Emission: record written before submission, then bound and logged.
    let record = SignalRecord::new(SignalPattern::ClassicArbitrage, None, 1, 1.618, 1_700_000_000_000);
    assert_eq!(record.cascade_depth, 1);
    assert!(store.put(&record));
    assert!(store.put_registry_alias("0xreg01", &record.hash));
    assert!(store.append_successful(&CompressedRecord {
        hash: record.hash.clone(),
        pattern: record.pattern.name().to_string(),
        intent_class: "STANDARD".to_string(),
        cascade_depth: record.cascade_depth,
        resonance: record.resonance,
        created_at: record.created_at,
        onchain_tx: Some("0xdead".to_string()),
        block_number: "12345".to_string(),
    }));
    assert!(store.write_latest(&LatestJam {
        hash: record.hash.clone(),
        confirmed_timestamp: record.created_at,
    }));

    // Amplification: registry event hash resolves back to the content hash,
    // and the bait confirmation is stamped in.
    let content = store.resolve_registry_hash("0xreg01").unwrap();
    assert_eq!(content, record.hash);
    assert!(store.update(&content, |r| r.amplification_at = Some(1_700_000_060_000)));

    // Attribution: read-only record access plus append-only event logs.
    let active = store.get(&content).unwrap();
    assert!(active.meta.audit_pass);
    assert_eq!(active.amplification_at, Some(1_700_000_060_000));
    // Stamping post-hoc fields must not have disturbed the identity.
    assert_eq!(active.content_hash(), record.hash);

    assert!(store.append_attribution(&AttributionEvent {
        timestamp: 1_700_000_062_500,
        signal_hash: content.clone(),
        counterparty: "0x9999999999999999999999999999999999999999".to_string(),
        yield_wei: "1500000000000".to_string(),
        similarity: 0.85,
        tx_hash: "0xbot01".to_string(),
    }));
    let attributions = store.list_attributions();
    assert_eq!(attributions.len(), 1);
    assert_eq!(attributions[0].signal_hash, content);
}

/// Causal chain: every child's parent hash resolves in the store.
#[test]
fn causal_chain_resolves_through_store() {
    let store = temp_store("chain");
    let root = SignalRecord::new(SignalPattern::EthDaiFlow, None, 1, 1.2, 1_000);
    store.put(&root);

    let mut parent = root.clone();
    for i in 2..=4u32 {
        let child = SignalRecord::new(
            SignalPattern::EthDaiFlow,
            Some(parent.hash.clone()),
            i,
            1.2,
            1_000 + i as u64,
        );
        store.put(&child);
        parent = child;
    }

    // Walk back from the tip to the root.
    let mut cursor = store.get(&parent.hash).unwrap();
    let mut depth = cursor.cascade_depth;
    while let Some(parent_hash) = cursor.parent_hash.clone() {
        cursor = store.get(&parent_hash).expect("parent exists in store");
        assert_eq!(cursor.cascade_depth + 1, depth);
        depth = cursor.cascade_depth;
    }
    assert_eq!(depth, 1);
}

/// Re-listing the successful log yields the rows in emission order, with
/// optimistic confirmations carrying their fault label.
#[test]
fn successful_log_preserves_order_and_labels() {
    let store = temp_store("labels");
    for (i, label) in ["100", "indexing", "rpc_failure"].iter().enumerate() {
        store.append_successful(&CompressedRecord {
            hash: format!("0x{i:02x}"),
            pattern: "STABLE_ROTATION".to_string(),
            intent_class: "STANDARD".to_string(),
            cascade_depth: 1,
            resonance: 1.0,
            created_at: i as u64,
            onchain_tx: None,
            block_number: label.to_string(),
        });
    }
    let rows = store.list_successful();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].block_number, "indexing");
    assert_eq!(rows[2].block_number, "rpc_failure");
}
