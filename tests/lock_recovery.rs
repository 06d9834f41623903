use signaljam::infrastructure::data::schema::EmissionLock;
use signaljam::infrastructure::data::state_store::StateStore;
use std::fs;
use std::path::PathBuf;

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("signaljam-it-{tag}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Two stores over the same document model two emitter processes. Only one
/// may hold the lock; after release the other can take it.
#[tokio::test]
async fn single_writer_across_store_handles() {
    let dir = temp_dir("single-writer");
    let a = StateStore::new(&dir);
    let b = StateStore::new(&dir);

    assert!(a.acquire_emission_lock().await);
    let held = b.load().lock;
    assert!(held.locked);
    assert_eq!(held.pid, Some(std::process::id()));

    a.release_emission_lock();
    assert!(b.acquire_emission_lock().await);
    b.release_emission_lock();
}

/// A lock whose owner stopped running is recoverable on the next acquire,
/// regardless of its age.
#[tokio::test]
async fn dead_owner_lock_recovers_without_waiting() {
    let dir = temp_dir("dead-owner");
    let store = StateStore::new(&dir);
    store.mutate(|s| {
        s.lock = EmissionLock {
            locked: true,
            pid: Some(u32::MAX - 3),
            acquired_at: Some(signaljam::common::time::current_unix_ms()),
        };
    });
    assert!(store.acquire_emission_lock().await);
    store.release_emission_lock();
}

/// Lock state survives the rest of the document being rewritten.
#[tokio::test]
async fn lock_and_last_hash_coexist_in_one_document() {
    let dir = temp_dir("document");
    let store = StateStore::new(&dir);

    assert!(store.acquire_emission_lock().await);
    store.set_last_hash("0xabc123");
    store.record_attempt("ETH_DAI_FLOW", 42);

    let state = store.load();
    assert!(state.lock.locked);
    assert_eq!(state.last_hash.as_deref(), Some("0xabc123"));
    assert_eq!(state.metrics.patterns["ETH_DAI_FLOW"].attempts, 1);

    store.release_emission_lock();
    let state = store.load();
    assert!(!state.lock.locked);
    // Release only touches the lock.
    assert_eq!(state.last_hash.as_deref(), Some("0xabc123"));
}
