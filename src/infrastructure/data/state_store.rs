// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::time::current_unix_ms;
use crate::domain::constants::{LOCK_GRACE_MS, LOCK_POLL_MS, LOCK_STALE_MS};
use crate::infrastructure::data::schema::{EmissionLock, PatternStats, SystemState};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;

const STATE_FILE: &str = "system-state.json";

/// The single `system-state.json` document plus the cross-process emission
/// lock. Writes go through temp-file + rename; a corrupt document degrades
/// to the default state.
#[derive(Clone)]
pub struct StateStore {
    path: PathBuf,
    grace_ms: u64,
    poll_ms: u64,
}

impl StateStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(STATE_FILE),
            grace_ms: LOCK_GRACE_MS,
            poll_ms: LOCK_POLL_MS,
        }
    }

    #[cfg(test)]
    pub fn with_grace(mut self, grace_ms: u64, poll_ms: u64) -> Self {
        self.grace_ms = grace_ms;
        self.poll_ms = poll_ms;
        self
    }

    pub fn load(&self) -> SystemState {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(target: "state", error=%e, "Corrupt state document, starting fresh");
                    SystemState::default()
                }
            },
            Err(_) => SystemState::default(),
        }
    }

    pub fn save(&self, state: &SystemState) -> bool {
        let json = match serde_json::to_vec_pretty(state) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(target: "state", error=%e, "Serialize state failed");
                return false;
            }
        };
        let tmp = self.path.with_extension("json.tmp");
        let result = fs::write(&tmp, &json).and_then(|_| fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            tracing::error!(target: "state", error=%e, "State write failed");
            let _ = fs::remove_file(&tmp);
            return false;
        }
        true
    }

    pub fn mutate<F: FnOnce(&mut SystemState)>(&self, f: F) -> bool {
        let mut state = self.load();
        f(&mut state);
        self.save(&state)
    }

    // ------------------------------------------------------------------
    // Emission lock
    // ------------------------------------------------------------------

    /// Try to take the emission lock for this process. Returns `false` when
    /// another live emitter holds it past the bounded grace window.
    pub async fn acquire_emission_lock(&self) -> bool {
        let self_pid = std::process::id();
        let deadline = current_unix_ms() + self.grace_ms;
        let mut waited = false;

        loop {
            let state = self.load();
            let lock = state.lock;

            if !lock.locked {
                return self.write_lock(self_pid);
            }

            match lock.pid {
                // Held by us: a previous tick died without release.
                Some(pid) if pid == self_pid => {
                    tracing::warn!(target: "state", pid, "Reclaiming lock held by self");
                    return self.write_lock(self_pid);
                }
                Some(pid) => {
                    let age = current_unix_ms().saturating_sub(lock.acquired_at.unwrap_or(0));
                    if age > LOCK_STALE_MS {
                        tracing::warn!(target: "state", pid, age_ms=age, "Recovering stale emission lock");
                        return self.write_lock(self_pid);
                    }
                    if !pid_alive(pid) {
                        tracing::warn!(target: "state", pid, "Lock holder is not running, recovering");
                        return self.write_lock(self_pid);
                    }
                    if waited && current_unix_ms() >= deadline {
                        tracing::info!(target: "state", pid, "Lock held by live emitter, refusing");
                        return false;
                    }
                    waited = true;
                    sleep(Duration::from_millis(self.poll_ms)).await;
                }
                // Locked with no owner recorded: treat as recoverable.
                None => {
                    tracing::warn!(target: "state", "Ownerless lock, recovering");
                    return self.write_lock(self_pid);
                }
            }
        }
    }

    fn write_lock(&self, pid: u32) -> bool {
        self.mutate(|state| {
            state.lock = EmissionLock {
                locked: true,
                pid: Some(pid),
                acquired_at: Some(current_unix_ms()),
            };
        })
    }

    /// Unconditional release. Safe to call on any shutdown path.
    pub fn release_emission_lock(&self) {
        self.mutate(|state| {
            state.lock = EmissionLock {
                locked: false,
                pid: None,
                acquired_at: None,
            };
        });
    }

    // ------------------------------------------------------------------
    // Convenience accessors
    // ------------------------------------------------------------------

    pub fn last_hash(&self) -> Option<String> {
        self.load().last_hash
    }

    pub fn set_last_hash(&self, hash: &str) -> bool {
        self.mutate(|state| state.last_hash = Some(hash.to_string()))
    }

    pub fn record_attempt(&self, pattern: &str, now_ms: u64) -> bool {
        self.mutate(|state| {
            let entry = state
                .metrics
                .patterns
                .entry(pattern.to_string())
                .or_insert_with(PatternStats::default);
            entry.attempts += 1;
            entry.last_used_at = Some(now_ms);
            // Reinforcement is a one-shot boost, consumed by this attempt.
            entry.reinforced = false;
        })
    }

    pub fn record_success(&self, pattern: &str) -> bool {
        self.mutate(|state| {
            let entry = state
                .metrics
                .patterns
                .entry(pattern.to_string())
                .or_insert_with(PatternStats::default);
            entry.successes += 1;
        })
    }

    /// Reinforce a pattern after a strong attribution match. The flag is
    /// consumed by the selector on its next scoring pass.
    pub fn reinforce_pattern(&self, pattern: &str) -> bool {
        self.mutate(|state| {
            let entry = state
                .metrics
                .patterns
                .entry(pattern.to_string())
                .or_insert_with(PatternStats::default);
            entry.reinforced = true;
        })
    }

    pub fn bump_error(&self, class: &str) -> bool {
        self.mutate(|state| {
            *state
                .metrics
                .error_counts
                .entry(class.to_string())
                .or_insert(0) += 1;
        })
    }
}

fn pid_alive(pid: u32) -> bool {
    // Liveness probe; a PID we cannot observe is assumed alive so we never
    // steal a lock from a running emitter.
    if cfg!(target_os = "linux") {
        Path::new(&format!("/proc/{pid}")).exists()
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_state(tag: &str) -> StateStore {
        let dir = std::env::temp_dir().join(format!(
            "signaljam-state-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        StateStore::new(dir).with_grace(50, 10)
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let store = temp_state("basic");
        assert!(store.acquire_emission_lock().await);
        let state = store.load();
        assert!(state.lock.locked);
        assert_eq!(state.lock.pid, Some(std::process::id()));

        store.release_emission_lock();
        let state = store.load();
        assert!(!state.lock.locked);
        assert_eq!(state.lock.pid, None);
        assert_eq!(state.lock.acquired_at, None);
    }

    #[tokio::test]
    async fn self_held_lock_is_reclaimed() {
        let store = temp_state("self");
        assert!(store.acquire_emission_lock().await);
        // Simulate a crashed tick that never released.
        assert!(store.acquire_emission_lock().await);
    }

    #[tokio::test]
    async fn stale_lock_is_recovered() {
        let store = temp_state("stale");
        store.mutate(|s| {
            s.lock = EmissionLock {
                locked: true,
                pid: Some(u32::MAX - 1),
                acquired_at: Some(current_unix_ms() - LOCK_STALE_MS - 1),
            };
        });
        assert!(store.acquire_emission_lock().await);
    }

    #[tokio::test]
    async fn dead_pid_lock_is_recovered() {
        let store = temp_state("deadpid");
        store.mutate(|s| {
            s.lock = EmissionLock {
                locked: true,
                // Nothing plausible runs at this PID.
                pid: Some(u32::MAX - 7),
                acquired_at: Some(current_unix_ms()),
            };
        });
        assert!(store.acquire_emission_lock().await);
    }

    #[tokio::test]
    async fn live_foreign_lock_is_refused_after_grace() {
        if !Path::new("/proc/1").exists() {
            return;
        }
        let store = temp_state("live");
        store.mutate(|s| {
            s.lock = EmissionLock {
                locked: true,
                pid: Some(1),
                acquired_at: Some(current_unix_ms()),
            };
        });
        assert!(!store.acquire_emission_lock().await);
    }

    #[tokio::test]
    async fn released_lock_within_grace_is_acquired() {
        if !Path::new("/proc/1").exists() {
            return;
        }
        let store = temp_state("grace");
        store.mutate(|s| {
            s.lock = EmissionLock {
                locked: true,
                pid: Some(1),
                acquired_at: Some(current_unix_ms()),
            };
        });
        let racer = store.clone();
        let release = tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            racer.release_emission_lock();
        });
        assert!(store.acquire_emission_lock().await);
        release.await.unwrap();
    }

    #[test]
    fn corrupt_state_degrades_to_default() {
        let store = temp_state("corrupt");
        fs::write(store.path.clone(), b"{broken").unwrap();
        let state = store.load();
        assert!(state.last_hash.is_none());
        assert!(!state.lock.locked);
    }

    #[test]
    fn pattern_counters_accumulate() {
        let store = temp_state("counters");
        store.record_attempt("CLASSIC_ARBITRAGE", 1);
        store.record_attempt("CLASSIC_ARBITRAGE", 2);
        store.record_success("CLASSIC_ARBITRAGE");
        let state = store.load();
        let stats = &state.metrics.patterns["CLASSIC_ARBITRAGE"];
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.last_used_at, Some(2));
    }
}
