// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use dashmap::DashSet;
use std::collections::VecDeque;
use std::hash::Hash;
use tokio::sync::Mutex;

/// Insert `key` into a bounded seen set. Returns `true` only for first-seen keys.
pub async fn remember_with_bounded_order<T>(
    seen: &DashSet<T>,
    order: &Mutex<VecDeque<T>>,
    key: T,
    max_len: usize,
) -> bool
where
    T: Clone + Eq + Hash,
{
    if !seen.insert(key.clone()) {
        return false;
    }
    let mut guard = order.lock().await;
    guard.push_back(key);
    if guard.len() > max_len {
        if let Some(oldest) = guard.pop_front() {
            seen.remove(&oldest);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn evicts_oldest_when_full() {
        let seen = DashSet::new();
        let order = Mutex::new(VecDeque::new());

        assert!(remember_with_bounded_order(&seen, &order, 1u64, 2).await);
        assert!(remember_with_bounded_order(&seen, &order, 2u64, 2).await);
        assert!(!remember_with_bounded_order(&seen, &order, 2u64, 2).await);
        assert!(remember_with_bounded_order(&seen, &order, 3u64, 2).await);
        // 1 was evicted and is first-seen again.
        assert!(remember_with_bounded_order(&seen, &order, 1u64, 2).await);
    }
}
