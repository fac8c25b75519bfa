//! Usage: Per-key request counter, used only to order key selection (not billing).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::cooldown::CooldownStore;
use crate::keys::key_id;
use crate::shared::mutex_ext::MutexExt;

#[derive(Default)]
pub struct UsageCounter {
    counts: Mutex<HashMap<String, u64>>,
}

impl UsageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, key: &str) {
        let mut guard = self.counts.lock_or_recover();
        *guard.entry(key_id(key)).or_insert(0) += 1;
    }

    pub fn count(&self, key: &str) -> u64 {
        *self.counts.lock_or_recover().get(&key_id(key)).unwrap_or(&0)
    }

    /// Candidate keys not currently in cooldown, ordered by ascending usage count
    /// (least-used first), with ties broken by original candidate order.
    ///
    /// If every candidate is in cooldown, falls back to all configured keys ordered
    /// by ascending cooldown expiry, so the caller can still iterate through every
    /// key as they free up instead of being stuck retrying a single one.
    pub fn sorted_available(&self, candidates: &[String], cooldowns: &CooldownStore) -> Vec<String> {
        let guard = self.counts.lock_or_recover();
        let mut available: Vec<(usize, &String)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, k)| !cooldowns.is_key_in_cooldown(&key_id(k)))
            .collect();

        if available.is_empty() {
            return cooldowns.keys_by_expiry_ascending(candidates);
        }

        available.sort_by_key(|(idx, k)| (*guard.get(&key_id(k)).unwrap_or(&0), *idx));
        available.into_iter().map(|(_, k)| k.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, CooldownStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cooldown_state.json");
        (dir, CooldownStore::load(path, &[]))
    }

    #[test]
    fn orders_by_ascending_usage() {
        let counter = UsageCounter::new();
        let (_dir, cooldowns) = store();
        let candidates = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        counter.increment("a");
        counter.increment("a");
        counter.increment("b");

        let sorted = counter.sorted_available(&candidates, &cooldowns);
        assert_eq!(sorted, vec!["c".to_string(), "b".to_string(), "a".to_string()]);
    }

    #[test]
    fn ties_keep_candidate_order() {
        let counter = UsageCounter::new();
        let (_dir, cooldowns) = store();
        let candidates = vec!["x".to_string(), "y".to_string()];
        assert_eq!(counter.sorted_available(&candidates, &cooldowns), candidates);
    }

    #[test]
    fn falls_back_to_all_keys_ordered_by_expiry_when_all_cooling_down() {
        let counter = UsageCounter::new();
        let (_dir, cooldowns) = store();
        let candidates = vec!["a".to_string(), "b".to_string()];

        cooldowns.set_key_cooldown_until(&key_id("a"), crate::cooldown::now_unix() + 500);
        cooldowns.set_key_cooldown_until(&key_id("b"), crate::cooldown::now_unix() + 10);

        assert_eq!(
            counter.sorted_available(&candidates, &cooldowns),
            vec!["b".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn excludes_keys_in_cooldown_from_normal_ordering() {
        let counter = UsageCounter::new();
        let (_dir, cooldowns) = store();
        let candidates = vec!["a".to_string(), "b".to_string()];
        cooldowns.set_key_cooldown(&key_id("a"));

        assert_eq!(counter.sorted_available(&candidates, &cooldowns), vec!["b".to_string()]);
    }
}
