//! Usage: Staging area for cooldowns observed mid-attempt but not yet committed.
//!
//! A request that fails over through several keys on the same URL only learns the
//! URL itself is bad once every key on it has been exhausted. Individual key
//! failures are buffered here and only promoted to the real cooldown store once
//! that URL-level verdict is known — otherwise a single transient key failure
//! would needlessly cool down keys that were never actually proven bad.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::keys::KeyId;
use crate::shared::mutex_ext::MutexExt;

#[derive(Default)]
pub struct PendingCooldowns {
    by_url: Mutex<HashMap<String, Vec<KeyId>>>,
}

impl PendingCooldowns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, url: &str, key_id: KeyId) {
        let mut guard = self.by_url.lock_or_recover();
        let entry = guard.entry(url.to_string()).or_default();
        if !entry.contains(&key_id) {
            entry.push(key_id);
        }
    }

    /// Commit and clear the buffered key ids for `url`, handing them to the caller
    /// to apply to the real cooldown store.
    pub fn confirm(&self, url: &str) -> Vec<KeyId> {
        self.by_url.lock_or_recover().remove(url).unwrap_or_default()
    }

    /// Discard buffered entries for `url` without committing them (the URL
    /// recovered, so the individual key failures were noise).
    pub fn clear(&self, url: &str) {
        self.by_url.lock_or_recover().remove(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_returns_and_clears_buffered_keys() {
        let pending = PendingCooldowns::new();
        pending.add("https://a.test", "deadbeefdeadbeef".to_string());
        pending.add("https://a.test", "cafebabecafebabe".to_string());

        let confirmed = pending.confirm("https://a.test");
        assert_eq!(confirmed.len(), 2);
        assert!(pending.confirm("https://a.test").is_empty());
    }

    #[test]
    fn clear_discards_without_returning() {
        let pending = PendingCooldowns::new();
        pending.add("https://a.test", "deadbeefdeadbeef".to_string());
        pending.clear("https://a.test");
        assert!(pending.confirm("https://a.test").is_empty());
    }

    #[test]
    fn add_is_idempotent_per_key() {
        let pending = PendingCooldowns::new();
        pending.add("https://a.test", "deadbeefdeadbeef".to_string());
        pending.add("https://a.test", "deadbeefdeadbeef".to_string());
        assert_eq!(pending.confirm("https://a.test").len(), 1);
    }

    #[test]
    fn urls_are_independent() {
        let pending = PendingCooldowns::new();
        pending.add("https://a.test", "deadbeefdeadbeef".to_string());
        pending.add("https://b.test", "cafebabecafebabe".to_string());
        assert_eq!(pending.confirm("https://a.test").len(), 1);
        assert_eq!(pending.confirm("https://b.test").len(), 1);
    }
}
