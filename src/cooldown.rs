//! Usage: Persistent, crash-tolerant cooldown state for candidate URLs and keys.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::keys::KeyId;
use crate::shared::mutex_ext::MutexExt;

const SCHEMA_VERSION: u32 = 2;
pub const DEFAULT_COOLDOWN_SECS: i64 = 72 * 60 * 60;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CooldownDocument {
    schema_version: u32,
    #[serde(default)]
    keys: HashMap<String, i64>,
    #[serde(default)]
    urls: HashMap<String, i64>,
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Persistent map of {URL -> expiry} and {KeyId -> expiry}, backed by a single JSON
/// document written atomically (write-to-temp, then rename).
pub struct CooldownStore {
    path: PathBuf,
    keys: Mutex<HashMap<KeyId, i64>>,
    urls: Mutex<HashMap<String, i64>>,
}

impl CooldownStore {
    /// Load state from `path`, normalizing schema-version-1 (plaintext key) records
    /// into KeyIds and dropping anything unrecognized. A missing or unparsable file
    /// starts empty; failures are logged, never fatal.
    pub fn load(path: PathBuf, known_keys: &[String]) -> Self {
        let doc = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<CooldownDocument>(&bytes).ok());

        let (keys, urls) = match doc {
            Some(doc) if doc.schema_version >= 2 => (doc.keys, doc.urls),
            Some(doc) => {
                tracing::warn!("cooldown_state.json is schema v1: translating plaintext keys");
                let mut keys = HashMap::new();
                for (plaintext_or_id, expiry) in doc.keys {
                    if let Some(real_key) = known_keys.iter().find(|k| k.as_str() == plaintext_or_id) {
                        keys.insert(crate::keys::key_id(real_key), expiry);
                    }
                    // Unknown entries (key rotated out, or already a KeyId we can't map) are dropped.
                }
                (keys, doc.urls)
            }
            None => (HashMap::new(), HashMap::new()),
        };

        let now = now_unix();
        let keys = keys.into_iter().filter(|&(_, exp)| exp > now).collect();
        let urls = urls.into_iter().filter(|&(_, exp)| exp > now).collect();

        Self {
            path,
            keys: Mutex::new(keys),
            urls: Mutex::new(urls),
        }
    }

    pub fn set_url_cooldown(&self, url: &str) {
        self.set_url_cooldown_until(url, now_unix() + DEFAULT_COOLDOWN_SECS);
    }

    pub fn set_url_cooldown_until(&self, url: &str, expiry: i64) {
        self.urls.lock_or_recover().insert(url.to_string(), expiry);
        self.save();
    }

    pub fn set_key_cooldown(&self, key_id: &KeyId) {
        self.set_key_cooldown_until(key_id, now_unix() + DEFAULT_COOLDOWN_SECS);
    }

    pub fn set_key_cooldown_until(&self, key_id: &KeyId, expiry: i64) {
        self.keys.lock_or_recover().insert(key_id.clone(), expiry);
        self.save();
    }

    pub fn is_url_in_cooldown(&self, url: &str) -> bool {
        let mut guard = self.urls.lock_or_recover();
        match guard.get(url) {
            Some(&expiry) if expiry > now_unix() => true,
            Some(_) => {
                guard.remove(url);
                false
            }
            None => false,
        }
    }

    pub fn is_key_in_cooldown(&self, key_id: &KeyId) -> bool {
        let mut guard = self.keys.lock_or_recover();
        match guard.get(key_id) {
            Some(&expiry) if expiry > now_unix() => true,
            Some(_) => {
                guard.remove(key_id);
                false
            }
            None => false,
        }
    }

    /// URL whose cooldown expires soonest, used as the fallback when every candidate
    /// URL is currently cooling down.
    pub fn earliest_expiring_url(&self, candidates: &[String]) -> Option<String> {
        let guard = self.urls.lock_or_recover();
        candidates
            .iter()
            .filter_map(|u| guard.get(u).map(|&exp| (u.clone(), exp)))
            .min_by_key(|&(_, exp)| exp)
            .map(|(u, _)| u)
    }

    /// All candidates currently in cooldown, ordered by ascending expiry (soonest
    /// first). Used as the fallback when every candidate key is cooling down, so the
    /// caller can still iterate through all of them in the order they'll free up.
    pub fn keys_by_expiry_ascending(&self, candidates: &[String]) -> Vec<String> {
        let guard = self.keys.lock_or_recover();
        let mut by_expiry: Vec<(String, i64)> = candidates
            .iter()
            .filter_map(|k| guard.get(&crate::keys::key_id(k)).map(|&exp| (k.clone(), exp)))
            .collect();
        by_expiry.sort_by_key(|&(_, exp)| exp);
        by_expiry.into_iter().map(|(k, _)| k).collect()
    }

    pub fn available_urls(&self, candidates: &[String]) -> Vec<String> {
        candidates
            .iter()
            .filter(|u| !self.is_url_in_cooldown(u))
            .cloned()
            .collect()
    }

    /// Best-effort atomic save. Failures are logged, never propagated — a save
    /// failure must not abort the in-flight request that triggered it.
    fn save(&self) {
        let doc = CooldownDocument {
            schema_version: SCHEMA_VERSION,
            keys: self.keys.lock_or_recover().clone(),
            urls: self.urls.lock_or_recover().clone(),
        };

        if let Err(err) = write_atomic(&self.path, &doc) {
            tracing::warn!("cooldown store save failed: {err}");
        }
    }
}

fn write_atomic(path: &Path, doc: &CooldownDocument) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)
}
