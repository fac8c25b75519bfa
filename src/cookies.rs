//! Usage: Per-URL cookie jar, refreshed through the anti-bot challenge solver.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::Client;

use crate::challenge;
use crate::shared::mutex_ext::MutexExt;

const COOKIE_TTL: Duration = Duration::from_secs(300);

/// Hosts known to front their API behind the inline JS challenge. Any other host
/// is assumed to need no cookie at all.
const CHALLENGE_HOST_MARKERS: &[&str] = &["anyrouter", "cspok"];

struct CookieJar {
    cookies: HashMap<String, String>,
    refreshed_at: Instant,
}

impl CookieJar {
    fn is_fresh(&self) -> bool {
        self.refreshed_at.elapsed() < COOKIE_TTL
    }
}

#[derive(Default)]
pub struct CookieCache {
    jars: Mutex<HashMap<String, CookieJar>>,
}

pub fn may_require_challenge(url: &str) -> bool {
    CHALLENGE_HOST_MARKERS.iter().any(|m| url.contains(m))
}

impl CookieCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cookie header value for `url`, refreshing it first if stale,
    /// forced, or missing. Hosts that never need a challenge cookie return `None`
    /// without making any network call.
    pub async fn ensure(&self, client: &Client, url: &str, force: bool) -> Option<String> {
        if !may_require_challenge(url) {
            return None;
        }

        let needs_refresh = {
            let guard = self.jars.lock_or_recover();
            match guard.get(url) {
                Some(jar) => force || !jar.is_fresh(),
                None => true,
            }
        };

        if needs_refresh {
            if let Some(cookies) = self.refresh(client, url).await {
                self.jars.lock_or_recover().insert(
                    url.to_string(),
                    CookieJar {
                        cookies,
                        refreshed_at: Instant::now(),
                    },
                );
            }
        }

        self.jars
            .lock_or_recover()
            .get(url)
            .map(|jar| cookie_header(&jar.cookies))
    }

    /// Return the cookie header for `url` if a jar already exists, with no
    /// `may_require_challenge` gate and no network access. Used right after the
    /// failover loop solves a challenge inline for a host that `ensure` would
    /// otherwise skip entirely, so the just-solved token is actually sent on retry.
    pub fn stored(&self, url: &str) -> Option<String> {
        self.jars.lock_or_recover().get(url).map(|jar| cookie_header(&jar.cookies))
    }

    /// Stash a single cookie directly, bypassing a network refresh. Used when the
    /// failover loop has already solved a challenge inline and just needs the jar
    /// updated before the next retry.
    pub fn store_token(&self, url: &str, name: &str, value: &str) {
        let mut guard = self.jars.lock_or_recover();
        let jar = guard.entry(url.to_string()).or_insert_with(|| CookieJar {
            cookies: HashMap::new(),
            refreshed_at: Instant::now(),
        });
        jar.cookies.insert(name.to_string(), value.to_string());
        jar.refreshed_at = Instant::now();
    }

    async fn refresh(&self, client: &Client, url: &str) -> Option<HashMap<String, String>> {
        let resp = client
            .get(url)
            .header("Accept-Encoding", "identity")
            .send()
            .await
            .ok()?;

        let mut cookies = HashMap::new();
        for value in resp.headers().get_all(reqwest::header::SET_COOKIE) {
            if let Ok(s) = value.to_str() {
                if let Some((name, value)) = parse_set_cookie(s) {
                    cookies.insert(name, value);
                }
            }
        }

        let body = resp.text().await.ok()?;
        if let Some(token) = challenge::solve(&body) {
            cookies.insert("acw_sc__v2".to_string(), token);
        }

        if cookies.is_empty() {
            None
        } else {
            Some(cookies)
        }
    }
}

fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let first = raw.split(';').next()?;
    let (name, value) = first.split_once('=')?;
    Some((name.trim().to_string(), value.trim().to_string()))
}

fn cookie_header(cookies: &HashMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; ")
}
