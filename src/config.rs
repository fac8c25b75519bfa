//! Usage: Environment + headers-overlay loading, read once at process start.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;

use crate::body_rewrite::RewritePolicy;

const DEFAULT_CANDIDATE_URLS: &[&str] = &[
    "https://anyrouter.top",
    "https://pmpjzaew.cn-nb1.rainyun.xyz",
    "https://demo.cspok.top",
    "https://api.anthropic.com",
];

const DEFAULT_PORT: u16 = 8088;
const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub candidate_urls: Vec<String>,
    pub api_keys: Vec<String>,
    pub rewrite_policy: RewritePolicy,
    pub port: u16,
    pub debug_mode: bool,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub nonessential_disabled_initial: bool,
    pub headers_overlay: HashMap<String, String>,
    pub cooldown_path: PathBuf,
}

impl Config {
    /// Read every setting from the environment and the optional headers overlay
    /// file. Never called again after startup — nothing downstream re-reads env.
    pub fn from_env() -> Self {
        let candidate_urls = match std::env::var("CANDIDATE_URLS") {
            Ok(raw) if !raw.trim().is_empty() => split_csv(&raw),
            _ => DEFAULT_CANDIDATE_URLS.iter().map(|s| s.to_string()).collect(),
        };

        let api_keys = std::env::var("API_KEYS").map(|raw| split_csv(&raw)).unwrap_or_default();

        let replacement = std::env::var("SYSTEM_PROMPT_REPLACEMENT").ok();
        let insert_if_not_exist = env_bool("SYSTEM_PROMPT_BLOCK_INSERT_IF_NOT_EXIST", false);

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let headers_overlay = load_headers_overlay();

        Self {
            api_base_url: std::env::var("API_BASE_URL").unwrap_or_else(|_| "https://anyrouter.top".to_string()),
            candidate_urls,
            api_keys,
            rewrite_policy: RewritePolicy {
                replacement,
                insert_if_not_exist,
            },
            port,
            debug_mode: env_bool("DEBUG_MODE", false),
            http_proxy: std::env::var("HTTP_PROXY").ok(),
            https_proxy: std::env::var("HTTPS_PROXY").ok(),
            nonessential_disabled_initial: env_bool("CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC", false),
            headers_overlay,
            cooldown_path: PathBuf::from("cooldown_state.json"),
        }
    }

    pub fn build_client(&self) -> reqwest::Result<Client> {
        let mut builder = Client::builder()
            .timeout(OUTBOUND_TIMEOUT)
            .user_agent(concat!("failover-gateway/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = &self.http_proxy {
            builder = builder.proxy(reqwest::Proxy::http(proxy)?);
        }
        if let Some(proxy) = &self.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }

        builder.build()
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn load_headers_overlay() -> HashMap<String, String> {
    let path = PathBuf::from("env/.env.headers.json");
    match std::fs::read(&path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            tracing::warn!("headers overlay at {} is malformed: {err}", path.display());
            HashMap::new()
        }),
        Err(_) => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_csv_trims_and_drops_empty() {
        assert_eq!(split_csv(" a, b ,,c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn env_bool_parses_common_truthy_forms() {
        std::env::set_var("FAILOVER_GATEWAY_TEST_BOOL", "true");
        assert!(env_bool("FAILOVER_GATEWAY_TEST_BOOL", false));
        std::env::set_var("FAILOVER_GATEWAY_TEST_BOOL", "0");
        assert!(!env_bool("FAILOVER_GATEWAY_TEST_BOOL", true));
        std::env::remove_var("FAILOVER_GATEWAY_TEST_BOOL");
        assert!(env_bool("FAILOVER_GATEWAY_TEST_BOOL", true));
    }
}
