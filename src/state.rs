//! Usage: The per-process bundle of shared components threaded through axum's `State`.

use std::sync::Arc;

use reqwest::Client;

use crate::config::Config;
use crate::cookies::CookieCache;
use crate::cooldown::CooldownStore;
use crate::nonessential::NonessentialLatch;
use crate::pending::PendingCooldowns;
use crate::usage::UsageCounter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub client: Client,
    pub cooldowns: Arc<CooldownStore>,
    pub cookies: Arc<CookieCache>,
    pub usage: Arc<UsageCounter>,
    pub pending: Arc<PendingCooldowns>,
    pub nonessential: Arc<NonessentialLatch>,
}

impl AppState {
    pub fn new(config: Config) -> reqwest::Result<Self> {
        let client = config.build_client()?;
        let cooldowns = CooldownStore::load(config.cooldown_path.clone(), &config.api_keys);
        let nonessential = NonessentialLatch::new("CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC");
        if config.nonessential_disabled_initial {
            nonessential.set_disabled();
        }
        nonessential.export_to_env();

        Ok(Self {
            config: Arc::new(config),
            client,
            cooldowns: Arc::new(cooldowns),
            cookies: Arc::new(CookieCache::new()),
            usage: Arc::new(UsageCounter::new()),
            pending: Arc::new(PendingCooldowns::new()),
            nonessential: Arc::new(nonessential),
        })
    }
}
