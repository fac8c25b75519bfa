pub mod body_rewrite;
pub mod challenge;
pub mod config;
pub mod cookies;
pub mod cooldown;
pub mod failover;
pub mod keys;
pub mod logging;
pub mod nonessential;
pub mod pending;
pub mod retry_context;
pub mod routes;
pub mod shared;
pub mod state;
pub mod usage;

use thiserror::Error;

/// Startup-time failures. Distinct from the per-request `FailoverAction`
/// classification in [`failover::classify`], which stays plain data so it stays
/// cheap to branch on per attempt.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("PORT {0} is not a valid listen port")]
    InvalidListenAddress(u16),
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}
