use std::net::SocketAddr;

use failover_gateway::config::Config;
use failover_gateway::routes::build_router;
use failover_gateway::state::AppState;
use failover_gateway::{logging, ProxyError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    logging::init(config.debug_mode);

    let port = config.port;
    let state = AppState::new(config).map_err(ProxyError::from)?;
    let router = build_router(state);

    let addr: SocketAddr = format!("127.0.0.1:{port}")
        .parse()
        .map_err(|_| ProxyError::InvalidListenAddress(port))?;

    tracing::info!(%addr, "starting failover gateway");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(ProxyError::Bind)?;

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ProxyError::Serve)?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
