//! `crew_server` binary.
//!
//! Reads config from the environment, freezes the map into a shared
//! [`MatchConfig`], opens the first lobby match and serves `/connect` and
//! `/health` until SIGINT or SIGTERM.

mod app;
mod config;
mod game;
mod http;
mod matchmaking;
mod util;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::AppState;
use crate::config::Config;
use crate::game::map::MapData;
use crate::game::rules::MatchRules;
use crate::game::MatchConfig;
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal outside development
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level)?;
    init_server_time();

    info!(addr = %config.server_addr, version = env!("CARGO_PKG_VERSION"), "Starting crew_server");

    let match_config = load_match_config(&config)?;

    // Opens the first lobby match
    let state = AppState::new(config.clone(), match_config);
    let router = build_router(state);

    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Listening on http://{addr} (health at /health, players at ws://{addr}/connect?name=<name>)");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Load the configured map (or the bundled one) and build the navmesh.
/// Any failure here stops the server before it binds.
fn load_match_config(config: &Config) -> anyhow::Result<Arc<MatchConfig>> {
    let map = match &config.map_path {
        Some(path) => {
            MapData::load(path).with_context(|| format!("loading map {}", path.display()))?
        }
        None => MapData::bundled().context("loading bundled map")?,
    };
    let match_config = MatchConfig::new(MatchRules::default(), map).context("building navmesh")?;

    info!(
        source = %config.map_path.as_deref().map_or("bundled".into(), |p| p.display().to_string()),
        bounds = ?match_config.navmesh.bounds(),
        polygons = match_config.navmesh.polygons().len(),
        tasks = match_config.tasks.len(),
        "Map loaded"
    );
    Ok(match_config)
}

/// `RUST_LOG` wins over `LOG_LEVEL`; a bad directive in either is fatal
fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::try_new(&directives)
            .with_context(|| format!("parsing RUST_LOG {directives:?}"))?,
        Err(_) => EnvFilter::try_new(log_level)
            .with_context(|| format!("parsing LOG_LEVEL {log_level:?}"))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .context("installing tracing subscriber")
}

/// Resolves on the first shutdown signal, which lets axum drain connections
async fn shutdown_signal() {
    let signal = tokio::select! {
        _ = ctrl_c() => "SIGINT",
        _ = terminate() => "SIGTERM",
    };
    info!(signal, "Shutting down");
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a handler Ctrl+C kills the process outright
        warn!(error = %e, "Ctrl+C handler unavailable");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
