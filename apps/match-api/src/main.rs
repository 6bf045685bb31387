mod config;
mod errors;
mod matching;
mod models;
mod routes;
mod score_client;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::matching::views::ViewRegistry;
use crate::routes::build_router;
use crate::score_client::{RetryPolicy, UpstreamClient};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting match-api v{}", env!("CARGO_PKG_VERSION"));

    // Initialize upstream score client
    let upstream = UpstreamClient::new(
        &config.upstream_api_url,
        Duration::from_secs(config.upstream_timeout_secs),
        RetryPolicy {
            max_attempts: config.upstream_max_retries,
            base_delay: Duration::from_millis(config.upstream_retry_base_ms),
        },
    )?;
    info!(
        "Upstream client initialized ({}, {} attempts)",
        config.upstream_api_url, config.upstream_max_retries
    );

    // Build app state
    let view_idle = Duration::from_secs(config.view_idle_secs);
    let state = AppState {
        views: ViewRegistry::new(Arc::new(upstream), config.max_views, view_idle),
    };

    // Reclaim views whose tabs went away without closing them
    let views = state.views.clone();
    let period = Duration::from_secs((config.view_idle_secs / 4).clamp(1, 60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let reclaimed = views.sweep_idle();
            if reclaimed > 0 {
                info!("Reclaimed {reclaimed} idle views");
            }
        }
    });

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins to the careers front-end host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
