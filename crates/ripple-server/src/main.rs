mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ripple_api::identity::{IdentityPool, TokenService};
use ripple_api::rate_limit::{RateLimitConfig, RateLimiter};
use ripple_api::sweep::run_sweep_loop;
use ripple_api::{AppStateInner, RoomCoordinator};
use ripple_db::Database;
use ripple_gateway::{Dispatcher, DispatcherConfig};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.uses_dev_secret() {
        warn!("RIPPLE_JWT_SECRET is unset; using the development secret. Do not run this in production.");
    }

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    let dispatcher = Dispatcher::with_config(DispatcherConfig {
        send_timeout: config.send_timeout,
        ..DispatcherConfig::default()
    });
    let limiter = RateLimiter::new(
        RateLimitConfig::new(config.post_limit, config.rate_window),
        RateLimitConfig::new(config.vote_limit, config.rate_window),
    );
    let coordinator = Arc::new(RoomCoordinator::new(
        db,
        IdentityPool::default(),
        TokenService::new(&config.jwt_secret),
        limiter,
        dispatcher,
        config.token_ttl,
    ));

    // Background expiry sweep
    let shutdown = CancellationToken::new();
    let sweep = tokio::spawn(run_sweep_loop(
        coordinator.clone(),
        config.sweep_interval,
        shutdown.clone(),
    ));

    let app = ripple_api::router(Arc::new(AppStateInner {
        coordinator,
        secure_cookies: config.secure_cookies,
    }))
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http());

    info!("Ripple server listening on {}", config.addr);
    info!("Sweeping expired rooms every {:?}", config.sweep_interval);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = sweep.await {
        error!("Sweep task ended abnormally: {}", e);
    }

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
    shutdown.cancel();
}
