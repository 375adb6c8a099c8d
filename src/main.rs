//! promcache Binary Entry Point
//!
//! Runs the caching exporter. Core functionality is provided by the
//! `promcache` library crate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use promcache::{
    cache::{CacheBuilder, CacheSweeper, EvictionReason},
    collector::Collector,
    config::AppConfig,
    exposition::ExporterMetrics,
    provider::ProviderLoader,
    refresh::RefreshScheduler,
    server::{AppState, create_router},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bound on each background component's shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// promcache - caching Prometheus exporter
#[derive(Parser, Debug)]
#[command(name = "promcache", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "PROMCACHE_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "PROMCACHE_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "PROMCACHE_SERVER_PORT")]
    server_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,promcache=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("promcache {}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load_with_provider_path(&cli.config)?;

    // CLI > ENV > config file
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    config.validate()?;

    tracing::info!(
        "Server: {}:{}, cache ttl: {}, refresh: {}",
        config.server.bind,
        config.server.port,
        humantime::format_duration(config.cache.ttl),
        if config.refresh.enabled {
            humantime::format_duration(config.refresh.interval).to_string()
        } else {
            "disabled".to_string()
        },
    );

    let providers = config.providers.build_providers(&config.namespace)?;
    if providers.is_empty() {
        tracing::warn!("No providers enabled; /metrics will only expose exporter metrics");
    }
    for provider in &providers {
        tracing::info!("Registered provider: {}", provider.name());
    }

    let loader = ProviderLoader::new(&providers)?;
    let keys = loader.keys();

    let cache = CacheBuilder::new(Arc::new(loader))
        .ttl(config.cache.ttl)
        .on_eviction(|key, reason| match reason {
            EvictionReason::Expired => tracing::debug!(key = %key, "Evicting expired key"),
            EvictionReason::Swept => tracing::info!(key = %key, "Evicting key"),
        })
        .build();

    let sweeper = CacheSweeper::start(
        cache.clone(),
        config.cache.sweep_interval,
        config.cache.sweep_grace,
    );

    let scheduler = RefreshScheduler::new(cache.clone());
    if config.refresh.enabled {
        for key in &keys {
            scheduler.track(key.clone(), config.refresh.interval).await?;
        }
        scheduler.start().await;
        tracing::info!("Refresh scheduler started with {} jobs", scheduler.job_count().await);
    }

    let app_state = AppState {
        collector: Arc::new(Collector::new(providers, cache)),
        metrics: ExporterMetrics::new(&config.namespace)?,
        settings: config.scrape,
        namespace: config.namespace.clone(),
    };

    let app = create_router(app_state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    tracing::info!("Web server listening on: http://{}/metrics", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler, sweeper))
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for a termination signal, then stop background work.
async fn shutdown_signal(scheduler: RefreshScheduler, sweeper: CacheSweeper) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    tracing::info!("Stopping refresh scheduler...");
    scheduler.shutdown_with_timeout(SHUTDOWN_TIMEOUT).await;

    tracing::info!("Stopping cache sweeper...");
    sweeper.shutdown_with_timeout(SHUTDOWN_TIMEOUT).await;
}
