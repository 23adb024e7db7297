//! DevRel resource aggregator: binary entrypoint.
//! Loads configuration, wires fetchers, store and merge engine, and serves
//! the HTTP API with optional periodic refresh.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use devrel_aggregator::api::{self, AppState};
use devrel_aggregator::config::AggregatorConfig;
use devrel_aggregator::metrics::Metrics;
use devrel_aggregator::pipeline::Aggregator;
use devrel_aggregator::scheduler::{spawn_update_scheduler, SchedulerCfg};

/// `RUST_LOG` wins; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("devrel_aggregator=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AggregatorConfig::load_default().context("loading aggregator config")?;
    tracing::info!(
        data_dir = %cfg.data_dir.display(),
        bind = %cfg.bind_addr,
        update_interval_secs = cfg.update_interval_secs,
        "starting devrel aggregator"
    );

    let aggregator = Arc::new(Aggregator::from_config(&cfg)?);
    let state = AppState::new(aggregator.clone(), cfg.cache_ttl());

    let metrics = Metrics::init(cfg.cache_ttl_secs)?;
    let app = api::router(state.clone()).merge(metrics.router());

    if let Some(_handle) = spawn_update_scheduler(
        SchedulerCfg {
            interval_secs: cfg.update_interval_secs,
        },
        aggregator,
        state.cache.clone(),
    ) {
        tracing::info!("background update scheduler running");
    }

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, "listening");
    axum::serve(listener, app).await.context("http server")?;
    Ok(())
}
