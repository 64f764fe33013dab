//! Situational-awareness ingestion service: binary entrypoint.
//! Boots the pipeline (store, collectors, scheduler) and serves the HTTP
//! trigger/status surface plus `/metrics`.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use situational_ingest::app::{self, build_collectors};
use situational_ingest::ingest::batch::BATCH_COLLECTION;
use situational_ingest::ingest::store::MemoryStore;
use situational_ingest::ingest::types::SourceType;
use situational_ingest::metrics::Metrics;
use situational_ingest::PipelineConfig;

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("situational_ingest=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // try_init: the hosting runtime may have installed a subscriber already.
    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

fn memory_store() -> MemoryStore {
    SourceType::ALL
        .iter()
        .fold(MemoryStore::new(), |s, src| {
            s.with_unique_index(src.collection(), "content_fingerprint")
        })
        .with_unique_index(BATCH_COLLECTION, "batch_id")
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    let collectors = build_collectors(&cfg.collectors).context("building collectors")?;
    if collectors.is_empty() {
        tracing::warn!(target: "ingest", "no collectors configured; runs will report every source as unregistered");
    }

    let metrics = Metrics::init()?;
    let handle = app::init(&cfg, Arc::new(memory_store()), collectors);

    let router = handle.router().merge(metrics.router());
    Ok(router.into())
}
