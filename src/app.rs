// src/app.rs
//! Composition root. Everything is constructed explicitly in [`init`] and torn
//! down by [`AppHandle::shutdown`]; nothing starts at import time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;

use crate::config::pipeline::CollectorsSection;
use crate::config::PipelineConfig;
use crate::ingest::batch::BatchTracker;
use crate::ingest::collector::{CollectorRegistry, FixtureCollector};
use crate::ingest::orchestrator::Orchestrator;
use crate::ingest::pool::WorkerPools;
use crate::ingest::providers::news_rss::NewsRssCollector;
use crate::ingest::retention::{self, RetentionPolicy};
use crate::ingest::scheduler::{JobDefinition, Scheduler};
use crate::ingest::store::IngestionStore;
use crate::ingest::types::SourceType;

pub const RETENTION_JOB: &str = "retention_cleanup";

pub fn ingest_job_id(source: SourceType) -> String {
    format!("ingest_{source}")
}

struct AppInner {
    orchestrator: Orchestrator,
    scheduler: Scheduler,
    retention: RetentionPolicy,
}

/// Cheap to clone; shared by the HTTP layer and the binary.
#[derive(Clone)]
pub struct AppHandle {
    inner: Arc<AppInner>,
}

/// Wire store, collectors, pools, tracker, orchestrator and scheduler, and
/// start the scheduled jobs. Must be called inside a Tokio runtime.
pub fn init(
    cfg: &PipelineConfig,
    store: Arc<dyn IngestionStore>,
    collectors: CollectorRegistry,
) -> AppHandle {
    let pools = WorkerPools::new(cfg.pools.io_workers, cfg.pools.cpu_workers);
    let tracker = Arc::new(BatchTracker::new(store.clone(), cfg.pipeline.batch_history));
    let orchestrator = Orchestrator::new(
        collectors,
        store,
        tracker,
        pools.clone(),
        cfg.orchestrator(),
    );

    let scheduler = Scheduler::new(pools);
    scheduler.apply(job_definitions(&orchestrator, cfg));

    tracing::info!(
        target: "ingest",
        sources = ?orchestrator.registered_sources(),
        jobs = scheduler.jobs().len(),
        "pipeline initialized"
    );

    AppHandle {
        inner: Arc::new(AppInner {
            orchestrator,
            scheduler,
            retention: cfg.retention.clone(),
        }),
    }
}

/// One ingest job per source that has a collector and a non-zero interval,
/// plus the retention job.
pub fn job_definitions(orchestrator: &Orchestrator, cfg: &PipelineConfig) -> Vec<JobDefinition> {
    let mut defs = Vec::new();
    for src in orchestrator.registered_sources() {
        let Some(interval) = cfg.schedule.interval_for(src) else {
            continue;
        };
        let orch = orchestrator.clone();
        defs.push(JobDefinition::new(ingest_job_id(src), interval, move || {
            let orch = orch.clone();
            async move {
                orch.run_ingestion(&[src]).await?;
                Ok(())
            }
        }));
    }

    if let Some(interval) = cfg.schedule.retention_interval() {
        let store = orchestrator.store().clone();
        let policy = cfg.retention.clone();
        defs.push(JobDefinition::new(RETENTION_JOB, interval, move || {
            let store = store.clone();
            let policy = policy.clone();
            async move {
                let report = retention::cleanup(store.as_ref(), &policy, chrono::Utc::now()).await;
                if !report.errors.is_empty() {
                    anyhow::bail!("retention failed for {:?}", report.errors.keys().collect::<Vec<_>>());
                }
                Ok(())
            }
        }));
    }
    defs
}

/// Build collectors from the `[collectors]` config section.
pub fn build_collectors(cfg: &CollectorsSection) -> Result<CollectorRegistry> {
    let mut reg = CollectorRegistry::new();

    if let Some(dir) = &cfg.fixture_dir {
        if !dir.is_dir() {
            anyhow::bail!("fixture_dir {} is not a directory", dir.display());
        }
        for src in SourceType::ALL {
            let path = dir.join(format!("{src}.json"));
            if path.exists() {
                reg.register(Arc::new(FixtureCollector::from_path(src, path)));
            }
        }
    }

    let mut rss: Option<NewsRssCollector> = None;
    for feed in &cfg.news_rss {
        let is_url = feed.starts_with("http://") || feed.starts_with("https://");
        if is_url && cfg!(not(feature = "ingest-http")) {
            tracing::warn!(target: "ingest", feed = %feed, "rss url ignored: built without `ingest-http`");
            continue;
        }
        let c = rss.take().unwrap_or_else(NewsRssCollector::empty);
        rss = Some(if is_url { add_url(c, feed) } else { c.with_file(feed.as_str()) });
    }
    // An RSS collector takes precedence over a news fixture.
    if let Some(c) = rss {
        reg.register(Arc::new(c));
    }

    Ok(reg)
}

#[cfg(feature = "ingest-http")]
fn add_url(c: NewsRssCollector, url: &str) -> NewsRssCollector {
    c.with_url(url)
}

#[cfg(not(feature = "ingest-http"))]
fn add_url(c: NewsRssCollector, _url: &str) -> NewsRssCollector {
    c
}

impl AppHandle {
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.inner.orchestrator
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn store(&self) -> &Arc<dyn IngestionStore> {
        self.inner.orchestrator.store()
    }

    pub fn retention_policy(&self) -> &RetentionPolicy {
        &self.inner.retention
    }

    pub fn router(&self) -> Router {
        crate::api::router(self.clone())
    }

    /// Stop scheduling and give in-flight runs up to `grace` to finish.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.scheduler.shutdown(grace).await;
    }
}
