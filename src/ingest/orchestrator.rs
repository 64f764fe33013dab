// src/ingest/orchestrator.rs
//! Pipeline Orchestrator: Collector -> Normalizer -> Deduplicator -> Store per
//! source, sources running concurrently, every failure captured per source.

use std::collections::{BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::{CollectionError, IngestError, IngestResult, StoreError, TrackerError};
use crate::ingest::batch::{BatchReport, BatchTracker, ErrorDescriptor, ErrorKind, SourceResult};
use crate::ingest::collector::{Collector, CollectorRegistry};
use crate::ingest::dedup::{filter_new, fingerprints_of};
use crate::ingest::normalize::normalize_all;
use crate::ingest::pool::WorkerPools;
use crate::ingest::store::{Filter, IngestionStore};
use crate::ingest::types::{Fingerprint, RawRecord, SourceType};

const FINGERPRINT_FIELD: &str = "content_fingerprint";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub collector_timeout: Duration,
    pub run_deadline: Duration,
    /// Cross-batch dedup only considers records ingested within this window;
    /// `None` looks at everything stored.
    pub dedup_lookback: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            collector_timeout: Duration::from_secs(30),
            run_deadline: Duration::from_secs(120),
            dedup_lookback: None,
        }
    }
}

/// Requested sources in request order, duplicates collapsed; empty means all.
pub fn resolve_sources(requested: &[SourceType]) -> Vec<SourceType> {
    if requested.is_empty() {
        return SourceType::ALL.to_vec();
    }
    let mut seen = HashSet::new();
    requested
        .iter()
        .copied()
        .filter(|s| seen.insert(*s))
        .collect()
}

#[derive(Clone)]
pub struct Orchestrator {
    collectors: Arc<CollectorRegistry>,
    store: Arc<dyn IngestionStore>,
    tracker: Arc<BatchTracker>,
    pools: WorkerPools,
    cfg: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        collectors: CollectorRegistry,
        store: Arc<dyn IngestionStore>,
        tracker: Arc<BatchTracker>,
        pools: WorkerPools,
        cfg: OrchestratorConfig,
    ) -> Self {
        Self {
            collectors: Arc::new(collectors),
            store,
            tracker,
            pools,
            cfg,
        }
    }

    pub fn tracker(&self) -> &Arc<BatchTracker> {
        &self.tracker
    }

    pub fn store(&self) -> &Arc<dyn IngestionStore> {
        &self.store
    }

    pub fn pools(&self) -> &WorkerPools {
        &self.pools
    }

    pub fn registered_sources(&self) -> Vec<SourceType> {
        self.collectors.sources()
    }

    /// Open a batch without running it; pair with [`Orchestrator::execute`].
    pub fn begin(&self) -> String {
        self.tracker.start_batch()
    }

    pub async fn run_ingestion(&self, sources: &[SourceType]) -> IngestResult<BatchReport> {
        let batch_id = self.begin();
        self.execute(&batch_id, sources).await
    }

    /// Start a run in the background on an io worker and return its batch id
    /// right away.
    pub fn spawn(&self, sources: Vec<SourceType>) -> (String, JoinHandle<IngestResult<BatchReport>>) {
        let batch_id = self.begin();
        let this = self.clone();
        let id = batch_id.clone();
        let handle = tokio::spawn(async move {
            let _permit = this.pools.io_permit().await;
            let res = this.execute(&id, &sources).await;
            if let Err(e) = &res {
                tracing::warn!(target: "ingest", batch_id = %id, error = %e, "triggered ingestion finished with error");
            }
            res
        });
        (batch_id, handle)
    }

    /// Run `sources` into the already opened batch `batch_id` and finalize it.
    pub async fn execute(&self, batch_id: &str, sources: &[SourceType]) -> IngestResult<BatchReport> {
        crate::ingest::ensure_metrics_described();
        // Reports sealed by an earlier run whose write failed.
        self.tracker.flush_unpersisted().await;
        let sources = resolve_sources(sources);
        // A deadline past the clock's range means the run is unbounded.
        let deadline = tokio::time::Instant::now().checked_add(self.cfg.run_deadline);
        tracing::info!(target: "ingest", batch_id, sources = ?sources, "ingestion run started");

        let mut set = JoinSet::new();
        let mut pending = BTreeSet::new();
        for src in sources {
            let Some(collector) = self.collectors.get(src) else {
                let err = CollectionError::NotRegistered(src);
                tracing::warn!(target: "ingest", batch_id, source = %src, "no collector registered");
                self.record(batch_id, src, SourceResult::failed(false, (&err).into()))?;
                continue;
            };
            pending.insert(src);
            let this = self.clone();
            let bid = batch_id.to_string();
            set.spawn(async move {
                let res = AssertUnwindSafe(this.process_source(&bid, src, collector))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!(target: "ingest", batch_id = %bid, source = %src, "source task panicked");
                        SourceResult::failed(true, (&CollectionError::Panicked).into())
                    });
                (src, res)
            });
        }

        let mut deadline_hit = false;
        loop {
            let next = match deadline {
                Some(at) => tokio::time::timeout_at(at, set.join_next()).await,
                None => Ok(set.join_next().await),
            };
            match next {
                Ok(Some(Ok((src, res)))) => {
                    pending.remove(&src);
                    self.record(batch_id, src, res)?;
                }
                Ok(Some(Err(e))) => {
                    tracing::error!(target: "ingest", batch_id, error = %e, "source task aborted");
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    set.abort_all();
                    break;
                }
            }
        }

        for src in pending {
            let err = if deadline_hit {
                ErrorDescriptor::new(
                    ErrorKind::Timeout,
                    format!("run deadline of {} ms exceeded", self.cfg.run_deadline.as_millis()),
                )
            } else {
                ErrorDescriptor::new(ErrorKind::Internal, "source task aborted")
            };
            counter!("ingest_source_errors_total", "source" => src.as_str()).increment(1);
            self.record(batch_id, src, SourceResult::failed(true, err))?;
        }

        let report = self.tracker.finalize(batch_id).await?;

        counter!("ingest_batches_total").increment(1);
        gauge!("ingest_pipeline_last_run_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            target: "ingest",
            batch_id,
            attempted = report.attempted_sources(),
            succeeded = report.successful_sources(),
            inserted = report.total_inserted(),
            success_rate = report.overall_success_rate(),
            "ingestion run finished"
        );

        if report.successful_sources() == 0 {
            return Err(IngestError::AllSourcesFailed {
                batch_id: batch_id.to_string(),
            });
        }
        Ok(report)
    }

    fn record(&self, batch_id: &str, src: SourceType, res: SourceResult) -> IngestResult<()> {
        match self.tracker.record_source_result(batch_id, src, res) {
            Ok(()) => Ok(()),
            Err(e @ TrackerError::DuplicateSourceResult { .. }) => {
                tracing::error!(target: "ingest", critical = true, batch_id, source = %src, error = %e, "double-reported source result");
                debug_assert!(false, "{e}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn process_source(
        &self,
        batch_id: &str,
        src: SourceType,
        collector: Arc<dyn Collector>,
    ) -> SourceResult {
        let t0 = Instant::now();
        let mut result = self.run_source(batch_id, src, collector).await;
        result.duration_ms = t0.elapsed().as_millis() as u64;

        histogram!("ingest_source_duration_ms", "source" => src.as_str())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        if let Some(err) = &result.error {
            counter!("ingest_source_errors_total", "source" => src.as_str()).increment(1);
            tracing::warn!(target: "ingest", batch_id, source = %src, kind = ?err.kind, error = %err.message, "source failed");
        } else {
            tracing::debug!(
                target: "ingest",
                batch_id,
                source = %src,
                collected = result.record_count,
                inserted = result.inserted_count,
                duplicates = result.duplicate_count,
                rejected = result.rejected_count,
                "source done"
            );
        }
        result
    }

    async fn run_source(
        &self,
        batch_id: &str,
        src: SourceType,
        collector: Arc<dyn Collector>,
    ) -> SourceResult {
        let raws = match self.collect(collector.as_ref()).await {
            Ok(v) => v,
            Err(e) => return SourceResult::failed(true, (&e).into()),
        };
        let mut result = SourceResult {
            attempted: true,
            record_count: raws.len() as u64,
            ..SourceResult::default()
        };
        counter!("ingest_records_collected_total", "source" => src.as_str())
            .increment(result.record_count);
        if raws.is_empty() {
            return result;
        }

        let (records, rejects) = {
            let _permit = self.pools.cpu_permit().await;
            match tokio::task::spawn_blocking(move || normalize_all(src, &raws)).await {
                Ok(v) => v,
                Err(e) => {
                    result.error = Some(ErrorDescriptor::new(
                        ErrorKind::Internal,
                        format!("normalizer task failed: {e}"),
                    ));
                    return result;
                }
            }
        };
        result.rejected_count = rejects.len() as u64;
        if !rejects.is_empty() {
            counter!("ingest_normalization_failures_total", "source" => src.as_str())
                .increment(result.rejected_count);
            for e in &rejects {
                tracing::debug!(target: "ingest", batch_id, source = %src, error = %e, "record rejected");
            }
        }

        let fps = fingerprints_of(&records);
        let recent = if fps.is_empty() {
            HashSet::new()
        } else {
            match self.stored_fingerprints(src, &fps).await {
                Ok(s) => s,
                Err(e) => {
                    result.error = Some((&e).into());
                    return result;
                }
            }
        };

        let outcome = filter_new(records, &recent);
        let pre_filtered = outcome.duplicates.len() as u64;
        let to_insert = outcome.new.len() as u64;

        let now = Utc::now();
        let docs = match outcome
            .new
            .into_iter()
            .map(|r| r.accepted(batch_id, now).to_document())
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(d) => d,
            Err(e) => {
                result.error = Some(ErrorDescriptor::new(ErrorKind::Internal, e.to_string()));
                return result;
            }
        };

        let inserted = if docs.is_empty() {
            0
        } else {
            match self.store.insert_many(src.collection(), docs).await {
                Ok(r) => r.inserted_count,
                Err(e) => {
                    result.duplicate_count = pre_filtered;
                    result.error = Some((&e).into());
                    return result;
                }
            }
        };

        result.inserted_count = inserted;
        result.duplicate_count = pre_filtered + to_insert.saturating_sub(inserted);
        counter!("ingest_records_inserted_total", "source" => src.as_str()).increment(inserted);
        counter!("ingest_duplicates_total", "source" => src.as_str())
            .increment(result.duplicate_count);
        result
    }

    async fn collect(&self, collector: &dyn Collector) -> Result<Vec<RawRecord>, CollectionError> {
        let limit = self.cfg.collector_timeout;
        match tokio::time::timeout(limit, collector.collect()).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(CollectionError::Failed(format!("{e:#}"))),
            Err(_) => Err(CollectionError::TimedOut {
                after_ms: limit.as_millis() as u64,
            }),
        }
    }

    /// Which of `fps` are already stored for `src` (within the lookback window).
    async fn stored_fingerprints(
        &self,
        src: SourceType,
        fps: &[Fingerprint],
    ) -> Result<HashSet<Fingerprint>, StoreError> {
        let mut filter = Filter::is_in(FINGERPRINT_FIELD, fps.iter().map(|f| f.as_str().to_string()));
        if let Some(window) = self.cfg.dedup_lookback {
            let since = chrono::Duration::from_std(window)
                .ok()
                .and_then(|w| Utc::now().checked_sub_signed(w));
            if let Some(since) = since {
                filter = Filter::And(vec![filter, Filter::gte("ingested_at", since.to_rfc3339())]);
            }
        }
        let docs = self.store.find(src.collection(), &filter, None, None).await?;
        Ok(docs
            .iter()
            .filter_map(|d| d.get(FINGERPRINT_FIELD).and_then(|v| v.as_str()))
            .map(Fingerprint::from_hex)
            .collect())
    }
}
