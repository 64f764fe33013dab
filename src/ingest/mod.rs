// src/ingest/mod.rs
pub mod batch;
pub mod clean;
pub mod collector;
pub mod dedup;
pub mod normalize;
pub mod orchestrator;
pub mod pool;
pub mod providers;
pub mod retention;
pub mod scheduler;
pub mod store;
pub mod types;

pub use batch::{BatchReport, BatchTracker, ErrorDescriptor, ErrorKind, SourceResult};
pub use collector::{Collector, CollectorRegistry, FixtureCollector};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use store::{IngestionStore, MemoryStore};
pub use types::{IngestRecord, RawRecord, SourceType};

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_records_collected_total",
            "Raw records returned by collectors."
        );
        describe_counter!(
            "ingest_records_inserted_total",
            "Records accepted into the store."
        );
        describe_counter!(
            "ingest_duplicates_total",
            "Records dropped as duplicates (in-batch, already stored, or absorbed by the store)."
        );
        describe_counter!(
            "ingest_normalization_failures_total",
            "Raw records rejected by the normalizer."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Sources that failed or timed out in a run."
        );
        describe_histogram!(
            "ingest_source_duration_ms",
            "Per-source processing time in milliseconds."
        );
        describe_histogram!("ingest_rss_parse_ms", "RSS parse time in milliseconds.");
        describe_counter!("ingest_batches_total", "Finalized ingestion batches.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when an ingestion run last finished."
        );
        describe_counter!("scheduler_job_runs_total", "Scheduled job invocations.");
        describe_counter!(
            "scheduler_job_skipped_total",
            "Firings skipped because the previous run was still in flight."
        );
        describe_counter!("scheduler_job_failures_total", "Scheduled job failures.");
        describe_counter!(
            "retention_deleted_total",
            "Documents deleted by retention cleanup."
        );
    });
}
