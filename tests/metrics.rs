// tests/metrics.rs
//
// One test per process: the Prometheus recorder is global and can only be
// installed once.

use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use situational_ingest::app;
use situational_ingest::ingest::collector::{CollectorRegistry, FixtureCollector};
use situational_ingest::ingest::store::MemoryStore;
use situational_ingest::ingest::types::SourceType;
use situational_ingest::metrics::Metrics;
use situational_ingest::PipelineConfig;

const NEWS: &str = r#"[
  {"kind":"news","title":"Curfew lifted in Kandy","url":"https://news.lk/curfew","published_at":"2024-05-02T09:00:00Z"},
  {"kind":"news","title":"Curfew lifted in Kandy","url":"https://news.lk/curfew","published_at":"2024-05-02T09:00:00Z"}
]"#;

#[tokio::test]
async fn metrics_endpoint_contains_pipeline_series() {
    let metrics = Metrics::init().expect("install recorder");

    let mut cfg = PipelineConfig::default();
    cfg.schedule.news = 0;
    let collectors = CollectorRegistry::new()
        .with(FixtureCollector::from_json_str(SourceType::News, NEWS))
        .with(FixtureCollector::from_json_str(SourceType::Weather, "{broken"));
    let handle = app::init(&cfg, Arc::new(MemoryStore::new()), collectors);

    handle
        .orchestrator()
        .run_ingestion(&[SourceType::News, SourceType::Weather])
        .await
        .expect("news succeeds");

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "ingest_batches_total",
        "ingest_pipeline_last_run_ts",
        "ingest_records_collected_total{source=\"news\"} 2",
        "ingest_records_inserted_total{source=\"news\"} 1",
        "ingest_duplicates_total{source=\"news\"} 1",
        "ingest_source_errors_total{source=\"weather\"} 1",
        "ingest_source_duration_ms",
    ] {
        assert!(text.contains(needle), "missing {needle:?} in:\n{text}");
    }
}
