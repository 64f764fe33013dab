// src/api.rs
//! HTTP surface: trigger, status, cleanup, stats and job listing.
//!
//! The trigger never reports ingestion failures; it answers 202 with a batch
//! id and the outcome is read back through the status route. Only malformed
//! requests are rejected.

use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::app::AppHandle;
use crate::error::ApiError;
use crate::ingest::batch::{BatchReport, BATCH_COLLECTION};
use crate::ingest::orchestrator::resolve_sources;
use crate::ingest::retention::{self, RetentionReport};
use crate::ingest::scheduler::ScheduledJob;
use crate::ingest::store::Filter;
use crate::ingest::types::SourceType;

pub fn router(app: AppHandle) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/ingest/run", post(trigger_run))
        .route("/api/ingest/status/{batch_id}", get(batch_status))
        .route("/api/ingest/cleanup", post(run_cleanup))
        .route("/api/ingest/stats", get(ingest_stats))
        .route("/api/scheduler/jobs", get(list_jobs))
        .layer(CorsLayer::very_permissive())
        .with_state(app)
}

/// Parse an optional JSON body; an empty body yields `T::default()`.
fn optional_json<T: for<'de> Deserialize<'de> + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid body: {e}")))
}

#[derive(Debug, Default, Deserialize)]
struct RunReq {
    /// Source names; empty or absent means every source.
    #[serde(default)]
    sources: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RunResp {
    status: &'static str,
    batch_id: String,
    sources: Vec<SourceType>,
}

async fn trigger_run(
    State(app): State<AppHandle>,
    body: Bytes,
) -> Result<(StatusCode, Json<RunResp>), ApiError> {
    let req: RunReq = optional_json(&body)?;

    let mut requested = Vec::with_capacity(req.sources.len());
    for name in &req.sources {
        let s = name
            .parse::<SourceType>()
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        requested.push(s);
    }
    let sources = resolve_sources(&requested);

    let (batch_id, _handle) = app.orchestrator().spawn(sources.clone());
    tracing::info!(target: "api", batch_id = %batch_id, sources = ?sources, "ingestion triggered");

    Ok((
        StatusCode::ACCEPTED,
        Json(RunResp {
            status: "accepted",
            batch_id,
            sources,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct BatchStatus {
    /// `running` until finalized, then `completed` or `failed`.
    status: &'static str,
    overall_success_rate: f64,
    #[serde(flatten)]
    report: BatchReport,
}

impl From<BatchReport> for BatchStatus {
    fn from(report: BatchReport) -> Self {
        let status = if !report.finalized {
            "running"
        } else if report.successful_sources() == 0 {
            "failed"
        } else {
            "completed"
        };
        Self {
            status,
            overall_success_rate: report.overall_success_rate(),
            report,
        }
    }
}

async fn batch_status(
    State(app): State<AppHandle>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchStatus>, ApiError> {
    let tracker = app.orchestrator().tracker();
    let found = if batch_id == "latest" {
        tracker.latest().await?
    } else {
        tracker.get(&batch_id).await?
    };
    match found {
        Some(r) => Ok(Json(r.into())),
        None => Err(ApiError::not_found(format!("batch {batch_id} not found"))),
    }
}

#[derive(Debug, Default, Deserialize)]
struct CleanupReq {
    #[serde(default)]
    days_to_keep: BTreeMap<SourceType, u32>,
}

async fn run_cleanup(
    State(app): State<AppHandle>,
    body: Bytes,
) -> Result<Json<RetentionReport>, ApiError> {
    let req: CleanupReq = optional_json(&body)?;
    let policy = app.retention_policy().with_overrides(&req.days_to_keep);
    tracing::info!(target: "api", policy = ?policy, "cleanup requested");
    let report = retention::cleanup(app.store().as_ref(), &policy, chrono::Utc::now()).await;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
struct StatsResp {
    collections: BTreeMap<SourceType, u64>,
    total_records: u64,
    batches: u64,
    scheduled_jobs: usize,
}

async fn ingest_stats(State(app): State<AppHandle>) -> Result<Json<StatsResp>, ApiError> {
    let store = app.store();
    let mut collections = BTreeMap::new();
    for s in SourceType::ALL {
        let n = store.count_documents(s.collection(), &Filter::All).await?;
        collections.insert(s, n);
    }
    let batches = store.count_documents(BATCH_COLLECTION, &Filter::All).await?;
    Ok(Json(StatsResp {
        total_records: collections.values().sum(),
        collections,
        batches,
        scheduled_jobs: app.scheduler().jobs().len(),
    }))
}

async fn list_jobs(State(app): State<AppHandle>) -> Json<Vec<ScheduledJob>> {
    Json(app.scheduler().jobs())
}
