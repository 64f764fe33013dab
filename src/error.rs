// src/error.rs
//! Error taxonomy. Source- and record-level failures end up as data in the
//! batch report; only tracker/store infrastructure failures escape
//! `Orchestrator::run_ingestion`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::ingest::types::SourceType;

/// A single raw record could not be mapped onto the common envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("{source_type} record is missing required field `{field}`")]
    MissingField {
        source_type: SourceType,
        field: &'static str,
    },
    #[error("{source_type} record has no usable timestamp in `{field}`")]
    MissingTimestamp {
        source_type: SourceType,
        field: &'static str,
    },
    #[error("collector for {expected} produced a {found} record")]
    SourceMismatch {
        expected: SourceType,
        found: SourceType,
    },
    #[error("payload could not be serialized: {0}")]
    Payload(String),
}

/// A collector failed, panicked or ran out of time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    #[error("collector failed: {0}")]
    Failed(String),
    #[error("collector timed out after {after_ms} ms")]
    TimedOut { after_ms: u64 },
    #[error("collector panicked")]
    Panicked,
    #[error("no collector registered for {0}")]
    NotRegistered(SourceType),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("document serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("result for {source_type} already recorded in batch {batch_id}")]
    DuplicateSourceResult {
        batch_id: String,
        source_type: SourceType,
    },
    #[error("unknown batch {0}")]
    UnknownBatch(String),
    #[error("batch {0} is already finalized")]
    BatchFinalized(String),
    #[error("batch tracker store failure: {0}")]
    Store(#[from] StoreError),
}

/// Infrastructure-level failure of a whole ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("every attempted source failed in batch {batch_id}")]
    AllSourcesFailed { batch_id: String },
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// JSON error body for the HTTP surface.
#[derive(Debug, Serialize)]
struct ApiErrorBody {
    code: String,
    message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST",
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: msg.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "STORE_UNAVAILABLE",
            message: msg.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::unavailable(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = axum::Json(ApiErrorBody {
            code: self.code.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}
