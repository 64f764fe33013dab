// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::app::{init, AppHandle};
pub use crate::config::PipelineConfig;
pub use crate::error::{IngestError, IngestResult};
