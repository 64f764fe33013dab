// src/ingest/collector.rs
//! Collector seam: one adapter per source type, treated as an unreliable
//! black box by the orchestrator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::ingest::types::{RawRecord, SourceType};

#[async_trait]
pub trait Collector: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Human-readable adapter name for logs.
    fn name(&self) -> &str;

    /// Fetch the latest raw records. `Ok(vec![])` means "no data", not failure.
    async fn collect(&self) -> Result<Vec<RawRecord>>;
}

/// Collectors keyed by source type; at most one per source.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    inner: HashMap<SourceType, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `c`, replacing any collector already registered for its source.
    pub fn register(&mut self, c: Arc<dyn Collector>) -> Option<Arc<dyn Collector>> {
        self.inner.insert(c.source_type(), c)
    }

    pub fn with(mut self, c: impl Collector + 'static) -> Self {
        self.register(Arc::new(c));
        self
    }

    pub fn get(&self, source: SourceType) -> Option<Arc<dyn Collector>> {
        self.inner.get(&source).cloned()
    }

    pub fn sources(&self) -> Vec<SourceType> {
        let mut v: Vec<_> = self.inner.keys().copied().collect();
        v.sort();
        v
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.inner.iter().map(|(k, v)| (k, v.name())))
            .finish()
    }
}

enum Body {
    Inline(String),
    File(PathBuf),
}

/// Serves a JSON array of `RawRecord`s, from memory or from a file read on
/// every collection.
pub struct FixtureCollector {
    source: SourceType,
    name: String,
    body: Body,
}

impl FixtureCollector {
    pub fn from_json_str(source: SourceType, json: &str) -> Self {
        Self {
            source,
            name: format!("fixture:{source}"),
            body: Body::Inline(json.to_string()),
        }
    }

    pub fn from_path(source: SourceType, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            source,
            name: format!("fixture:{}", path.display()),
            body: Body::File(path),
        }
    }

    fn parse(s: &str) -> Result<Vec<RawRecord>> {
        serde_json::from_str(s).context("parsing raw record fixture")
    }
}

#[async_trait]
impl Collector for FixtureCollector {
    fn source_type(&self) -> SourceType {
        self.source
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<Vec<RawRecord>> {
        match &self.body {
            Body::Inline(s) => Self::parse(s),
            Body::File(p) => {
                let s = tokio::fs::read_to_string(p)
                    .await
                    .with_context(|| format!("reading fixture {}", p.display()))?;
                Self::parse(&s)
            }
        }
    }
}
