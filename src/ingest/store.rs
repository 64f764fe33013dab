// src/ingest/store.rs
//! Persistence boundary: a document-store shaped trait plus an in-memory
//! implementation with unique indexes.
//!
//! Writes are append-only inserts; `insert_many` silently skips documents that
//! violate a unique index instead of failing the whole call.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::StoreError;

pub type Document = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InsertResult {
    pub inserted_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Query filter over top-level document fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    Lt(String, Value),
    Gte(String, Value),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, v: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), v.into())
    }

    pub fn lt(field: &str, v: impl Into<Value>) -> Self {
        Filter::Lt(field.to_string(), v.into())
    }

    pub fn gte(field: &str, v: impl Into<Value>) -> Self {
        Filter::Gte(field.to_string(), v.into())
    }

    pub fn is_in<V: Into<Value>>(field: &str, vs: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.to_string(), vs.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(f, v) => doc.get(f).is_some_and(|d| compare(d, v) == Some(Ordering::Equal)),
            Filter::In(f, vs) => doc
                .get(f)
                .is_some_and(|d| vs.iter().any(|v| compare(d, v) == Some(Ordering::Equal))),
            Filter::Lt(f, v) => doc.get(f).is_some_and(|d| compare(d, v) == Some(Ordering::Less)),
            Filter::Gte(f, v) => doc
                .get(f)
                .is_some_and(|d| matches!(compare(d, v), Some(Ordering::Greater | Ordering::Equal))),
            Filter::And(fs) => fs.iter().all(|f| f.matches(doc)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: false,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: true,
        }
    }
}

fn as_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Order two JSON values. Numbers compare numerically; strings that are both
/// RFC 3339 timestamps compare chronologically, other strings lexically.
/// Mixed kinds are incomparable.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (as_datetime(x), as_datetime(y)) {
            (Some(dx), Some(dy)) => Some(dx.cmp(&dy)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[async_trait]
pub trait IngestionStore: Send + Sync {
    /// Insert documents, skipping duplicate-key violations.
    async fn insert_many(&self, collection: &str, docs: Vec<Document>)
        -> Result<InsertResult, StoreError>;

    async fn count_documents(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn delete_many(&self, collection: &str, filter: &Filter)
        -> Result<DeleteResult, StoreError>;
}

#[derive(Debug, Default)]
struct Collection {
    docs: Vec<Document>,
    /// field -> rendered values already present
    unique: HashMap<String, HashSet<String>>,
}

impl Collection {
    fn key_of(doc: &Document, field: &str) -> Option<String> {
        doc.get(field).filter(|v| !v.is_null()).map(|v| v.to_string())
    }

    fn rebuild_indexes(&mut self) {
        for (field, keys) in self.unique.iter_mut() {
            keys.clear();
            for d in &self.docs {
                if let Some(k) = Self::key_of(d, field) {
                    keys.insert(k);
                }
            }
        }
    }
}

/// In-process document store. Unique indexes are declared per collection and
/// enforced on insert.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a unique index; existing documents are indexed immediately.
    pub fn with_unique_index(self, collection: &str, field: &str) -> Self {
        {
            let mut cols = self.collections.write();
            let col = cols.entry(collection.to_string()).or_default();
            col.unique.entry(field.to_string()).or_default();
            col.rebuild_indexes();
        }
        self
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.docs.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl IngestionStore for MemoryStore {
    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<InsertResult, StoreError> {
        let mut cols = self.collections.write();
        let col = cols.entry(collection.to_string()).or_default();
        let mut inserted = 0u64;

        'docs: for doc in docs {
            let mut keys = Vec::with_capacity(col.unique.len());
            for (field, present) in &col.unique {
                if let Some(k) = Collection::key_of(&doc, field) {
                    if present.contains(&k) {
                        continue 'docs;
                    }
                    keys.push((field.clone(), k));
                }
            }
            for (field, k) in keys {
                if let Some(set) = col.unique.get_mut(&field) {
                    set.insert(k);
                }
            }
            col.docs.push(doc);
            inserted += 1;
        }

        Ok(InsertResult {
            inserted_count: inserted,
        })
    }

    async fn count_documents(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let cols = self.collections.read();
        Ok(cols
            .get(collection)
            .map(|c| c.docs.iter().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut out: Vec<Document> = {
            let cols = self.collections.read();
            match cols.get(collection) {
                Some(c) => c.docs.iter().filter(|d| filter.matches(d)).cloned().collect(),
                None => Vec::new(),
            }
        };
        if let Some(s) = sort {
            out.sort_by(|a, b| {
                let ord = match (a.get(&s.field), b.get(&s.field)) {
                    (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                };
                if s.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        if let Some(n) = limit {
            out.truncate(n);
        }
        Ok(out)
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<DeleteResult, StoreError> {
        let mut cols = self.collections.write();
        let Some(col) = cols.get_mut(collection) else {
            return Ok(DeleteResult::default());
        };
        let before = col.docs.len();
        col.docs.retain(|d| !filter.matches(d));
        let deleted = (before - col.docs.len()) as u64;
        if deleted > 0 {
            col.rebuild_indexes();
        }
        Ok(DeleteResult {
            deleted_count: deleted,
        })
    }
}
