// src/ingest/batch.rs
//! Batch Tracker: one `BatchReport` per ingestion run.
//!
//! Ids are minted locally (time prefix + random suffix) so no store round-trip
//! happens before work begins. Per-source results are append-only. A finalized
//! report is persisted to [`BATCH_COLLECTION`] and kept in a bounded in-memory
//! history for status queries.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{CollectionError, StoreError, TrackerError};
use crate::ingest::store::{Filter, IngestionStore, Sort};
use crate::ingest::types::SourceType;

pub const BATCH_COLLECTION: &str = "ingest_batches";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Collection,
    Timeout,
    Store,
    Internal,
}

/// Serializable description of a source-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDescriptor {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&CollectionError> for ErrorDescriptor {
    fn from(err: &CollectionError) -> Self {
        let kind = match err {
            CollectionError::TimedOut { .. } => ErrorKind::Timeout,
            CollectionError::Panicked => ErrorKind::Internal,
            CollectionError::Failed(_) | CollectionError::NotRegistered(_) => ErrorKind::Collection,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<&StoreError> for ErrorDescriptor {
    fn from(err: &StoreError) -> Self {
        Self::new(ErrorKind::Store, err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub attempted: bool,
    /// Raw records returned by the collector.
    pub record_count: u64,
    pub inserted_count: u64,
    pub duplicate_count: u64,
    /// Records dropped by the normalizer.
    #[serde(default)]
    pub rejected_count: u64,
    pub error: Option<ErrorDescriptor>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl SourceResult {
    pub fn failed(attempted: bool, error: ErrorDescriptor) -> Self {
        Self {
            attempted,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.attempted && self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub per_source_result: BTreeMap<SourceType, SourceResult>,
    #[serde(default)]
    pub finalized: bool,
}

impl BatchReport {
    fn open(batch_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            batch_id,
            started_at,
            finished_at: None,
            per_source_result: BTreeMap::new(),
            finalized: false,
        }
    }

    pub fn attempted_sources(&self) -> usize {
        self.per_source_result.values().filter(|r| r.attempted).count()
    }

    pub fn successful_sources(&self) -> usize {
        self.per_source_result.values().filter(|r| r.succeeded()).count()
    }

    /// `successful / attempted`; 0.0 when nothing was attempted.
    pub fn overall_success_rate(&self) -> f64 {
        match self.attempted_sources() {
            0 => 0.0,
            n => self.successful_sources() as f64 / n as f64,
        }
    }

    pub fn total_inserted(&self) -> u64 {
        self.per_source_result.values().map(|r| r.inserted_count).sum()
    }
}

/// `batch_<YYYYMMDDTHHMMSS.mmm>Z_<16 hex>`, lexicographically ordered by start time.
pub fn new_batch_id(at: DateTime<Utc>) -> String {
    format!(
        "batch_{}_{:016x}",
        at.format("%Y%m%dT%H%M%S%.3fZ"),
        rand::random::<u64>()
    )
}

pub struct BatchTracker {
    store: Arc<dyn IngestionStore>,
    open: Mutex<HashMap<String, BatchReport>>,
    /// Finalized but not yet persisted. Lock order: `open` before `sealed`.
    sealed: Mutex<HashMap<String, Sealed>>,
    history: Mutex<VecDeque<BatchReport>>,
    cap: usize,
}

struct Sealed {
    report: BatchReport,
    /// A finalize is writing this report right now.
    writing: bool,
}

enum Claim {
    Write(BatchReport),
    InFlight(BatchReport),
    Missing,
}

impl BatchTracker {
    pub fn new(store: Arc<dyn IngestionStore>, history_cap: usize) -> Self {
        let cap = history_cap.clamp(1, 10_000);
        Self {
            store,
            open: Mutex::new(HashMap::new()),
            sealed: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    /// Open a new batch. No I/O; safe to call concurrently.
    pub fn start_batch(&self) -> String {
        let now = Utc::now();
        let mut open = self.open.lock();
        loop {
            let id = new_batch_id(now);
            if !open.contains_key(&id) {
                open.insert(id.clone(), BatchReport::open(id.clone(), now));
                return id;
            }
        }
    }

    pub fn record_source_result(
        &self,
        batch_id: &str,
        source_type: SourceType,
        result: SourceResult,
    ) -> Result<(), TrackerError> {
        {
            let mut open = self.open.lock();
            if let Some(report) = open.get_mut(batch_id) {
                if report.per_source_result.contains_key(&source_type) {
                    return Err(TrackerError::DuplicateSourceResult {
                        batch_id: batch_id.to_string(),
                        source_type,
                    });
                }
                report.per_source_result.insert(source_type, result);
                return Ok(());
            }
        }
        // `finalize` moves a batch open -> sealed -> history and it is always
        // in one of them, so check in that order.
        let sealed = self.sealed.lock().contains_key(batch_id);
        Err(if sealed || self.in_history(batch_id).is_some() {
            TrackerError::BatchFinalized(batch_id.to_string())
        } else {
            TrackerError::UnknownBatch(batch_id.to_string())
        })
    }

    /// Seal and persist the batch. Finalizing again returns the stored report.
    ///
    /// The batch stops accepting results as soon as this is called. If the
    /// write fails the sealed report is kept and a later `finalize` (or
    /// [`BatchTracker::flush_unpersisted`]) writes it.
    pub async fn finalize(&self, batch_id: &str) -> Result<BatchReport, TrackerError> {
        if let Some(done) = self.in_history(batch_id) {
            return Ok(done);
        }

        let claim = {
            let mut open = self.open.lock();
            let mut sealed = self.sealed.lock();
            if let Some(mut report) = open.remove(batch_id) {
                report.finished_at = Some(Utc::now());
                report.finalized = true;
                sealed.insert(
                    batch_id.to_string(),
                    Sealed {
                        report: report.clone(),
                        writing: true,
                    },
                );
                Claim::Write(report)
            } else if let Some(s) = sealed.get_mut(batch_id) {
                if s.writing {
                    Claim::InFlight(s.report.clone())
                } else {
                    s.writing = true;
                    Claim::Write(s.report.clone())
                }
            } else {
                Claim::Missing
            }
        };

        let report = match claim {
            Claim::Write(r) => r,
            Claim::InFlight(r) => return Ok(r),
            Claim::Missing => {
                // Evicted from history, or finished between the checks above.
                if let Some(done) = self.in_history(batch_id) {
                    return Ok(done);
                }
                return match self.get(batch_id).await? {
                    Some(r) if r.finalized => Ok(r),
                    _ => Err(TrackerError::UnknownBatch(batch_id.to_string())),
                };
            }
        };

        if let Err(e) = self.persist(&report).await {
            if let Some(s) = self.sealed.lock().get_mut(batch_id) {
                s.writing = false;
            }
            tracing::warn!(target: "ingest", batch_id, error = %e, "batch report not persisted; will retry");
            return Err(e);
        }

        {
            let mut hist = self.history.lock();
            hist.push_back(report.clone());
            while hist.len() > self.cap {
                hist.pop_front();
            }
        }
        self.sealed.lock().remove(batch_id);
        Ok(report)
    }

    async fn persist(&self, report: &BatchReport) -> Result<(), TrackerError> {
        let doc = match serde_json::to_value(report).map_err(StoreError::from)? {
            serde_json::Value::Object(map) => map,
            _ => return Err(StoreError::Serialization("batch report is not an object".into()).into()),
        };
        self.store.insert_many(BATCH_COLLECTION, vec![doc]).await?;
        Ok(())
    }

    /// Ids of sealed batches whose earlier write failed, oldest first.
    pub fn unpersisted(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sealed
            .lock()
            .iter()
            .filter(|(_, s)| !s.writing)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Write every sealed report left behind by a failed finalize. Stops at
    /// the first store error. Returns how many were written.
    pub async fn flush_unpersisted(&self) -> usize {
        let mut written = 0;
        for id in self.unpersisted() {
            match self.finalize(&id).await {
                Ok(_) => written += 1,
                Err(e) => {
                    tracing::warn!(target: "ingest", batch_id = %id, error = %e, "retrying batch report failed");
                    break;
                }
            }
        }
        if written > 0 {
            tracing::info!(target: "ingest", written, "persisted leftover batch reports");
        }
        written
    }

    /// Report for `batch_id`: finalized history, then open and sealed batches,
    /// then the store.
    pub async fn get(&self, batch_id: &str) -> Result<Option<BatchReport>, StoreError> {
        if let Some(r) = self.in_history(batch_id) {
            return Ok(Some(r));
        }
        let pending = {
            let open = self.open.lock();
            let sealed = self.sealed.lock();
            open.get(batch_id)
                .or_else(|| sealed.get(batch_id).map(|s| &s.report))
                .cloned()
        };
        if pending.is_some() {
            return Ok(pending);
        }
        let docs = self
            .store
            .find(BATCH_COLLECTION, &Filter::eq("batch_id", batch_id), None, Some(1))
            .await?;
        docs.into_iter().next().map(from_document).transpose()
    }

    /// Most recently started batch, open or finalized.
    pub async fn latest(&self) -> Result<Option<BatchReport>, StoreError> {
        let mut best: Option<BatchReport> = {
            let hist = self.history.lock();
            let open = self.open.lock();
            let sealed = self.sealed.lock();
            hist.iter()
                .chain(open.values())
                .chain(sealed.values().map(|s| &s.report))
                .max_by(|a, b| a.batch_id.cmp(&b.batch_id))
                .cloned()
        };

        let stored = self
            .store
            .find(BATCH_COLLECTION, &Filter::All, Some(&Sort::desc("batch_id")), Some(1))
            .await?;
        if let Some(doc) = stored.into_iter().next() {
            let r = from_document(doc)?;
            if best.as_ref().map_or(true, |b| r.batch_id > b.batch_id) {
                best = Some(r);
            }
        }
        Ok(best)
    }

    /// Batches not yet persisted: open ones plus sealed ones awaiting a write.
    pub fn open_batches(&self) -> usize {
        let open = self.open.lock();
        open.len() + self.sealed.lock().len()
    }

    fn in_history(&self, batch_id: &str) -> Option<BatchReport> {
        self.history
            .lock()
            .iter()
            .rev()
            .find(|r| r.batch_id == batch_id)
            .cloned()
    }
}

fn from_document(doc: crate::ingest::store::Document) -> Result<BatchReport, StoreError> {
    Ok(serde_json::from_value(serde_json::Value::Object(doc))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::store::MemoryStore;
    use chrono::TimeZone;

    fn tracker() -> BatchTracker {
        BatchTracker::new(Arc::new(MemoryStore::new()), 16)
    }

    #[test]
    fn ids_sort_by_start_time() {
        let a = new_batch_id(Utc.with_ymd_and_hms(2024, 5, 1, 9, 59, 59).unwrap());
        let b = new_batch_id(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        assert!(a.starts_with("batch_20240501T095959.000Z_"));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn success_rate_ignores_unattempted_sources() {
        let mut r = BatchReport::open("b".into(), Utc::now());
        r.per_source_result.insert(
            SourceType::News,
            SourceResult {
                attempted: true,
                ..Default::default()
            },
        );
        r.per_source_result.insert(
            SourceType::Weather,
            SourceResult::failed(true, ErrorDescriptor::new(ErrorKind::Collection, "boom")),
        );
        r.per_source_result.insert(
            SourceType::Tax,
            SourceResult::failed(false, ErrorDescriptor::new(ErrorKind::Collection, "none")),
        );
        assert_eq!(r.overall_success_rate(), 0.5);
    }

    #[tokio::test]
    async fn finalize_is_idempotent_and_persists_once() {
        let store = Arc::new(MemoryStore::new());
        let t = BatchTracker::new(store.clone(), 4);
        let id = t.start_batch();
        t.record_source_result(&id, SourceType::News, SourceResult::default())
            .unwrap();

        let first = t.finalize(&id).await.unwrap();
        let second = t.finalize(&id).await.unwrap();
        assert_eq!(first, second);
        assert!(first.finalized);
        assert_eq!(store.len(BATCH_COLLECTION), 1);

        let err = t
            .record_source_result(&id, SourceType::Tax, SourceResult::default())
            .unwrap_err();
        assert_eq!(err, TrackerError::BatchFinalized(id.clone()));
    }

    #[tokio::test]
    async fn unknown_batch_is_rejected() {
        let t = tracker();
        assert!(matches!(
            t.record_source_result("nope", SourceType::News, SourceResult::default()),
            Err(TrackerError::UnknownBatch(_))
        ));
        assert!(matches!(t.finalize("nope").await, Err(TrackerError::UnknownBatch(_))));
    }

    #[tokio::test]
    async fn get_falls_back_to_store_after_history_eviction() {
        let t = BatchTracker::new(Arc::new(MemoryStore::new()), 1);
        let a = t.start_batch();
        t.finalize(&a).await.unwrap();
        let b = t.start_batch();
        t.finalize(&b).await.unwrap();

        let found = t.get(&a).await.unwrap().expect("stored");
        assert_eq!(found.batch_id, a);
        assert!(found.finalized);
    }
}
