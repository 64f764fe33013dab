// src/ingest/retention.rs
//! Retention cleanup: drop records older than a per-source number of days,
//! and batch reports older than their own cutoff.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::ingest::batch::BATCH_COLLECTION;
use crate::ingest::store::{Filter, IngestionStore};
use crate::ingest::types::SourceType;

/// Days to keep, per source plus the batch catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub news: u32,
    pub weather: u32,
    pub youtube: u32,
    pub trends: u32,
    pub pricing: u32,
    pub tax: u32,
    pub batches: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            news: 30,
            weather: 30,
            youtube: 30,
            trends: 30,
            // slow-moving series are kept longer
            pricing: 60,
            tax: 180,
            batches: 90,
        }
    }
}

impl RetentionPolicy {
    pub fn days_for(&self, source: SourceType) -> u32 {
        match source {
            SourceType::News => self.news,
            SourceType::Weather => self.weather,
            SourceType::Youtube => self.youtube,
            SourceType::Trends => self.trends,
            SourceType::Pricing => self.pricing,
            SourceType::Tax => self.tax,
        }
    }

    pub fn set_days(&mut self, source: SourceType, days: u32) {
        let slot = match source {
            SourceType::News => &mut self.news,
            SourceType::Weather => &mut self.weather,
            SourceType::Youtube => &mut self.youtube,
            SourceType::Trends => &mut self.trends,
            SourceType::Pricing => &mut self.pricing,
            SourceType::Tax => &mut self.tax,
        };
        *slot = days;
    }

    /// Copy of `self` with per-source overrides applied.
    pub fn with_overrides<'a>(&self, overrides: impl IntoIterator<Item = (&'a SourceType, &'a u32)>) -> Self {
        let mut p = self.clone();
        for (s, d) in overrides {
            p.set_days(*s, *d);
        }
        p
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetentionReport {
    /// Deleted documents per collection.
    pub deleted_counts: BTreeMap<String, u64>,
    pub total_deleted: u64,
    /// Collections whose cleanup failed, with the store error.
    pub errors: BTreeMap<String, String>,
}

/// Oldest timestamp to keep, or `None` when the window reaches back before
/// year 1 and nothing stored can be that old.
fn cutoff(now: DateTime<Utc>, days: u32) -> Option<String> {
    Duration::try_days(i64::from(days))
        .and_then(|d| now.checked_sub_signed(d))
        .filter(|t| t.year() >= 1)
        .map(|t| t.to_rfc3339())
}

/// Delete expired data. A failure on one collection is reported and the rest
/// still run.
pub async fn cleanup(
    store: &dyn IngestionStore,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> RetentionReport {
    let mut report = RetentionReport::default();

    let targets = SourceType::ALL
        .iter()
        .map(|s| (s.collection(), "observed_at", policy.days_for(*s)))
        .chain(std::iter::once((BATCH_COLLECTION, "started_at", policy.batches)));

    for (collection, field, days) in targets {
        let Some(before) = cutoff(now, days) else {
            tracing::debug!(target: "retention", collection, days, "window predates the calendar; nothing to delete");
            report.deleted_counts.insert(collection.to_string(), 0);
            continue;
        };
        let filter = Filter::lt(field, before);
        match store.delete_many(collection, &filter).await {
            Ok(r) => {
                if r.deleted_count > 0 {
                    counter!("retention_deleted_total", "collection" => collection)
                        .increment(r.deleted_count);
                }
                report.total_deleted += r.deleted_count;
                report.deleted_counts.insert(collection.to_string(), r.deleted_count);
            }
            Err(e) => {
                tracing::warn!(target: "retention", collection, error = %e, "cleanup failed");
                report.errors.insert(collection.to_string(), e.to_string());
            }
        }
    }

    tracing::info!(
        target: "retention",
        total_deleted = report.total_deleted,
        failed = report.errors.len(),
        "retention cleanup finished"
    );
    report
}
