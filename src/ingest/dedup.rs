// src/ingest/dedup.rs
//! Two-tier deduplication: within a batch (first occurrence wins) and against
//! fingerprints already persisted. Pure: the caller supplies the persisted
//! fingerprint set, this module never touches the store.

use std::collections::HashSet;

use crate::ingest::types::{Fingerprint, IngestRecord};

/// Result of [`filter_new`]: records to insert and records dropped as duplicates,
/// both in input order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DedupOutcome {
    pub new: Vec<IngestRecord>,
    pub duplicates: Vec<IngestRecord>,
}

pub fn filter_new(records: Vec<IngestRecord>, recent: &HashSet<Fingerprint>) -> DedupOutcome {
    let mut seen: HashSet<Fingerprint> = HashSet::with_capacity(records.len());
    let mut out = DedupOutcome {
        new: Vec::with_capacity(records.len()),
        duplicates: Vec::new(),
    };

    for rec in records {
        let fp = rec.fingerprint();
        if recent.contains(fp) || !seen.insert(fp.clone()) {
            out.duplicates.push(rec);
            continue;
        }
        out.new.push(rec);
    }

    out
}

/// Distinct fingerprints of `records`, used to look up what is already stored.
pub fn fingerprints_of(records: &[IngestRecord]) -> Vec<Fingerprint> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .iter()
        .map(|r| r.fingerprint().clone())
        .filter(|fp| seen.insert(fp.clone()))
        .collect()
}
