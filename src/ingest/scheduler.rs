// src/ingest/scheduler.rs
//! Fixed-interval job scheduler.
//!
//! Each job gets a ticker task that first fires one interval after the job is
//! applied; a firing runs the handler on an io worker
//! unless the previous invocation is still in flight, in which case the firing
//! is skipped (logged and counted). Missed ticks are dropped, not replayed.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ingest::pool::WorkerPools;

/// Longest interval a ticker honours; longer ones are clamped to it.
pub const MAX_INTERVAL: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

pub type JobHandler = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
pub struct JobDefinition {
    pub id: String,
    pub interval: Duration,
    handler: JobHandler,
}

impl JobDefinition {
    pub fn new<F, Fut>(id: impl Into<String>, interval: Duration, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            id: id.into(),
            interval,
            handler: Arc::new(move || f().boxed()),
        }
    }
}

impl std::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledJob {
    pub job_id: String,
    pub interval_secs: u64,
    pub next_run_at: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub runs: u64,
    pub skipped: u64,
    pub failures: u64,
    /// Most recent failure, kept after later successes.
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct JobState {
    running: AtomicBool,
    runs: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
    last_error: Mutex<Option<String>>,
    next_run_at: Mutex<Option<DateTime<Utc>>>,
}

struct JobEntry {
    def: JobDefinition,
    state: Arc<JobState>,
    ticker: JoinHandle<()>,
}

pub struct Scheduler {
    pools: WorkerPools,
    jobs: Mutex<HashMap<String, JobEntry>>,
}

impl Scheduler {
    pub fn new(pools: WorkerPools) -> Self {
        Self {
            pools,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Install `defs`. A definition whose id already exists replaces that job;
    /// its counters and in-flight invocation carry over.
    pub fn apply(&self, defs: impl IntoIterator<Item = JobDefinition>) {
        let mut jobs = self.jobs.lock();
        for def in defs {
            let state = match jobs.remove(&def.id) {
                Some(old) => {
                    old.ticker.abort();
                    old.state
                }
                None => Arc::new(JobState::default()),
            };
            let ticker = spawn_ticker(def.clone(), state.clone(), self.pools.clone());
            tracing::info!(target: "scheduler", job = %def.id, interval_secs = def.interval.as_secs(), "job scheduled");
            jobs.insert(def.id.clone(), JobEntry { def, state, ticker });
        }
    }

    pub fn remove(&self, job_id: &str) -> bool {
        match self.jobs.lock().remove(job_id) {
            Some(entry) => {
                entry.ticker.abort();
                true
            }
            None => false,
        }
    }

    pub fn jobs(&self) -> Vec<ScheduledJob> {
        let jobs = self.jobs.lock();
        let mut out: Vec<ScheduledJob> = jobs
            .values()
            .map(|e| ScheduledJob {
                job_id: e.def.id.clone(),
                interval_secs: e.def.interval.min(MAX_INTERVAL).as_secs(),
                next_run_at: *e.state.next_run_at.lock(),
                is_running: e.state.running.load(Ordering::Acquire),
                runs: e.state.runs.load(Ordering::Relaxed),
                skipped: e.state.skipped.load(Ordering::Relaxed),
                failures: e.state.failures.load(Ordering::Relaxed),
                last_error: e.state.last_error.lock().clone(),
            })
            .collect();
        out.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        out
    }

    pub fn job(&self, job_id: &str) -> Option<ScheduledJob> {
        self.jobs().into_iter().find(|j| j.job_id == job_id)
    }

    /// Stop all tickers, then wait up to `grace` for in-flight jobs to finish.
    pub async fn shutdown(&self, grace: Duration) {
        let drained: Vec<String> = {
            let mut jobs = self.jobs.lock();
            jobs.drain()
                .map(|(id, e)| {
                    e.ticker.abort();
                    id
                })
                .collect()
        };
        tracing::info!(target: "scheduler", jobs = drained.len(), "scheduler stopping");
        if tokio::time::timeout(grace, self.pools.drain_io()).await.is_err() {
            tracing::warn!(target: "scheduler", grace_ms = grace.as_millis() as u64, "jobs still running at shutdown");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, e) in self.jobs.get_mut().drain() {
            e.ticker.abort();
        }
    }
}

fn spawn_ticker(def: JobDefinition, state: Arc<JobState>, pools: WorkerPools) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = def.interval.clamp(Duration::from_millis(1), MAX_INTERVAL);
        // First firing is one full period after registration.
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let next_after = |p: Duration| {
            chrono::Duration::from_std(p)
                .ok()
                .and_then(|p| Utc::now().checked_add_signed(p))
        };
        *state.next_run_at.lock() = next_after(period);
        loop {
            ticker.tick().await;
            *state.next_run_at.lock() = next_after(period);

            if state
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                state.skipped.fetch_add(1, Ordering::Relaxed);
                counter!("scheduler_job_skipped_total", "job" => def.id.clone()).increment(1);
                tracing::warn!(target: "scheduler", job = %def.id, "previous run still in flight, skipping");
                continue;
            }

            tokio::spawn(run_job(def.clone(), state.clone(), pools.clone()));
        }
    })
}

/// One invocation. The caller has already set `running`; this clears it.
async fn run_job(def: JobDefinition, state: Arc<JobState>, pools: WorkerPools) {
    let _permit = pools.io_permit().await;
    state.runs.fetch_add(1, Ordering::Relaxed);
    counter!("scheduler_job_runs_total", "job" => def.id.clone()).increment(1);
    tracing::debug!(target: "scheduler", job = %def.id, "job started");

    let outcome = AssertUnwindSafe((def.handler)()).catch_unwind().await;
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(_) => Some("job panicked".to_string()),
    };
    if let Some(msg) = failure {
        state.failures.fetch_add(1, Ordering::Relaxed);
        counter!("scheduler_job_failures_total", "job" => def.id.clone()).increment(1);
        tracing::warn!(target: "scheduler", job = %def.id, error = %msg, "job failed");
        *state.last_error.lock() = Some(msg);
    }

    state.running.store(false, Ordering::Release);
}
