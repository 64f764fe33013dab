// tests/scheduler.rs
//
// Scheduler behavior on a paused clock: overlap skipping, re-registration,
// panics and graceful shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use situational_ingest::ingest::pool::WorkerPools;
use situational_ingest::ingest::scheduler::{JobDefinition, Scheduler};
use tokio::time::{sleep, Instant};

fn counting_job(id: &str, every: Duration, work: Duration, hits: Arc<AtomicU64>) -> JobDefinition {
    JobDefinition::new(id, every, move || {
        let hits = hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            sleep(work).await;
            Ok(())
        }
    })
}

#[tokio::test(start_paused = true)]
async fn overlapping_firing_is_skipped_not_queued() {
    let hits = Arc::new(AtomicU64::new(0));
    let sched = Scheduler::new(WorkerPools::new(4, 1));
    sched.apply([counting_job(
        "ingest_news",
        Duration::from_secs(1),
        Duration::from_millis(2_500),
        hits.clone(),
    )]);

    // fires at 1s and is busy until 3.5s; the 2s tick is skipped
    sleep(Duration::from_millis(2_500)).await;
    let job = sched.job("ingest_news").expect("job");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(job.is_running);
    assert!(job.skipped >= 1);
    assert!(job.next_run_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn reapplying_same_id_replaces_the_job() {
    let hits = Arc::new(AtomicU64::new(0));
    let sched = Scheduler::new(WorkerPools::new(4, 1));
    sched.apply([counting_job("retention_cleanup", Duration::from_secs(1), Duration::ZERO, hits.clone())]);
    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // New interval; the old one-second ticker must not fire at t=2s.
    sched.apply([counting_job("retention_cleanup", Duration::from_secs(10), Duration::ZERO, hits.clone())]);
    sleep(Duration::from_millis(1_000)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let jobs = sched.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].interval_secs, 10);
    // counters survive the replacement
    assert_eq!(jobs[0].runs, 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_job_is_recorded_and_keeps_its_schedule() {
    let sched = Scheduler::new(WorkerPools::new(2, 1));
    sched.apply([JobDefinition::new("ingest_tax", Duration::from_secs(5), || async {
        if true {
            panic!("parser blew up");
        }
        Ok(())
    })]);

    sleep(Duration::from_secs(11)).await;
    let job = sched.job("ingest_tax").unwrap();
    assert_eq!(job.runs, 2);
    assert_eq!(job.failures, 2);
    assert_eq!(job.last_error.as_deref(), Some("job panicked"));
    assert!(!job.is_running);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_in_flight_job() {
    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    let sched = Scheduler::new(WorkerPools::new(2, 1));
    sched.apply([JobDefinition::new("ingest_weather", Duration::from_secs(1), move || {
        let flag = flag.clone();
        async move {
            sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    })]);
    sleep(Duration::from_millis(1_100)).await;

    sched.shutdown(Duration::from_secs(30)).await;
    assert!(done.load(Ordering::SeqCst));
    assert!(sched.jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_gives_up_after_grace() {
    let sched = Scheduler::new(WorkerPools::new(2, 1));
    sched.apply([JobDefinition::new("stuck", Duration::from_secs(1), || async {
        sleep(Duration::from_secs(3_600)).await;
        Ok(())
    })]);
    sleep(Duration::from_millis(1_100)).await;

    let t0 = Instant::now();
    sched.shutdown(Duration::from_secs(2)).await;
    assert!(t0.elapsed() < Duration::from_secs(3));
}
