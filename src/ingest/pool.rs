// src/ingest/pool.rs
//! Bounded worker pools shared by the orchestrator and the scheduler.
//!
//! `io` bounds concurrent ingestion runs and scheduled jobs; `cpu` bounds
//! normalization, which runs on the blocking thread pool.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct WorkerPools {
    io: Arc<Semaphore>,
    cpu: Arc<Semaphore>,
    io_size: usize,
    cpu_size: usize,
}

impl WorkerPools {
    pub fn new(io_workers: usize, cpu_workers: usize) -> Self {
        let io_size = io_workers.max(1);
        let cpu_size = cpu_workers.max(1);
        Self {
            io: Arc::new(Semaphore::new(io_size)),
            cpu: Arc::new(Semaphore::new(cpu_size)),
            io_size,
            cpu_size,
        }
    }

    pub async fn io_permit(&self) -> OwnedSemaphorePermit {
        // The semaphores are never closed, so acquisition only waits.
        match self.io.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => unreachable!("io pool semaphore closed"),
        }
    }

    pub async fn cpu_permit(&self) -> OwnedSemaphorePermit {
        match self.cpu.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => unreachable!("cpu pool semaphore closed"),
        }
    }

    pub fn io_size(&self) -> usize {
        self.io_size
    }

    pub fn cpu_size(&self) -> usize {
        self.cpu_size
    }

    pub fn io_available(&self) -> usize {
        self.io.available_permits()
    }

    /// Wait until every io worker is idle. Used on shutdown to let in-flight
    /// jobs drain.
    pub async fn drain_io(&self) {
        if let Ok(all) = self.io.acquire_many(self.io_size as u32).await {
            drop(all);
        }
    }
}

impl Default for WorkerPools {
    fn default() -> Self {
        Self::new(20, 5)
    }
}
