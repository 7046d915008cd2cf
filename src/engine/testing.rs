//! Fault-injecting store double shared by the engine and server tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

use crate::models::{BatchFilter, BatchResult, Job, JobHistoryEntry, JobStatus};
use crate::storage::memory::MemoryStore;
use crate::storage::{BatchStore, JobStore};

pub(crate) struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_history: AtomicBool,
    pub fail_batches: AtomicBool,
    pub fail_health: AtomicBool,
    pub stall_reads: AtomicBool,
    pub fail_create_for: Mutex<Option<String>>,
    /// Cancelled right after the next successful `update_job`.
    pub cancel_on_update: Mutex<Option<CancellationToken>>,
    read_gate: Mutex<Option<(Arc<Barrier>, usize)>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(Duration::from_secs(3600)),
            fail_history: AtomicBool::new(false),
            fail_batches: AtomicBool::new(false),
            fail_health: AtomicBool::new(false),
            stall_reads: AtomicBool::new(false),
            fail_create_for: Mutex::new(None),
            cancel_on_update: Mutex::new(None),
            read_gate: Mutex::new(None),
        }
    }

    pub fn set(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }

    /// Make the next `readers` calls to `get_job` read, then wait for each
    /// other before returning.
    pub fn gate_reads(&self, readers: usize) {
        *self.read_gate.lock().unwrap() = Some((Arc::new(Barrier::new(readers)), readers));
    }

    fn next_gate(&self) -> Option<Arc<Barrier>> {
        let mut gate = self.read_gate.lock().unwrap();
        let (barrier, remaining) = gate.as_mut()?;
        *remaining -= 1;
        let barrier = barrier.clone();
        let exhausted = *remaining == 0;
        if exhausted {
            *gate = None;
        }
        Some(barrier)
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn create_job(&self, job: &Job) -> anyhow::Result<()> {
        let poisoned = self.fail_create_for.lock().unwrap().clone();
        if poisoned.as_deref() == Some(job.source_url.as_str()) {
            anyhow::bail!("disk full");
        }
        self.inner.create_job(job).await
    }

    async fn update_job(&self, job: &Job, expected: JobStatus) -> anyhow::Result<()> {
        self.inner.update_job(job, expected).await?;
        let token = self.cancel_on_update.lock().unwrap().take();
        if let Some(token) = token {
            token.cancel();
        }
        Ok(())
    }

    async fn get_job(&self, id: &str) -> anyhow::Result<Option<Job>> {
        if self.stall_reads.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        let gate = self.next_gate();
        let job = self.inner.get_job(id).await?;
        if let Some(barrier) = gate {
            barrier.wait().await;
        }
        Ok(job)
    }

    async fn list_jobs(&self) -> anyhow::Result<Vec<Job>> {
        if self.stall_reads.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.inner.list_jobs().await
    }

    async fn delete_job(&self, id: &str) -> anyhow::Result<()> {
        self.inner.delete_job(id).await
    }

    async fn append_history(&self, job_id: &str, entry: JobHistoryEntry) -> anyhow::Result<()> {
        if self.fail_history.load(Ordering::SeqCst) {
            anyhow::bail!("history backend offline");
        }
        self.inner.append_history(job_id, entry).await
    }

    async fn get_history(&self, job_id: &str) -> anyhow::Result<Vec<JobHistoryEntry>> {
        self.inner.get_history(job_id).await
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        if self.fail_health.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        JobStore::health_check(&self.inner).await
    }
}

#[async_trait]
impl BatchStore for FlakyStore {
    async fn store_batch_result(&self, result: &BatchResult) -> anyhow::Result<()> {
        if self.fail_batches.load(Ordering::SeqCst) {
            anyhow::bail!("batch backend offline");
        }
        self.inner.store_batch_result(result).await
    }

    async fn get_batch_result(&self, batch_id: &str) -> anyhow::Result<Option<BatchResult>> {
        self.inner.get_batch_result(batch_id).await
    }

    async fn list_batch_results(&self, filter: &BatchFilter) -> anyhow::Result<Vec<BatchResult>> {
        self.inner.list_batch_results(filter).await
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        if self.fail_health.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        BatchStore::health_check(&self.inner).await
    }
}
