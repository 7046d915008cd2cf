use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::ServiceError;
use crate::models::{BatchFilter, BatchResult, Job, JobHistoryEntry, JobStatus};
use crate::storage::{BatchStore, JobStore};

const SNAPSHOT_FILE: &str = "state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    jobs: HashMap<String, Expiring<Job>>,
    #[serde(default)]
    history: HashMap<String, Expiring<Vec<JobHistoryEntry>>>,
    #[serde(default)]
    batches: HashMap<String, Expiring<BatchResult>>,
}

impl State {
    fn purge(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.jobs.len() + self.history.len() + self.batches.len();
        self.jobs.retain(|_, j| j.is_live(now));
        self.history.retain(|_, h| h.is_live(now));
        self.batches.retain(|_, b| b.is_live(now));
        before - (self.jobs.len() + self.history.len() + self.batches.len())
    }

    fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.jobs.values().any(|j| !j.is_live(now))
            || self.history.values().any(|h| !h.is_live(now))
            || self.batches.values().any(|b| !b.is_live(now))
    }
}

/// In-process store for jobs, job history and batch results.
///
/// Every record carries an expiry; expired records are invisible to reads
/// and dropped by [`MemoryStore::purge_expired`]. When created with
/// [`MemoryStore::with_snapshot`] the whole state is written to
/// `<data_dir>/state.json` after each mutation and reloaded on start.
pub struct MemoryStore {
    ttl: chrono::Duration,
    snapshot_path: Option<PathBuf>,
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: to_chrono(ttl),
            snapshot_path: None,
            state: RwLock::new(State::default()),
        }
    }

    /// Create a snapshot-backed store, loading existing state from disk if present.
    ///
    /// If `state.json` is corrupted (invalid JSON), creates a backup at
    /// `state.json.bak`, logs a warning, and starts empty.
    pub async fn with_snapshot(data_dir: PathBuf, ttl: Duration) -> Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .context("Failed to create data directory")?;

        let file_path = data_dir.join(SNAPSHOT_FILE);

        let mut state = if file_path.exists() {
            let content = tokio::fs::read_to_string(&file_path)
                .await
                .context("Failed to read state.json")?;
            match serde_json::from_str::<State>(&content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(
                        "state.json is corrupted ({}), creating backup and starting empty",
                        e
                    );
                    let backup_path = data_dir.join("state.json.bak");
                    if let Err(backup_err) = tokio::fs::copy(&file_path, &backup_path).await {
                        tracing::error!(
                            "Failed to create backup of corrupted state.json: {}",
                            backup_err
                        );
                    }
                    State::default()
                }
            }
        } else {
            State::default()
        };

        let dropped = state.purge(Utc::now());
        if dropped > 0 {
            tracing::info!("Dropped {} expired records from snapshot", dropped);
        }

        Ok(Self {
            ttl: to_chrono(ttl),
            snapshot_path: Some(file_path),
            state: RwLock::new(state),
        })
    }

    fn expiry(&self) -> DateTime<Utc> {
        Utc::now() + self.ttl
    }

    /// Atomically write the state to disk: `.tmp` first, then rename.
    /// No-op for stores without a snapshot path.
    async fn persist(&self, state: &State) -> Result<()> {
        let Some(file_path) = &self.snapshot_path else {
            return Ok(());
        };
        let tmp_path = file_path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(state).context("Failed to serialize state")?;

        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .context("Failed to write temporary state file")?;

        tokio::fs::rename(&tmp_path, file_path)
            .await
            .context("Failed to rename temporary state file")?;

        Ok(())
    }

    /// Apply `change` to the state under the write lock.
    ///
    /// Snapshot-backed stores apply it to a copy and install the copy only
    /// after it has been written to disk, so a failed write leaves the
    /// in-memory state as it was.
    async fn commit<T, F>(&self, state: &mut State, change: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut State) -> Result<T> + Send,
    {
        if self.snapshot_path.is_none() {
            return change(state);
        }
        let mut next = state.clone();
        let out = change(&mut next)?;
        self.persist(&next).await?;
        *state = next;
        Ok(out)
    }

    /// Remove every expired record. Returns how many were dropped.
    pub async fn purge_expired(&self) -> Result<usize> {
        let mut guard = self.state.write().await;
        let now = Utc::now();
        if !guard.has_expired(now) {
            return Ok(0);
        }
        let dropped = self.commit(&mut guard, |state| Ok(state.purge(now))).await?;
        tracing::debug!("Purged {} expired records", dropped);
        Ok(dropped)
    }
}

fn to_chrono(ttl: Duration) -> chrono::Duration {
    // Out-of-range TTLs are treated as "effectively forever".
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let mut guard = self.state.write().await;
        let now = Utc::now();
        let expires_at = self.expiry();

        self.commit(&mut guard, |state| {
            if state.jobs.get(&job.id).is_some_and(|j| j.is_live(now)) {
                return Err(ServiceError::Conflict(format!(
                    "job already exists with ID: {}",
                    job.id
                ))
                .into());
            }
            state.jobs.insert(
                job.id.clone(),
                Expiring {
                    value: job.clone(),
                    expires_at,
                },
            );
            Ok(())
        })
        .await
    }

    async fn update_job(&self, job: &Job, expected: JobStatus) -> Result<()> {
        let mut guard = self.state.write().await;
        let now = Utc::now();
        let expires_at = self.expiry();

        self.commit(&mut guard, |state| match state.jobs.get_mut(&job.id) {
            Some(existing) if existing.is_live(now) => {
                if existing.value.status != expected {
                    return Err(ServiceError::Conflict(format!(
                        "job {} changed status: expected {}, found {}",
                        job.id, expected, existing.value.status
                    ))
                    .into());
                }
                existing.value = job.clone();
                existing.expires_at = expires_at;
                Ok(())
            }
            _ => Err(ServiceError::job_not_found(&job.id).into()),
        })
        .await
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let state = self.state.read().await;
        let now = Utc::now();
        Ok(state
            .jobs
            .get(id)
            .filter(|j| j.is_live(now))
            .map(|j| j.value.clone()))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        let now = Utc::now();
        Ok(state
            .jobs
            .values()
            .filter(|j| j.is_live(now))
            .map(|j| j.value.clone())
            .collect())
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let mut guard = self.state.write().await;
        let now = Utc::now();
        self.commit(&mut guard, |state| match state.jobs.remove(id) {
            Some(j) if j.is_live(now) => Ok(()),
            _ => Err(ServiceError::job_not_found(id).into()),
        })
        .await
    }

    async fn append_history(&self, job_id: &str, entry: JobHistoryEntry) -> Result<()> {
        let mut guard = self.state.write().await;
        let now = Utc::now();
        let expires_at = now + self.ttl;

        self.commit(&mut guard, |state| {
            let log = state
                .history
                .entry(job_id.to_string())
                .or_insert_with(|| Expiring {
                    value: Vec::new(),
                    expires_at,
                });
            if !log.is_live(now) {
                log.value.clear();
            }
            log.value.push(entry);
            log.expires_at = expires_at;
            Ok(())
        })
        .await
    }

    async fn get_history(&self, job_id: &str) -> Result<Vec<JobHistoryEntry>> {
        let state = self.state.read().await;
        let now = Utc::now();
        Ok(state
            .history
            .get(job_id)
            .filter(|h| h.is_live(now))
            .map(|h| h.value.clone())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<()> {
        check_snapshot_dir(self.snapshot_path.as_ref())
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn store_batch_result(&self, result: &BatchResult) -> Result<()> {
        let mut guard = self.state.write().await;
        let expires_at = self.expiry();
        self.commit(&mut guard, |state| {
            state.batches.insert(
                result.batch_id.clone(),
                Expiring {
                    value: result.clone(),
                    expires_at,
                },
            );
            Ok(())
        })
        .await
    }

    async fn get_batch_result(&self, batch_id: &str) -> Result<Option<BatchResult>> {
        let state = self.state.read().await;
        let now = Utc::now();
        Ok(state
            .batches
            .get(batch_id)
            .filter(|b| b.is_live(now))
            .map(|b| b.value.clone()))
    }

    async fn list_batch_results(&self, filter: &BatchFilter) -> Result<Vec<BatchResult>> {
        let state = self.state.read().await;
        let now = Utc::now();
        let mut results: Vec<BatchResult> = state
            .batches
            .values()
            .filter(|b| b.is_live(now) && filter.matches(&b.value))
            .map(|b| b.value.clone())
            .collect();
        results.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });
        Ok(results)
    }

    async fn health_check(&self) -> Result<()> {
        check_snapshot_dir(self.snapshot_path.as_ref())
    }
}

fn check_snapshot_dir(snapshot_path: Option<&PathBuf>) -> Result<()> {
    if let Some(dir) = snapshot_path.and_then(|p| p.parent()) {
        if !dir.is_dir() {
            anyhow::bail!("snapshot directory {} is missing", dir.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BatchJobError, BatchStatus, BatchSummary, JobAction};
    use tempfile::TempDir;

    fn make_job(source: &str) -> Job {
        Job::started(source, Utc::now())
    }

    fn make_batch(id: &str, success: usize, total: usize) -> BatchResult {
        let now = Utc::now();
        BatchResult {
            batch_id: id.to_string(),
            action: JobAction::Pause,
            start_time: now,
            end_time: now,
            successful: (0..success).map(|i| format!("job-{}", i)).collect(),
            failed: (success..total)
                .map(|i| BatchJobError {
                    job_id: format!("job-{}", i),
                    error: "cannot pause".to_string(),
                })
                .collect(),
            summary: BatchSummary {
                total_jobs: total,
                success_count: success,
                failure_count: total - success,
                duration_ms: 0,
            },
        }
    }

    async fn setup_store() -> (MemoryStore, TempDir) {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let store = MemoryStore::with_snapshot(tmp_dir.path().to_path_buf(), Duration::from_secs(3600))
            .await
            .expect("create store");
        (store, tmp_dir)
    }

    #[tokio::test]
    async fn test_create_and_get_job() {
        let store = MemoryStore::new(Duration::from_secs(60));
        let job = make_job("s3://a");
        store.create_job(&job).await.expect("create");

        let fetched = store.get_job(&job.id).await.expect("get");
        assert_eq!(fetched, Some(job));
        assert!(store.get_job("missing").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_id_is_conflict() {
        let store = MemoryStore::new(Duration::from_secs(60));
        let job = make_job("s3://a");
        store.create_job(&job).await.expect("create");

        let err = store.create_job(&job).await.unwrap_err();
        match err.downcast::<ServiceError>() {
            Ok(ServiceError::Conflict(msg)) => assert!(msg.contains(&job.id)),
            other => panic!("Expected Conflict, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_missing_job_is_not_found() {
        let store = MemoryStore::new(Duration::from_secs(60));
        let job = make_job("s3://a");
        let err = store.update_job(&job, JobStatus::InProgress).await.unwrap_err();
        assert!(matches!(
            err.downcast::<ServiceError>(),
            Ok(ServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_replaces_record() {
        let store = MemoryStore::new(Duration::from_secs(60));
        let mut job = make_job("s3://a");
        store.create_job(&job).await.expect("create");

        job.status = JobStatus::Paused;
        store
            .update_job(&job, JobStatus::InProgress)
            .await
            .expect("update");
        let fetched = store.get_job(&job.id).await.expect("get").expect("exists");
        assert_eq!(fetched.status, JobStatus::Paused);
    }

    #[tokio::test]
    async fn test_update_rejects_stale_status() {
        let store = MemoryStore::new(Duration::from_secs(60));
        let original = make_job("s3://a");
        store.create_job(&original).await.expect("create");

        let mut failed = original.clone();
        failed.status = JobStatus::Failed;
        store
            .update_job(&failed, JobStatus::InProgress)
            .await
            .expect("first writer wins");

        // A second writer that read the job while it was still in progress.
        let mut paused = original.clone();
        paused.status = JobStatus::Paused;
        let err = store
            .update_job(&paused, JobStatus::InProgress)
            .await
            .unwrap_err();
        match err.downcast::<ServiceError>() {
            Ok(ServiceError::Conflict(msg)) => {
                assert!(msg.contains("expected IN_PROGRESS"), "Got: {}", msg);
                assert!(msg.contains("found FAILED"), "Got: {}", msg);
            }
            other => panic!("Expected Conflict, got: {:?}", other),
        }
        let stored = store.get_job(&original.id).await.expect("get").expect("exists");
        assert_eq!(stored.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_delete_job() {
        let store = MemoryStore::new(Duration::from_secs(60));
        let job = make_job("s3://a");
        store.create_job(&job).await.expect("create");
        store.delete_job(&job.id).await.expect("delete");
        assert!(store.get_job(&job.id).await.expect("get").is_none());
        assert!(store.delete_job(&job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_records_are_invisible() {
        let store = MemoryStore::new(Duration::ZERO);
        let job = make_job("s3://a");
        store.create_job(&job).await.expect("create");
        store
            .store_batch_result(&make_batch("batch_1", 1, 1))
            .await
            .expect("store");

        assert!(store.get_job(&job.id).await.expect("get").is_none());
        assert!(store.list_jobs().await.expect("list").is_empty());
        assert!(store.get_batch_result("batch_1").await.expect("get").is_none());

        // An expired id can be reused.
        store.create_job(&job).await.expect("recreate");
    }

    #[tokio::test]
    async fn test_purge_expired_drops_records() {
        let store = MemoryStore::new(Duration::ZERO);
        store.create_job(&make_job("s3://a")).await.expect("create");
        store.create_job(&make_job("s3://b")).await.expect("create");
        let dropped = store.purge_expired().await.expect("purge");
        assert_eq!(dropped, 2);
        assert_eq!(store.purge_expired().await.expect("purge"), 0);
    }

    #[tokio::test]
    async fn test_history_preserves_insertion_order() {
        let store = MemoryStore::new(Duration::from_secs(60));
        for action in ["start", "pause", "resume", "stop"] {
            store
                .append_history("job-1", JobHistoryEntry::new(action, "ok"))
                .await
                .expect("append");
        }
        let history = store.get_history("job-1").await.expect("history");
        let actions: Vec<&str> = history.iter().map(|h| h.action.as_str()).collect();
        assert_eq!(actions, vec!["start", "pause", "resume", "stop"]);

        assert!(store.get_history("other").await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn test_list_batch_results_filters_and_orders_newest_first() {
        let store = MemoryStore::new(Duration::from_secs(60));
        let mut older = make_batch("batch_old", 2, 2);
        older.start_time -= chrono::Duration::minutes(5);
        let newer = make_batch("batch_new", 1, 3);
        store.store_batch_result(&older).await.expect("store");
        store.store_batch_result(&newer).await.expect("store");

        let all = store
            .list_batch_results(&BatchFilter::default())
            .await
            .expect("list");
        let ids: Vec<&str> = all.iter().map(|b| b.batch_id.as_str()).collect();
        assert_eq!(ids, vec!["batch_new", "batch_old"]);

        let success_only = store
            .list_batch_results(&BatchFilter {
                status: Some(BatchStatus::Success),
                ..Default::default()
            })
            .await
            .expect("list");
        assert_eq!(success_only.len(), 1);
        assert_eq!(success_only[0].batch_id, "batch_old");
    }

    #[tokio::test]
    async fn test_snapshot_persistence_across_instances() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let job = make_job("s3://persisted");
        let batch = make_batch("batch_p", 1, 1);

        {
            let store = MemoryStore::with_snapshot(tmp_dir.path().to_path_buf(), Duration::from_secs(3600))
                .await
                .expect("create store");
            store.create_job(&job).await.expect("create");
            store
                .append_history(&job.id, JobHistoryEntry::new("start", "created"))
                .await
                .expect("append");
            store.store_batch_result(&batch).await.expect("store");
        }

        {
            let store = MemoryStore::with_snapshot(tmp_dir.path().to_path_buf(), Duration::from_secs(3600))
                .await
                .expect("create store");
            assert_eq!(store.get_job(&job.id).await.expect("get"), Some(job.clone()));
            assert_eq!(store.get_history(&job.id).await.expect("history").len(), 1);
            assert_eq!(
                store.get_batch_result("batch_p").await.expect("get"),
                Some(batch)
            );
        }
    }

    #[tokio::test]
    async fn test_no_tmp_file_left_after_write() {
        let (store, tmp) = setup_store().await;
        store.create_job(&make_job("s3://a")).await.expect("create");

        assert!(tmp.path().join("state.json").exists());
        assert!(
            !tmp.path().join("state.json.tmp").exists(),
            "Temporary file should not remain after write"
        );
    }

    #[tokio::test]
    async fn test_corrupted_snapshot_recovers_empty_with_backup() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let corrupted = b"this is not valid JSON{{{";
        tokio::fs::write(tmp_dir.path().join("state.json"), corrupted)
            .await
            .expect("write corrupted file");

        let store = MemoryStore::with_snapshot(tmp_dir.path().to_path_buf(), Duration::from_secs(60))
            .await
            .expect("create store from corrupted file");
        assert!(store.list_jobs().await.expect("list").is_empty());

        let backup = tokio::fs::read(tmp_dir.path().join("state.json.bak"))
            .await
            .expect("read backup");
        assert_eq!(backup, corrupted);

        store.create_job(&make_job("s3://after")).await.expect("create");
        assert_eq!(store.list_jobs().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_snapshot_write_leaves_state_unchanged() {
        let (store, tmp) = setup_store().await;
        let kept = make_job("s3://kept");
        store.create_job(&kept).await.expect("create");

        tokio::fs::remove_dir_all(tmp.path()).await.expect("remove data dir");

        let lost = make_job("s3://lost");
        assert!(store.create_job(&lost).await.is_err());
        assert!(store.get_job(&lost.id).await.expect("get").is_none());

        let mut paused = kept.clone();
        paused.status = JobStatus::Paused;
        assert!(store.update_job(&paused, JobStatus::InProgress).await.is_err());
        assert!(store
            .append_history(&kept.id, JobHistoryEntry::new("pause", "ok"))
            .await
            .is_err());
        assert!(store
            .store_batch_result(&make_batch("batch_x", 1, 1))
            .await
            .is_err());

        let jobs = store.list_jobs().await.expect("list");
        assert_eq!(jobs, vec![kept.clone()]);
        assert!(store.get_history(&kept.id).await.expect("history").is_empty());
        assert!(store.get_batch_result("batch_x").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = MemoryStore::new(Duration::from_secs(60));
        assert!(JobStore::health_check(&store).await.is_ok());
        assert!(BatchStore::health_check(&store).await.is_ok());

        let (store, tmp) = setup_store().await;
        assert!(JobStore::health_check(&store).await.is_ok());
        drop(tmp);
        assert!(JobStore::health_check(&store).await.is_err());
    }
}
