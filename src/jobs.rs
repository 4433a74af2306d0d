//! Durable tracking for long-running operations.
//!
//! Each job is one JSON record at `<jobs_dir>/<id>.json`, written atomically
//! (write-temp-then-rename) so a crash never leaves a reader looking at a
//! half-written record. The tracker is the single writer for a given job id;
//! the operation executing under that id is the only code that mutates it.
//!
//! Cancellation is cooperative, not preemptive: `cancel` flips the durable
//! status and best-effort aborts the registered task handle, but code running
//! the job must check its own status between batches and exit early — nothing
//! forces an in-flight embedding call to stop.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Job, JobStatus};

pub struct JobTracker {
    jobs_dir: PathBuf,
    /// Abort handles for jobs currently executing on the worker pool.
    running: Mutex<HashMap<String, AbortHandle>>,
}

impl JobTracker {
    pub fn new(jobs_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&jobs_dir)
            .with_context(|| format!("Failed to create jobs dir: {}", jobs_dir.display()))?;
        Ok(JobTracker {
            jobs_dir,
            running: Mutex::new(HashMap::new()),
        })
    }

    fn record_path(&self, job_id: &str) -> PathBuf {
        self.jobs_dir.join(format!("{}.json", job_id))
    }

    /// Atomically persist a record: write to a temp file, then rename.
    fn write_record(&self, job: &Job) -> Result<()> {
        let path = self.record_path(&job.id);
        let tmp = self.jobs_dir.join(format!("{}.json.tmp", job.id));
        let json = serde_json::to_string_pretty(job)?;
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write job record: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to commit job record: {}", path.display()))?;
        Ok(())
    }

    fn read_record(&self, job_id: &str) -> Option<Job> {
        let path = self.record_path(job_id);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(job) => Some(job),
            Err(e) => {
                eprintln!("Warning: corrupt job record {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Create a `Pending` record and return it.
    pub fn register(
        &self,
        operation_type: &str,
        total_items: u64,
        details: BTreeMap<String, String>,
    ) -> Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            operation_type: operation_type.to_string(),
            status: JobStatus::Pending,
            total_items,
            processed_items: 0,
            progress_percentage: 0.0,
            started_at: now,
            updated_at: now,
            completed_at: None,
            result: None,
            error: None,
            details,
        };
        self.write_record(&job)?;
        Ok(job)
    }

    /// Report progress for a live job. Returns `false` (without failing the
    /// caller) when the job id is unknown or the record is already terminal.
    /// `processed_items` is clamped to be monotonically non-decreasing.
    pub fn update_progress(
        &self,
        job_id: &str,
        processed_items: u64,
        status: Option<JobStatus>,
        current_file: Option<&str>,
        current_operation: Option<&str>,
    ) -> bool {
        let mut job = match self.read_record(job_id) {
            Some(job) => job,
            None => return false,
        };
        if job.status.is_terminal() {
            return false;
        }

        job.processed_items = job.processed_items.max(processed_items);
        if job.total_items > 0 {
            job.progress_percentage =
                (job.processed_items as f64 / job.total_items as f64) * 100.0;
        }
        if let Some(status) = status {
            // Terminal transitions go through complete/fail/cancel only.
            if !status.is_terminal() {
                job.status = status;
            }
        }
        if let Some(file) = current_file {
            job.details
                .insert("current_file".to_string(), file.to_string());
        }
        if let Some(op) = current_operation {
            job.details
                .insert("current_operation".to_string(), op.to_string());
        }
        job.updated_at = Utc::now();

        match self.write_record(&job) {
            Ok(()) => true,
            Err(e) => {
                eprintln!("Warning: failed to persist progress for job {}: {}", job_id, e);
                false
            }
        }
    }

    /// Transition into `Completed`. No-op with a warning if already terminal.
    pub fn complete(&self, job_id: &str, result: Option<serde_json::Value>) -> Result<()> {
        self.finish(job_id, JobStatus::Completed, result, None)
    }

    /// Transition into `Failed` with a captured error. No-op with a warning
    /// if already terminal.
    pub fn fail(&self, job_id: &str, error: &str) -> Result<()> {
        self.finish(job_id, JobStatus::Failed, None, Some(error.to_string()))
    }

    fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<()> {
        let mut job = match self.read_record(job_id) {
            Some(job) => job,
            None => return Err(StoreError::JobNotFound(job_id.to_string()).into()),
        };
        if job.status.is_terminal() {
            eprintln!(
                "Warning: job {} is already {}; ignoring transition to {}",
                job_id, job.status, status
            );
            return Ok(());
        }
        let now = Utc::now();
        job.status = status;
        job.result = result;
        job.error = error;
        job.updated_at = now;
        job.completed_at = Some(now);
        self.write_record(&job)?;
        // Terminal records have nothing left to abort.
        self.running.lock().unwrap().remove(job_id);
        Ok(())
    }

    /// Cancel a job. Returns `false` for jobs already terminal (the record is
    /// left unchanged); otherwise flips the status to `Cancelled` and
    /// best-effort aborts the registered execution handle.
    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        let mut job = match self.read_record(job_id) {
            Some(job) => job,
            None => return Err(StoreError::JobNotFound(job_id.to_string()).into()),
        };
        if job.status.is_terminal() {
            return Ok(false);
        }
        let now = Utc::now();
        job.status = JobStatus::Cancelled;
        job.updated_at = now;
        job.completed_at = Some(now);
        self.write_record(&job)?;

        if let Some(handle) = self.running.lock().unwrap().remove(job_id) {
            handle.abort();
        }
        Ok(true)
    }

    /// The safe cancellation point: operations call this between batches.
    pub fn is_cancelled(&self, job_id: &str) -> bool {
        self.read_record(job_id)
            .map(|job| job.status == JobStatus::Cancelled)
            .unwrap_or(false)
    }

    pub fn get(&self, job_id: &str) -> Result<Job> {
        self.read_record(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()).into())
    }

    /// List jobs newest-first, optionally filtered, paginated.
    pub fn list(
        &self,
        status: Option<JobStatus>,
        operation_type: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for entry in std::fs::read_dir(&self.jobs_dir)
            .with_context(|| format!("Failed to read jobs dir: {}", self.jobs_dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(job) = self.read_record(stem) {
                jobs.push(job);
            }
        }

        jobs.retain(|job| {
            status.map(|s| job.status == s).unwrap_or(true)
                && operation_type
                    .map(|op| job.operation_type == op)
                    .unwrap_or(true)
        });
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(jobs.into_iter().skip(offset).take(limit).collect())
    }

    /// Register the abort handle for a job now executing on the worker pool.
    pub fn register_handle(&self, job_id: &str, handle: AbortHandle) {
        self.running
            .lock()
            .unwrap()
            .insert(job_id.to_string(), handle);
    }

    /// Drop the abort handle once the job's task has finished.
    pub fn clear_handle(&self, job_id: &str) {
        self.running.lock().unwrap().remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracker() -> (TempDir, JobTracker) {
        let tmp = TempDir::new().unwrap();
        let tracker = JobTracker::new(tmp.path().join("jobs")).unwrap();
        (tmp, tracker)
    }

    #[test]
    fn test_register_progress_complete() {
        let (_tmp, t) = tracker();
        let job = t.register("create_store", 10, BTreeMap::new()).unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        assert!(t.update_progress(&job.id, 4, Some(JobStatus::Processing), None, Some("embedding")));
        let mid = t.get(&job.id).unwrap();
        assert_eq!(mid.status, JobStatus::Processing);
        assert_eq!(mid.processed_items, 4);
        assert!((mid.progress_percentage - 40.0).abs() < f64::EPSILON);

        assert!(t.update_progress(&job.id, 10, None, None, None));
        t.complete(&job.id, Some(serde_json::json!({"store_id": "s1"})))
            .unwrap();

        let done = t.get(&job.id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(done.processed_items, done.total_items);
    }

    #[test]
    fn test_fail_records_error() {
        let (_tmp, t) = tracker();
        let job = t.register("update_store", 3, BTreeMap::new()).unwrap();
        t.fail(&job.id, "embedding backend unreachable").unwrap();
        let failed = t.get(&job.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.error.as_deref(),
            Some("embedding backend unreachable")
        );
        assert!(failed.completed_at.is_some());
    }

    #[test]
    fn test_progress_monotone() {
        let (_tmp, t) = tracker();
        let job = t.register("create_store", 10, BTreeMap::new()).unwrap();
        assert!(t.update_progress(&job.id, 7, None, None, None));
        assert!(t.update_progress(&job.id, 3, None, None, None));
        assert_eq!(t.get(&job.id).unwrap().processed_items, 7);
    }

    #[test]
    fn test_pause_and_resume() {
        let (_tmp, t) = tracker();
        let job = t.register("create_store", 4, BTreeMap::new()).unwrap();
        assert!(t.update_progress(&job.id, 1, Some(JobStatus::Processing), None, None));
        assert!(t.update_progress(&job.id, 2, Some(JobStatus::Paused), None, None));
        assert_eq!(t.get(&job.id).unwrap().status, JobStatus::Paused);
        assert!(t.update_progress(&job.id, 2, Some(JobStatus::Processing), None, None));
        assert_eq!(t.get(&job.id).unwrap().status, JobStatus::Processing);
        // Terminal states are not reachable through update_progress.
        assert!(t.update_progress(&job.id, 3, Some(JobStatus::Completed), None, None));
        assert_eq!(t.get(&job.id).unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn test_update_unknown_job_returns_false() {
        let (_tmp, t) = tracker();
        assert!(!t.update_progress("nope", 1, None, None, None));
    }

    #[test]
    fn test_cancel_on_terminal_returns_false_and_leaves_record() {
        let (_tmp, t) = tracker();
        let job = t.register("create_store", 1, BTreeMap::new()).unwrap();
        t.complete(&job.id, None).unwrap();
        let before = t.get(&job.id).unwrap();

        assert!(!t.cancel(&job.id).unwrap());
        let after = t.get(&job.id).unwrap();
        assert_eq!(after.status, JobStatus::Completed);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[test]
    fn test_cancel_live_job() {
        let (_tmp, t) = tracker();
        let job = t.register("update_store", 5, BTreeMap::new()).unwrap();
        assert!(t.cancel(&job.id).unwrap());
        assert!(t.is_cancelled(&job.id));
        // Terminal records reject further mutation.
        assert!(!t.update_progress(&job.id, 2, None, None, None));
        t.complete(&job.id, None).unwrap(); // idempotent no-op
        assert_eq!(t.get(&job.id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn test_terminal_transition_is_single() {
        let (_tmp, t) = tracker();
        let job = t.register("create_store", 1, BTreeMap::new()).unwrap();
        t.fail(&job.id, "boom").unwrap();
        t.complete(&job.id, None).unwrap(); // warned no-op
        let record = t.get(&job.id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_list_filters_and_paginates() {
        let (_tmp, t) = tracker();
        for i in 0..5 {
            let job = t
                .register("create_store", 1, BTreeMap::new())
                .unwrap();
            if i % 2 == 0 {
                t.complete(&job.id, None).unwrap();
            }
        }
        let job = t.register("update_store", 1, BTreeMap::new()).unwrap();
        t.fail(&job.id, "x").unwrap();

        let all = t.list(None, None, 100, 0).unwrap();
        assert_eq!(all.len(), 6);

        let completed = t.list(Some(JobStatus::Completed), None, 100, 0).unwrap();
        assert_eq!(completed.len(), 3);

        let updates = t.list(None, Some("update_store"), 100, 0).unwrap();
        assert_eq!(updates.len(), 1);

        let page = t.list(None, None, 2, 2).unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_get_unknown_is_job_not_found() {
        let (_tmp, t) = tracker();
        let err = t.get("missing").unwrap_err();
        let store_err = err.downcast_ref::<StoreError>().unwrap();
        assert!(matches!(store_err, StoreError::JobNotFound(_)));
    }
}
