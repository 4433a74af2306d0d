//! Bounded worker pool for job-driven operations.
//!
//! Store creation and updates run here rather than on the calling task, so a
//! burst of requests cannot spawn unbounded embedding work: the pool size is
//! fixed by `jobs.workers`, independent of request concurrency. Each task's
//! abort handle is registered with the tracker so `cancel` can best-effort
//! interrupt it; the durable record is settled by this module when the work
//! future resolves.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::jobs::JobTracker;
use crate::models::JobStatus;

pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        WorkerPool {
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    /// Run `work` under the pool for the given registered job. The job moves
    /// to `Processing` once a worker picks it up, then to `Completed` or
    /// `Failed` from the work future's result — unless it was cancelled
    /// first, in which case the terminal record is left untouched.
    pub fn spawn_job<F>(
        &self,
        tracker: Arc<JobTracker>,
        job_id: String,
        work: F,
    ) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<Option<serde_json::Value>>> + Send + 'static,
    {
        let permits = self.permits.clone();
        let task_tracker = tracker.clone();
        let task_job_id = job_id.clone();

        let handle = tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            task_tracker.update_progress(
                &task_job_id,
                0,
                Some(JobStatus::Processing),
                None,
                None,
            );

            match work.await {
                Ok(result) => {
                    if let Err(e) = task_tracker.complete(&task_job_id, result) {
                        eprintln!(
                            "Warning: failed to record completion for job {}: {:#}",
                            task_job_id, e
                        );
                    }
                }
                Err(e) => {
                    if let Err(e2) = task_tracker.fail(&task_job_id, &format!("{:#}", e)) {
                        eprintln!(
                            "Warning: failed to record failure for job {}: {:#}",
                            task_job_id, e2
                        );
                    }
                }
            }
            task_tracker.clear_handle(&task_job_id);
        });

        tracker.register_handle(&job_id, handle.abort_handle());
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn tracker() -> (TempDir, Arc<JobTracker>) {
        let tmp = TempDir::new().unwrap();
        let tracker = Arc::new(JobTracker::new(tmp.path().join("jobs")).unwrap());
        (tmp, tracker)
    }

    #[tokio::test]
    async fn test_successful_job_completes_record() {
        let (_tmp, tracker) = tracker();
        let pool = WorkerPool::new(2);
        let job = tracker.register("create_store", 1, BTreeMap::new()).unwrap();

        let handle = pool.spawn_job(tracker.clone(), job.id.clone(), async {
            Ok(Some(serde_json::json!({"store_id": "s1"})))
        });
        handle.await.unwrap();

        let record = tracker.get(&job.id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.result.is_some());
    }

    #[tokio::test]
    async fn test_failing_job_records_error() {
        let (_tmp, tracker) = tracker();
        let pool = WorkerPool::new(2);
        let job = tracker.register("update_store", 1, BTreeMap::new()).unwrap();

        let handle = pool.spawn_job(tracker.clone(), job.id.clone(), async {
            anyhow::bail!("embedding backend unreachable")
        });
        handle.await.unwrap();

        let record = tracker.get(&job.id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record
            .error
            .as_deref()
            .unwrap()
            .contains("embedding backend unreachable"));
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let (_tmp, tracker) = tracker();
        let pool = WorkerPool::new(1);

        static LIVE: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);

        let mut handles = Vec::new();
        for _ in 0..3 {
            let job = tracker.register("create_store", 1, BTreeMap::new()).unwrap();
            handles.push(pool.spawn_job(tracker.clone(), job.id.clone(), async {
                let live = LIVE.fetch_add(1, Ordering::SeqCst) + 1;
                PEAK.fetch_max(live, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                LIVE.fetch_sub(1, Ordering::SeqCst);
                Ok(None)
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(PEAK.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_job_record_survives_abort() {
        let (_tmp, tracker) = tracker();
        let pool = WorkerPool::new(1);
        let job = tracker.register("create_store", 10, BTreeMap::new()).unwrap();

        let handle = pool.spawn_job(tracker.clone(), job.id.clone(), async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(None)
        });

        // Give the worker a moment to pick the job up, then cancel.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(tracker.cancel(&job.id).unwrap());
        let _ = handle.await; // aborted tasks resolve with a JoinError

        let record = tracker.get(&job.id).unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert!(record.completed_at.is_some());
    }
}
