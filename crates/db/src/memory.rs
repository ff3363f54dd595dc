//! In-process [`JobStore`] used by tests and local runs without PostgreSQL.
//!
//! Applies the same guards as [`crate::repositories::PgJobStore`]: terminal
//! rows are never rewritten.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use epdd_core::types::{JobId, Timestamp};
use tokio::sync::RwLock;

use crate::models::job::{Job, JobFilter, JobPage, JobStats, NewJob};
use crate::models::status::JobStatus;
use crate::store::{JobStore, StoreError};

struct Entry {
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    jobs: HashMap<JobId, Entry>,
}

#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
    offline: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Overwrite a job's `updated_at`, e.g. to age it past the zombie window.
    pub async fn backdate(&self, job_id: &str, updated_at: Timestamp) -> bool {
        let mut inner = self.inner.write().await;
        match inner.jobs.get_mut(job_id) {
            Some(entry) => {
                entry.job.updated_at = updated_at;
                true
            }
            None => false,
        }
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }

    /// Apply `update` to a non-terminal job. Returns whether it applied.
    async fn guarded<F>(&self, job_id: &str, update: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Job),
    {
        self.check_online()?;
        let mut inner = self.inner.write().await;
        match inner.jobs.get_mut(job_id) {
            Some(entry) if !entry.job.status.is_terminal() => {
                update(&mut entry.job);
                entry.job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &NewJob) -> Result<Job, StoreError> {
        self.check_online()?;
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.job_id) {
            return Err(StoreError::Duplicate(job.job_id.clone()));
        }

        let now = Utc::now();
        let row = Job {
            job_id: job.job_id.clone(),
            scheme_code: job.scheme_code.clone(),
            user_id: job.user_id.clone(),
            status: JobStatus::Pending,
            progress: 0,
            data_ref: job.data_ref.clone(),
            params: job.params.clone(),
            result_summary: None,
            error_log: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            row.job_id.clone(),
            Entry {
                seq,
                job: row.clone(),
            },
        );
        Ok(row)
    }

    async fn find(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        self.check_online()?;
        let inner = self.inner.read().await;
        Ok(inner.jobs.get(job_id).map(|entry| entry.job.clone()))
    }

    async fn update_progress(&self, job_id: &str, percentage: i32) -> Result<bool, StoreError> {
        self.guarded(job_id, |job| {
            job.progress = percentage.clamp(0, 100);
            job.status = JobStatus::Running;
        })
        .await
    }

    async fn finish(&self, job_id: &str, result: &serde_json::Value) -> Result<bool, StoreError> {
        self.guarded(job_id, |job| {
            job.status = JobStatus::Success;
            job.progress = 100;
            job.result_summary = Some(result.clone());
            job.finished_at = Some(Utc::now());
        })
        .await
    }

    async fn fail(&self, job_id: &str, error_log: &str) -> Result<bool, StoreError> {
        self.guarded(job_id, |job| {
            job.status = JobStatus::Failed;
            job.error_log = Some(error_log.to_string());
            job.finished_at = Some(Utc::now());
        })
        .await
    }

    async fn cancel(&self, job_id: &str, reason: &str) -> Result<bool, StoreError> {
        self.guarded(job_id, |job| {
            job.status = JobStatus::Cancelled;
            job.error_log = Some(reason.to_string());
            job.finished_at = Some(Utc::now());
        })
        .await
    }

    async fn list(&self, filter: &JobFilter) -> Result<JobPage, StoreError> {
        self.check_online()?;
        let inner = self.inner.read().await;
        let mut matching: Vec<&Entry> = inner
            .jobs
            .values()
            .filter(|entry| filter.matches(&entry.job))
            .collect();
        // Newest first, matching `ORDER BY created_at DESC`.
        matching.sort_by(|a, b| {
            b.job
                .created_at
                .cmp(&a.job.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.page_size() as usize)
            .map(|entry| entry.job.clone())
            .collect();
        Ok(JobPage::new(items, total, filter))
    }

    async fn fail_stale_running(
        &self,
        cutoff: Timestamp,
        error_log: &str,
    ) -> Result<Vec<JobId>, StoreError> {
        self.check_online()?;
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut failed = Vec::new();
        for entry in inner.jobs.values_mut() {
            let job = &mut entry.job;
            if job.status == JobStatus::Running && job.updated_at < cutoff {
                job.status = JobStatus::Failed;
                job.error_log = Some(error_log.to_string());
                job.finished_at = Some(now);
                job.updated_at = now;
                failed.push(job.job_id.clone());
            }
        }
        Ok(failed)
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        self.check_online()?;
        let inner = self.inner.read().await;
        let mut counts: HashMap<JobStatus, i64> = HashMap::new();
        let mut durations = Vec::new();
        for entry in inner.jobs.values() {
            let job = &entry.job;
            *counts.entry(job.status).or_default() += 1;
            if job.status == JobStatus::Success {
                if let Some(finished) = job.finished_at {
                    durations.push((finished - job.created_at).num_milliseconds() as f64 / 1000.0);
                }
            }
        }
        let avg = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };
        Ok(JobStats::from_counts(counts, avg))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }
}
