//! Job entity model and DTOs.

use std::collections::BTreeMap;

use epdd_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::JobStatus;

/// Maximum page size for job listing.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Default page size for job listing.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// A row from the `algo_jobs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Job {
    pub job_id: JobId,
    pub scheme_code: String,
    pub user_id: String,
    #[sqlx(rename = "status_id")]
    pub status: JobStatus,
    pub progress: i32,
    pub data_ref: String,
    pub params: serde_json::Value,
    pub result_summary: Option<serde_json::Value>,
    pub error_log: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

/// Insert DTO for a new PENDING job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: JobId,
    pub scheme_code: String,
    pub user_id: String,
    pub data_ref: String,
    pub params: serde_json::Value,
}

/// Filters and offset pagination for listing jobs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub user_id: Option<String>,
    pub status: Option<JobStatus>,
    /// 1-based page number. Defaults to 1.
    pub page: Option<i64>,
    /// Defaults to 20, capped at 100.
    pub page_size: Option<i64>,
}

impl JobFilter {
    /// Effective page number, never below 1.
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    /// Effective page size in `1..=MAX_PAGE_SIZE`.
    pub fn page_size(&self) -> i64 {
        match self.page_size {
            Some(size) if size >= 1 => size.min(MAX_PAGE_SIZE),
            _ => DEFAULT_PAGE_SIZE,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.page_size()
    }

    /// Whether a job passes the submitter and status filters.
    pub fn matches(&self, job: &Job) -> bool {
        let user_ok = match self.user_id.as_deref() {
            Some(user) if !user.is_empty() => job.user_id == user,
            _ => true,
        };
        let status_ok = self.status.map_or(true, |status| job.status == status);
        user_ok && status_ok
    }
}

/// One page of jobs plus pagination totals.
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub items: Vec<Job>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub pages: i64,
}

impl JobPage {
    pub fn new(items: Vec<Job>, total: i64, filter: &JobFilter) -> Self {
        let page_size = filter.page_size();
        Self {
            items,
            total,
            page: filter.page(),
            page_size,
            pages: (total + page_size - 1) / page_size,
        }
    }
}

/// Aggregate counts for the stats endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobStats {
    /// Job count per status name. Statuses with no jobs report zero.
    pub status_counts: BTreeMap<String, i64>,
    pub total: i64,
    /// Mean `finished_at - created_at` over successful jobs.
    pub avg_duration_seconds: f64,
}

impl JobStats {
    pub fn from_counts(counts: impl IntoIterator<Item = (JobStatus, i64)>, avg: f64) -> Self {
        let mut status_counts: BTreeMap<String, i64> = JobStatus::ALL
            .iter()
            .map(|status| (status.as_str().to_string(), 0))
            .collect();
        let mut total = 0;
        for (status, count) in counts {
            *status_counts.entry(status.as_str().to_string()).or_default() += count;
            total += count;
        }
        Self {
            status_counts,
            total,
            avg_duration_seconds: avg,
        }
    }
}
