use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};
use uuid::Uuid;

pub type JobId = Uuid;

/// Queue-level state of an image processing job.
///
/// States only move forward: `Waiting -> Active -> Completed | Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Waiting, JobState::Active)
                | (JobState::Active, JobState::Completed)
                | (JobState::Active, JobState::Failed)
        )
    }
}

/// The four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineStage {
    Tagging,
    PersistKeywords,
    Search,
    Fetch,
}

/// Work item data; never changes after enqueue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub image_path: String,
    pub image_id: Uuid,
}

/// Forward progress reported by the worker while a job runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobProgress {
    pub percent: u8,
    /// Last stage that finished, if any.
    pub stage: Option<PipelineStage>,
}

/// Summary stored on a completed job. The keywords themselves live on the
/// image record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub keywords: Vec<String>,
    pub images_found: usize,
    pub images_saved: Vec<String>,
    pub degraded_stages: Vec<PipelineStage>,
}

/// Snapshot of a job as held by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub payload: JobPayload,
    pub state: JobState,
    pub progress: JobProgress,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    /// Set while a worker holds the job.
    pub lease: Option<JobLease>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ownership of an active job by one worker, valid until `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobLease {
    pub worker: String,
    pub expires_at: DateTime<Utc>,
}

impl JobLease {
    pub fn new(worker: &str, now: DateTime<Utc>, duration: Duration) -> Self {
        let expires_at = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            worker: worker.to_string(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl Job {
    pub fn new(payload: JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payload,
            state: JobState::Waiting,
            progress: JobProgress::default(),
            result: None,
            error: None,
            lease: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Response for querying job status.
///
/// Unknown ids produce `{"status": "not found"}` with no other fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub const NOT_FOUND_STATUS: &str = "not found";

impl JobStatusResponse {
    pub fn not_found() -> Self {
        Self {
            status: NOT_FOUND_STATUS.to_string(),
            progress: None,
            result: None,
            error: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == NOT_FOUND_STATUS
    }
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            status: job.state.to_string(),
            progress: Some(job.progress),
            result: job.result,
            error: job.error,
        }
    }
}
