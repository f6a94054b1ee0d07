use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::models::job::{Job, JobId, JobLease, JobPayload, JobProgress, JobResult, JobState};

pub type QueueResult<T> = Result<T, QueueError>;

/// Durable store of jobs shared by the enqueueing side, the worker and status readers.
///
/// Every mutation is atomic per job, and reads return a whole snapshot.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a new `waiting` job and return it without waiting for execution.
    async fn enqueue(&self, payload: JobPayload) -> QueueResult<Job>;

    async fn get_job(&self, id: JobId) -> QueueResult<Option<Job>>;

    /// Move the next waiting job to `active`, leased to `worker` for `lease`.
    async fn claim_next(&self, worker: &str, lease: Duration) -> QueueResult<Option<Job>>;

    /// Push back the lease on a job `worker` still holds.
    ///
    /// Fails with [`QueueError::LeaseLost`] once the job is no longer active
    /// under this worker.
    async fn renew_lease(&self, id: JobId, worker: &str, lease: Duration) -> QueueResult<()>;

    /// Record progress on an active job. Progress never moves backwards.
    async fn update_progress(&self, id: JobId, progress: &JobProgress) -> QueueResult<()>;

    async fn complete(&self, id: JobId, result: &JobResult) -> QueueResult<()>;

    async fn fail(&self, id: JobId, error: &str) -> QueueResult<()>;

    /// Fail active jobs whose lease ran out, i.e. whose worker went away.
    /// Returns how many.
    async fn recover_stalled(&self) -> QueueResult<u64>;

    /// Number of jobs waiting to be claimed.
    async fn queue_depth(&self) -> QueueResult<u64>;

    async fn health_check(&self) -> QueueResult<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Job {0} is no longer held by this worker")]
    LeaseLost(JobId),

    #[error("Corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Default)]
struct MemoryInner {
    jobs: HashMap<JobId, Job>,
    waiting: VecDeque<JobId>,
}

impl MemoryInner {
    fn transition(&mut self, id: JobId, to: JobState) -> QueueResult<&mut Job> {
        let job = self.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if !job.state.can_transition_to(to) {
            return Err(QueueError::InvalidTransition {
                id,
                from: job.state,
                to,
            });
        }
        job.state = to;
        job.updated_at = Utc::now();
        Ok(job)
    }

    fn prune_finished(&mut self, retention: Duration) {
        let now = Utc::now();
        self.jobs.retain(|_, job| {
            !job.state.is_terminal()
                || (now - job.updated_at)
                    .to_std()
                    .map_or(true, |age| age < retention)
        });
    }
}

/// In-process job store. Jobs do not survive a restart.
#[derive(Default)]
pub struct MemoryJobQueue {
    inner: Mutex<MemoryInner>,
    retention: Option<Duration>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop finished jobs once they are older than `retention`.
    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }
}

#[async_trait]
impl JobStore for MemoryJobQueue {
    async fn enqueue(&self, payload: JobPayload) -> QueueResult<Job> {
        let job = Job::new(payload);
        let mut inner = self.inner.lock().await;
        if let Some(retention) = self.retention {
            inner.prune_finished(retention);
        }
        inner.waiting.push_back(job.id);
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn claim_next(&self, worker: &str, lease: Duration) -> QueueResult<Option<Job>> {
        let mut inner = self.inner.lock().await;
        while let Some(id) = inner.waiting.pop_front() {
            match inner.transition(id, JobState::Active) {
                Ok(job) => {
                    job.lease = Some(JobLease::new(worker, job.updated_at, lease));
                    return Ok(Some(job.clone()));
                }
                Err(e) => tracing::warn!(job_id = %id, error = %e, "Skipping unclaimable job"),
            }
        }
        Ok(None)
    }

    async fn renew_lease(&self, id: JobId, worker: &str, lease: Duration) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        let held = job.state == JobState::Active
            && job.lease.as_ref().is_some_and(|l| l.worker == worker);
        if !held {
            return Err(QueueError::LeaseLost(id));
        }
        job.lease = Some(JobLease::new(worker, Utc::now(), lease));
        Ok(())
    }

    async fn update_progress(&self, id: JobId, progress: &JobProgress) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if job.state != JobState::Active {
            return Err(QueueError::InvalidTransition {
                id,
                from: job.state,
                to: JobState::Active,
            });
        }
        if progress.percent >= job.progress.percent {
            job.progress = progress.clone();
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete(&self, id: JobId, result: &JobResult) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.transition(id, JobState::Completed)?;
        job.result = Some(result.clone());
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.transition(id, JobState::Failed)?;
        job.error = Some(error.to_string());
        Ok(())
    }

    async fn recover_stalled(&self) -> QueueResult<u64> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut recovered = 0;
        let abandoned = |job: &&mut Job| {
            job.state == JobState::Active && job.lease.as_ref().map_or(true, |l| l.is_expired(now))
        };
        for job in inner.jobs.values_mut().filter(abandoned) {
            job.state = JobState::Failed;
            job.error = Some(STALLED_ERROR.to_string());
            job.updated_at = now;
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn queue_depth(&self) -> QueueResult<u64> {
        Ok(self.inner.lock().await.waiting.len() as u64)
    }

    async fn health_check(&self) -> QueueResult<()> {
        Ok(())
    }
}

/// Error recorded on jobs recovered by [`JobStore::recover_stalled`].
pub const STALLED_ERROR: &str = "job was active when its worker stopped";
