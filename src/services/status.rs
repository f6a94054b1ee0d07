use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::JobStatusResponse;
use crate::services::queue::{JobStore, QueueResult};

/// Read-only view of job state for external callers.
#[derive(Clone)]
pub struct JobStatusReader {
    store: Arc<dyn JobStore>,
}

impl JobStatusReader {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Current status of `id`.
    ///
    /// Unknown and malformed ids both yield the `"not found"` response; only
    /// store failures are errors.
    pub async fn status(&self, id: &str) -> QueueResult<JobStatusResponse> {
        let Ok(job_id) = Uuid::parse_str(id) else {
            return Ok(JobStatusResponse::not_found());
        };

        Ok(match self.store.get_job(job_id).await? {
            Some(job) => job.into(),
            None => JobStatusResponse::not_found(),
        })
    }
}
