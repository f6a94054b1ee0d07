use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::models::job::{Job, JobId};
use crate::services::pipeline::Pipeline;
use crate::services::queue::{JobStore, QueueError};

/// Error stored on jobs cut off by shutdown.
pub const SHUTDOWN_ERROR: &str = "worker shut down before the job finished";

/// Error for jobs whose lease was taken away while they ran.
pub const LEASE_LOST_ERROR: &str = "worker lost its lease on the job";

/// Consumes jobs from a [`JobStore`] and runs each through the [`Pipeline`].
///
/// Up to `concurrency` jobs run at once, each in its own task.
pub struct Worker {
    id: String,
    store: Arc<dyn JobStore>,
    pipeline: Arc<Pipeline>,
    config: WorkerConfig,
}

/// Running worker. Dropping the handle does not stop the worker; call
/// [`WorkerHandle::shutdown`].
pub struct WorkerHandle {
    stop_claiming: CancellationToken,
    cancel_jobs: CancellationToken,
    tracker: TaskTracker,
    main: JoinHandle<()>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(store: Arc<dyn JobStore>, pipeline: Arc<Pipeline>, config: WorkerConfig) -> Self {
        Self {
            id: format!("worker-{}", Uuid::new_v4()),
            store,
            pipeline,
            config,
        }
    }

    /// Identifies this worker as the lease holder of the jobs it claims.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spawn the claim loop on the current runtime.
    pub fn start(self) -> WorkerHandle {
        let stop_claiming = CancellationToken::new();
        let cancel_jobs = CancellationToken::new();
        let tracker = TaskTracker::new();
        let config = self.config.clone();

        let worker = Arc::new(self);
        let main = tokio::spawn(worker.run(stop_claiming.clone(), cancel_jobs.clone(), tracker.clone()));

        WorkerHandle {
            stop_claiming,
            cancel_jobs,
            tracker,
            main,
            config,
        }
    }

    async fn run(self: Arc<Self>, stop: CancellationToken, cancel_jobs: CancellationToken, tracker: TaskTracker) {
        tracing::info!(
            worker_id = %self.id,
            concurrency = self.config.concurrency,
            "Worker ready, starting job processing loop"
        );
        let slots = Arc::new(Semaphore::new(self.config.concurrency));
        let mut next_recovery = Instant::now();

        loop {
            if Instant::now() >= next_recovery {
                self.recover_stalled().await;
                next_recovery = Instant::now() + self.config.lease;
            }

            let permit = tokio::select! {
                _ = stop.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Not raced against `stop`: an interrupted claim could strand a job in `active`.
            match self.store.claim_next(&self.id, self.config.lease).await {
                Ok(Some(job)) => {
                    let worker = Arc::clone(&self);
                    let cancel = cancel_jobs.child_token();
                    tracker.spawn(async move {
                        worker.process(job, cancel).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tracing::trace!("No jobs available, sleeping");
                    self.idle(&stop).await;
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Failed to claim job, will retry");
                    self.idle(&stop).await;
                }
            }
        }

        tracker.close();
        tracing::info!("Worker stopped claiming jobs");
    }

    /// Fail jobs whose worker stopped renewing its lease.
    async fn recover_stalled(&self) {
        match self.store.recover_stalled().await {
            Ok(0) => {}
            Ok(n) => tracing::warn!(worker_id = %self.id, recovered = n, "Marked stalled jobs as failed"),
            Err(e) => tracing::error!(worker_id = %self.id, error = %e, "Failed to recover stalled jobs"),
        }
    }

    fn heartbeat_period(&self) -> Duration {
        (self.config.lease / 3).max(Duration::from_millis(10))
    }

    async fn idle(&self, stop: &CancellationToken) {
        tokio::select! {
            _ = stop.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    /// Run one claimed job to a terminal state.
    async fn process(&self, job: Job, cancel: CancellationToken) {
        tracing::info!(
            job_id = %job.id,
            image_id = %job.payload.image_id,
            image_path = %job.payload.image_path,
            "Processing image job"
        );
        let start = Instant::now();

        let span = tracing::info_span!("job", job_id = %job.id, image_id = %job.payload.image_id);
        let run = AssertUnwindSafe(self.pipeline.execute(&job, self.store.as_ref()).instrument(span)).catch_unwind();
        tokio::pin!(run);

        let period = self.heartbeat_period();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break match outcome {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(panic) => Err(format!("pipeline panicked: {}", panic_message(&*panic))),
                },
                _ = cancel.cancelled() => break Err(SHUTDOWN_ERROR.to_string()),
                _ = heartbeat.tick() => match self.store.renew_lease(job.id, &self.id, self.config.lease).await {
                    Ok(()) => {}
                    Err(QueueError::LeaseLost(_)) => break Err(LEASE_LOST_ERROR.to_string()),
                    Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Failed to renew job lease"),
                },
            }
        };

        metrics::histogram!("image_job_processing_seconds").record(start.elapsed().as_secs_f64());

        match outcome {
            Ok(result) => match self.store.complete(job.id, &result).await {
                Ok(()) => {
                    metrics::counter!("image_jobs_completed_total").increment(1);
                    tracing::info!(
                        job_id = %job.id,
                        keywords = result.keywords.len(),
                        images_found = result.images_found,
                        images_saved = result.images_saved.len(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job completed successfully"
                    );
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to mark job completed, failing it instead");
                    self.mark_failed(job.id, &format!("failed to record completion: {e}")).await;
                }
            },
            Err(message) if message == LEASE_LOST_ERROR => {
                tracing::warn!(job_id = %job.id, "Job lease taken over, abandoning it");
            }
            Err(message) => {
                tracing::error!(job_id = %job.id, error = %message, "Job processing failed");
                self.mark_failed(job.id, &message).await;
            }
        }
    }

    /// If this write is lost too, the lease lapses and recovery fails the job.
    async fn mark_failed(&self, id: JobId, message: &str) {
        metrics::counter!("image_jobs_failed_total").increment(1);
        if let Err(e) = self.store.fail(id, message).await {
            tracing::error!(job_id = %id, error = %e, "Failed to mark job failed");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl WorkerHandle {
    /// Stop claiming, give in-flight jobs the grace period, then cancel the rest.
    ///
    /// Cancelled jobs are marked failed; none is left `active`.
    pub async fn shutdown(self) {
        self.stop_claiming.cancel();
        if let Err(e) = self.main.await {
            tracing::error!(error = %e, "Worker loop ended abnormally");
        }
        self.tracker.close();

        let in_flight = self.tracker.len();
        if in_flight > 0 {
            tracing::info!(in_flight, grace = ?self.config.shutdown_grace, "Waiting for in-flight jobs");
        }
        if tokio::time::timeout(self.config.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(in_flight = self.tracker.len(), "Grace period elapsed, cancelling jobs");
            self.cancel_jobs.cancel();
            self.tracker.wait().await;
        }
        tracing::info!("Worker shut down");
    }

    /// Number of jobs currently running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}
