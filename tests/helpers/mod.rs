//! Test doubles and polling helpers for worker and API tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use uuid::Uuid;

use image_keyword_worker::config::WorkerConfig;
use image_keyword_worker::models::image::{ImageRecord, Keyword, NewImage};
use image_keyword_worker::models::job::{Job, JobId, JobPayload, JobProgress, JobResult, JobState};
use image_keyword_worker::services::fetcher::{FetchError, ImageFetch};
use image_keyword_worker::services::outcome::ServiceOutcome;
use image_keyword_worker::services::queue::{JobStore, MemoryJobQueue, QueueError, QueueResult};
use image_keyword_worker::services::records::{ImageRecordGateway, RecordError};
use image_keyword_worker::services::search::ImageSearch;
use image_keyword_worker::services::tagging::KeywordTagger;

/// Tagger returning a fixed outcome, optionally after a delay.
pub struct FakeTagger {
    outcome: ServiceOutcome<Keyword>,
    delay: Option<Duration>,
    panics: bool,
}

impl FakeTagger {
    pub fn returning(keywords: Vec<Keyword>) -> Arc<Self> {
        Arc::new(Self {
            outcome: ServiceOutcome::Ok(keywords),
            delay: None,
            panics: false,
        })
    }

    pub fn unavailable(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: ServiceOutcome::degraded(reason),
            delay: None,
            panics: false,
        })
    }

    pub fn slow(keywords: Vec<Keyword>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcome: ServiceOutcome::Ok(keywords),
            delay: Some(delay),
            panics: false,
        })
    }

    pub fn panicking() -> Arc<Self> {
        Arc::new(Self {
            outcome: ServiceOutcome::Ok(Vec::new()),
            delay: None,
            panics: true,
        })
    }
}

#[async_trait]
impl KeywordTagger for FakeTagger {
    async fn extract_keywords(&self, _image_path: &Path) -> ServiceOutcome<Keyword> {
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        if self.panics {
            panic!("tagger exploded");
        }
        self.outcome.clone()
    }
}

/// Search returning fixed URLs and remembering every query.
pub struct FakeSearch {
    outcome: ServiceOutcome<String>,
    queries: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
}

impl FakeSearch {
    pub fn returning(urls: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            outcome: ServiceOutcome::Ok(urls.iter().map(|u| u.to_string()).collect()),
            queries: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    pub fn unavailable(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: ServiceOutcome::degraded(reason),
            queries: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    /// Holds every search until `gate` is notified.
    pub fn gated(urls: &[&str], gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            outcome: ServiceOutcome::Ok(urls.iter().map(|u| u.to_string()).collect()),
            queries: Mutex::new(Vec::new()),
            gate: Some(gate),
        })
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageSearch for FakeSearch {
    async fn search(&self, query: &str) -> ServiceOutcome<String> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.outcome.clone()
    }
}

/// In-memory image records. Keyword writes for ids in `failing` are refused.
#[derive(Default)]
pub struct FakeRecords {
    images: Mutex<HashMap<Uuid, ImageRecord>>,
    failing: Mutex<HashSet<Uuid>>,
}

impl FakeRecords {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_updates_for(&self, image_id: Uuid) {
        self.failing.lock().unwrap().insert(image_id);
    }

    pub fn keywords_for(&self, image_id: Uuid) -> Option<Vec<Keyword>> {
        self.images
            .lock()
            .unwrap()
            .get(&image_id)
            .map(|r| r.keywords.clone())
    }

    pub fn count(&self) -> usize {
        self.images.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageRecordGateway for FakeRecords {
    async fn create(&self, image: &NewImage) -> Result<ImageRecord, RecordError> {
        let now = Utc::now();
        let record = ImageRecord {
            id: Uuid::new_v4(),
            filename: image.filename.clone(),
            mimetype: image.mimetype.clone(),
            path: image.path.clone(),
            size: image.size as i64,
            keywords: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.images.lock().unwrap().insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_keywords(&self, image_id: Uuid, keywords: &[Keyword]) -> Result<ImageRecord, RecordError> {
        if self.failing.lock().unwrap().contains(&image_id) {
            return Err(RecordError::NotFound(image_id));
        }
        let mut images = self.images.lock().unwrap();
        let record = images.get_mut(&image_id).ok_or(RecordError::NotFound(image_id))?;
        record.keywords = keywords.to_vec();
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn health_check(&self) -> Result<(), RecordError> {
        Ok(())
    }
}

/// Fetcher that writes the URL text to the target instead of downloading.
#[derive(Default)]
pub struct EchoFetcher {
    pub fetched: Mutex<Vec<(String, PathBuf)>>,
    gate: Option<Arc<Notify>>,
}

impl EchoFetcher {
    /// Holds every fetch until `gate` is notified.
    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            fetched: Mutex::new(Vec::new()),
            gate: Some(gate),
        })
    }
}

#[async_trait]
impl ImageFetch for EchoFetcher {
    async fn fetch(&self, url: &str, target: &Path) -> Result<u64, FetchError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(target, url.as_bytes()).await?;
        self.fetched
            .lock()
            .unwrap()
            .push((url.to_string(), target.to_path_buf()));
        Ok(url.len() as u64)
    }
}

/// Memory store whose `complete` always fails, as if the backend dropped
/// the connection at acknowledgement time.
#[derive(Default)]
pub struct UnackableStore {
    inner: MemoryJobQueue,
}

#[async_trait]
impl JobStore for UnackableStore {
    async fn enqueue(&self, payload: JobPayload) -> QueueResult<Job> {
        self.inner.enqueue(payload).await
    }

    async fn get_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        self.inner.get_job(id).await
    }

    async fn claim_next(&self, worker: &str, lease: Duration) -> QueueResult<Option<Job>> {
        self.inner.claim_next(worker, lease).await
    }

    async fn renew_lease(&self, id: JobId, worker: &str, lease: Duration) -> QueueResult<()> {
        self.inner.renew_lease(id, worker, lease).await
    }

    async fn update_progress(&self, id: JobId, progress: &JobProgress) -> QueueResult<()> {
        self.inner.update_progress(id, progress).await
    }

    async fn complete(&self, _id: JobId, _result: &JobResult) -> QueueResult<()> {
        Err(QueueError::Redis(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection reset",
        ))))
    }

    async fn fail(&self, id: JobId, error: &str) -> QueueResult<()> {
        self.inner.fail(id, error).await
    }

    async fn recover_stalled(&self) -> QueueResult<u64> {
        self.inner.recover_stalled().await
    }

    async fn queue_depth(&self) -> QueueResult<u64> {
        self.inner.queue_depth().await
    }

    async fn health_check(&self) -> QueueResult<()> {
        Ok(())
    }
}

/// Worker settings tuned for tests: fast polling, short grace period.
pub fn test_worker_config(concurrency: usize) -> WorkerConfig {
    WorkerConfig {
        concurrency,
        poll_interval: Duration::from_millis(10),
        shutdown_grace: Duration::from_secs(5),
        lease: Duration::from_secs(5),
    }
}

/// Create an image record and enqueue a job for it.
pub async fn enqueue_image(store: &dyn JobStore, records: &FakeRecords) -> Job {
    let record = records
        .create(&NewImage {
            filename: "1718000000000.png".to_string(),
            mimetype: "image/png".to_string(),
            path: "uploads/1718000000000.png".to_string(),
            size: 67,
        })
        .await
        .expect("create record");

    store
        .enqueue(JobPayload {
            image_path: record.path.clone(),
            image_id: record.id,
        })
        .await
        .expect("enqueue")
}

/// Poll until the job reaches `completed` or `failed` (5 second timeout).
pub async fn wait_for_terminal(store: &dyn JobStore, id: JobId) -> Job {
    for _ in 0..500 {
        let job = store.get_job(id).await.expect("get job").expect("job exists");
        if job.state.is_terminal() {
            return job;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not finish within 5 seconds");
}

/// Poll until the job's progress reaches at least `percent`.
pub async fn wait_for_progress(store: &dyn JobStore, id: JobId, percent: u8) -> Job {
    for _ in 0..500 {
        let job = store.get_job(id).await.expect("get job").expect("job exists");
        if job.progress.percent >= percent {
            return job;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached {percent}% progress");
}

/// Poll until the job has been claimed.
pub async fn wait_until_active(store: &dyn JobStore, id: JobId) {
    for _ in 0..500 {
        let job = store.get_job(id).await.expect("get job").expect("job exists");
        if job.state != JobState::Waiting {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} was never claimed");
}
