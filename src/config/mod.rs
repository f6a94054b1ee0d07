use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::pipeline::DownloadNaming;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string for image records
    pub database_url: String,

    /// Redis host backing the job queue
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// Name of the job queue; prefixes every Redis key
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Imagga API key (basic auth username)
    pub imagga_api_key: String,

    /// Imagga API secret (basic auth password)
    pub imagga_api_secret: String,

    #[serde(default = "default_imagga_base_url")]
    pub imagga_base_url: String,

    /// Unsplash access key, sent as `client_id`
    pub unsplash_access_key: String,

    #[serde(default = "default_unsplash_base_url")]
    pub unsplash_base_url: String,

    /// Where uploaded images are written
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Where related images found by the pipeline are written
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    #[serde(default)]
    pub download_naming: DownloadNaming,

    /// Number of jobs a worker runs at once
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    #[serde(default = "default_tagging_timeout")]
    pub tagging_timeout_secs: u64,

    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_persist_timeout")]
    pub persist_timeout_secs: u64,

    /// How long shutdown waits for in-flight jobs before cancelling them
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// How long a claimed job stays owned by its worker without a heartbeat
    #[serde(default = "default_worker_lease")]
    pub worker_lease_secs: u64,

    /// How long finished jobs stay queryable; 0 keeps them forever
    #[serde(default = "default_job_retention")]
    pub job_retention_secs: u64,

    /// Run a worker inside the HTTP server process
    #[serde(default = "default_embedded_worker")]
    pub embedded_worker: bool,
}

/// Settings consumed by the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    /// Claimed jobs are renewed every third of this; a job whose lease runs
    /// out is treated as abandoned.
    pub lease: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_worker_concurrency(),
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            shutdown_grace: Duration::from_secs(default_shutdown_grace()),
            lease: Duration::from_secs(default_worker_lease()),
        }
    }
}

/// Upper bounds for each external call made by the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub tagging: Duration,
    pub persist: Duration,
    pub search: Duration,
    pub fetch: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            tagging: Duration::from_secs(default_tagging_timeout()),
            persist: Duration::from_secs(default_persist_timeout()),
            search: Duration::from_secs(default_search_timeout()),
            fetch: Duration::from_secs(default_fetch_timeout()),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_queue_name() -> String {
    "image-processing".to_string()
}

fn default_imagga_base_url() -> String {
    "https://api.imagga.com".to_string()
}

fn default_unsplash_base_url() -> String {
    "https://api.unsplash.com".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./images")
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_tagging_timeout() -> u64 {
    30
}

fn default_search_timeout() -> u64 {
    15
}

fn default_fetch_timeout() -> u64 {
    60
}

fn default_persist_timeout() -> u64 {
    10
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_worker_lease() -> u64 {
    60
}

fn default_job_retention() -> u64 {
    24 * 60 * 60
}

fn default_embedded_worker() -> bool {
    true
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Connection URL for the Redis queue backend.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            concurrency: self.worker_concurrency.max(1),
            poll_interval: Duration::from_millis(self.worker_poll_interval_ms),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            lease: Duration::from_secs(self.worker_lease_secs.max(1)),
        }
    }

    /// Retention for finished jobs, `None` when they are kept forever.
    pub fn job_retention(&self) -> Option<Duration> {
        (self.job_retention_secs > 0).then(|| Duration::from_secs(self.job_retention_secs))
    }

    pub fn stage_timeouts(&self) -> StageTimeouts {
        StageTimeouts {
            tagging: Duration::from_secs(self.tagging_timeout_secs),
            persist: Duration::from_secs(self.persist_timeout_secs),
            search: Duration::from_secs(self.search_timeout_secs),
            fetch: Duration::from_secs(self.fetch_timeout_secs),
        }
    }
}
