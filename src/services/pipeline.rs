//! The fixed image processing pipeline.
//!
//! One job runs four stages strictly in order:
//!
//! 1. `tagging`: derive keywords for the uploaded file (degrades to none)
//! 2. `persist_keywords`: attach them to the image record (fatal on error)
//! 3. `search`: look up related images by keyword (degrades to none)
//! 4. `fetch`: download each result (failures are logged and skipped)

use serde::Deserialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::StageTimeouts;
use crate::models::image::Keyword;
use crate::models::job::{Job, JobId, JobProgress, JobResult, PipelineStage};
use crate::services::fetcher::{FetchError, ImageFetch};
use crate::services::outcome::ServiceOutcome;
use crate::services::queue::JobStore;
use crate::services::records::{ImageRecordGateway, RecordError};
use crate::services::search::ImageSearch;
use crate::services::tagging::KeywordTagger;

const TAGGED_PERCENT: u8 = 25;
const PERSISTED_PERCENT: u8 = 50;
const SEARCHED_PERCENT: u8 = 60;

/// How downloaded search results are named on disk.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadNaming {
    /// `{image_id}-{index}.jpg`: every result is kept.
    #[default]
    PerResult,
    /// `{image_id}.jpg` for every result: each download replaces the previous
    /// one and only the last survives.
    Overwrite,
}

impl DownloadNaming {
    pub fn target_path(self, dir: &Path, image_id: Uuid, index: usize) -> PathBuf {
        match self {
            DownloadNaming::PerResult => dir.join(format!("{image_id}-{index}.jpg")),
            DownloadNaming::Overwrite => dir.join(format!("{image_id}.jpg")),
        }
    }
}

/// The external collaborators a pipeline run talks to.
pub struct Pipeline {
    tagger: Arc<dyn KeywordTagger>,
    records: Arc<dyn ImageRecordGateway>,
    search: Arc<dyn ImageSearch>,
    fetcher: Arc<dyn ImageFetch>,
    download_dir: PathBuf,
    naming: DownloadNaming,
    timeouts: StageTimeouts,
}

impl Pipeline {
    pub fn new(
        tagger: Arc<dyn KeywordTagger>,
        records: Arc<dyn ImageRecordGateway>,
        search: Arc<dyn ImageSearch>,
        fetcher: Arc<dyn ImageFetch>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tagger,
            records,
            search,
            fetcher,
            download_dir: download_dir.into(),
            naming: DownloadNaming::default(),
            timeouts: StageTimeouts::default(),
        }
    }

    pub fn with_naming(mut self, naming: DownloadNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Run every stage for `job`, reporting progress to `store` as stages finish.
    ///
    /// Only a failed keyword write (or its timeout) returns an error.
    pub async fn execute(&self, job: &Job, store: &dyn JobStore) -> Result<JobResult, PipelineError> {
        let image_id = job.payload.image_id;
        let mut run = JobResult::default();

        let tagging = self
            .bounded(
                PipelineStage::Tagging,
                self.timeouts.tagging,
                self.tagger.extract_keywords(Path::new(&job.payload.image_path)),
            )
            .await;
        let keywords = self.settle(job.id, PipelineStage::Tagging, tagging, &mut run);
        run.keywords = keywords.iter().map(|k| k.label().to_string()).collect();
        report(store, job.id, PipelineStage::Tagging, TAGGED_PERCENT).await;

        self.persist_keywords(image_id, &keywords).await?;
        report(store, job.id, PipelineStage::PersistKeywords, PERSISTED_PERCENT).await;

        let query = run.keywords.join(" ");
        let search = self
            .bounded(PipelineStage::Search, self.timeouts.search, self.search.search(&query))
            .await;
        let urls = self.settle(job.id, PipelineStage::Search, search, &mut run);
        run.images_found = urls.len();
        report(store, job.id, PipelineStage::Search, SEARCHED_PERCENT).await;

        for (index, url) in urls.iter().enumerate() {
            let target = self.naming.target_path(&self.download_dir, image_id, index);
            match self.fetch_one(url, &target).await {
                Ok(bytes) => {
                    tracing::info!(job_id = %job.id, url = %url, path = %target.display(), bytes, "Related image saved");
                    run.images_saved.push(target.display().to_string());
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, url = %url, error = %e, "Related image download failed, skipping");
                    metrics::counter!("image_fetch_failures_total").increment(1);
                }
            }
            let percent = SEARCHED_PERCENT as usize
                + (100 - SEARCHED_PERCENT as usize) * (index + 1) / urls.len();
            report(store, job.id, PipelineStage::Fetch, percent as u8).await;
        }
        run.images_saved.dedup();

        if urls.is_empty() {
            report(store, job.id, PipelineStage::Fetch, 100).await;
        }

        Ok(run)
    }

    /// Apply a stage timeout to a best-effort call; expiry degrades the stage.
    async fn bounded<T>(
        &self,
        stage: PipelineStage,
        limit: Duration,
        call: impl Future<Output = ServiceOutcome<T>>,
    ) -> ServiceOutcome<T> {
        match timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => ServiceOutcome::degraded(format!("{stage} timed out after {limit:?}")),
        }
    }

    /// Unwrap a best-effort outcome, recording the stage when it degraded.
    fn settle<T>(
        &self,
        job_id: JobId,
        stage: PipelineStage,
        outcome: ServiceOutcome<T>,
        run: &mut JobResult,
    ) -> Vec<T> {
        if let ServiceOutcome::Degraded { reason } = &outcome {
            tracing::warn!(job_id = %job_id, stage = %stage, reason = %reason, "Stage degraded to empty result");
            metrics::counter!("image_pipeline_degraded_total", "stage" => stage.to_string()).increment(1);
            run.degraded_stages.push(stage);
        }
        outcome.into_items()
    }

    async fn persist_keywords(&self, image_id: Uuid, keywords: &[Keyword]) -> Result<(), PipelineError> {
        let limit = self.timeouts.persist;
        match timeout(limit, self.records.update_keywords(image_id, keywords)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(source)) => Err(PipelineError::Persist { image_id, source }),
            Err(_) => Err(PipelineError::Timeout {
                stage: PipelineStage::PersistKeywords,
                after: limit,
            }),
        }
    }

    async fn fetch_one(&self, url: &str, target: &Path) -> Result<u64, FetchError> {
        let limit = self.timeouts.fetch;
        match timeout(limit, self.fetcher.fetch(url, target)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(limit)),
        }
    }
}

/// Progress is advisory; a failed write is logged and the run continues.
async fn report(store: &dyn JobStore, job_id: JobId, stage: PipelineStage, percent: u8) {
    let progress = JobProgress {
        percent,
        stage: Some(stage),
    };
    if let Err(e) = store.update_progress(job_id, &progress).await {
        tracing::warn!(job_id = %job_id, stage = %stage, error = %e, "Failed to record progress");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to persist keywords for image {image_id}: {source}")]
    Persist {
        image_id: Uuid,
        #[source]
        source: RecordError,
    },

    #[error("{stage} stage timed out after {after:?}")]
    Timeout { stage: PipelineStage, after: Duration },
}
