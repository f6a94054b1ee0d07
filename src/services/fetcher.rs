use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Streams a remote image to a local file.
#[async_trait]
pub trait ImageFetch: Send + Sync {
    /// Write the body of `url` to `target`, returning the number of bytes written.
    ///
    /// On error no file is left at `target` from this call.
    async fn fetch(&self, url: &str, target: &Path) -> Result<u64, FetchError>;
}

/// HTTP image downloader.
///
/// The body is written to `<target>.part` and only renamed onto `target`
/// after it has been flushed and synced, so readers never see a torn file.
pub struct HttpImageFetcher {
    http: Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(concat!("image-keyword-worker/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    async fn stream_to(&self, url: &str, path: &Path) -> Result<u64, FetchError> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

/// Sibling path used while a download is in flight.
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[async_trait]
impl ImageFetch for HttpImageFetcher {
    async fn fetch(&self, url: &str, target: &Path) -> Result<u64, FetchError> {
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let partial = PartialFile::new(partial_path(target));
        let written = self.stream_to(url, &partial.path).await?;
        tokio::fs::rename(&partial.path, target).await?;
        partial.committed();

        tracing::debug!(url = %url, path = %target.display(), bytes = written, "Image saved");
        Ok(written)
    }
}

/// Removes an in-flight download unless it was committed, including when the
/// fetch future is dropped mid-stream.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn committed(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove partial download");
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Download request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to write image: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download timed out after {0:?}")]
    Timeout(Duration),
}
