// Segment Fetcher: downloads a single segment to disk with retry and size verification.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};
use crate::session::HttpSession;
use crate::{Result, RewindError};

/// One segment to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentJob {
    pub sequence: u64,
    pub url: String,
    pub path: PathBuf,
}

#[derive(Clone)]
pub struct SegmentFetcher {
    session: HttpSession,
    gate: Arc<Semaphore>,
    policy: RetryPolicy,
    timeout: Duration,
    token: CancellationToken,
}

impl SegmentFetcher {
    pub fn new(
        session: HttpSession,
        gate: Arc<Semaphore>,
        policy: RetryPolicy,
        timeout: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            session,
            gate,
            policy,
            timeout,
            token,
        }
    }

    /// Download `job` holding one slot of the concurrency gate for all attempts.
    /// Returns the number of bytes on disk.
    pub async fn download(&self, job: &SegmentJob) -> Result<u64> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| RewindError::Cancelled)?;

        retry_with_backoff(&self.policy, &self.token, |attempt| async move {
            if attempt > 0 && self.session.is_rotating() {
                self.session.refresh_credentials().await;
            }
            self.attempt(job).await
        })
        .await
    }

    async fn attempt(&self, job: &SegmentJob) -> RetryAction<u64> {
        let response = match self.session.get(&job.url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(e) => return RetryAction::Retry(e.into()),
        };
        if response.status() != StatusCode::OK {
            return RetryAction::Retry(RewindError::http_status(
                response.status(),
                &job.url,
                "segment download",
            ));
        }
        let expected = match response.content_length() {
            Some(len) if len > 0 => len,
            _ => {
                return RetryAction::Retry(RewindError::segment_download(
                    &job.url,
                    "server advertised an empty body",
                ));
            }
        };

        if let Ok(meta) = tokio::fs::metadata(&job.path).await {
            if meta.len() == expected {
                debug!(path = %job.path.display(), "Segment already on disk");
                return RetryAction::Success(expected);
            }
            warn!(
                path = %job.path.display(),
                local = meta.len(),
                remote = expected,
                "Size mismatch with existing file, downloading again"
            );
        }

        match write_body(response, &job.path).await {
            Ok(written) if written == expected => {
                info!(sequence = job.sequence, bytes = written, "Segment downloaded");
                RetryAction::Success(written)
            }
            Ok(written) => {
                remove_partial(&job.path).await;
                RetryAction::Retry(RewindError::segment_download(
                    &job.url,
                    format!("received {written} of {expected} bytes"),
                ))
            }
            Err(e) => {
                remove_partial(&job.path).await;
                RetryAction::Retry(e)
            }
        }
    }
}

/// Fetch an auxiliary resource (key, init segment) without size checks.
/// An existing file is kept as is.
pub async fn download_resource(
    session: &HttpSession,
    url: &str,
    path: &Path,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<u64> {
    if let Ok(meta) = tokio::fs::metadata(path).await {
        debug!(path = %path.display(), "Resource already on disk");
        return Ok(meta.len());
    }
    let policy = RetryPolicy::default();
    let bytes = retry_with_backoff(&policy, token, |_| async move {
        match session.fetch_bytes(url, timeout).await {
            Ok(bytes) => RetryAction::Success(bytes),
            Err(e) if e.is_retryable() => RetryAction::Retry(e),
            Err(e) => RetryAction::Fail(e),
        }
    })
    .await?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, &bytes).await?;
    info!(url, path = %path.display(), bytes = bytes.len(), "Resource downloaded");
    Ok(bytes.len() as u64)
}

async fn write_body(response: reqwest::Response, path: &Path) -> Result<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove partial segment");
    }
}
