//! Handoff of a finished mission to a stream-copy muxer.
//!
//! The fragment directory is exposed over HTTP on a free local port and the
//! muxer reads the reconstructed manifest from there. Only one mission merges
//! at a time; the lock is shared by every mission of a process.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::output::LOCAL_MANIFEST;
use crate::{Result, RewindError};

/// Serialises the merge stage across missions.
pub type MergeLock = Arc<Mutex<()>>;

pub fn merge_lock() -> MergeLock {
    Arc::new(Mutex::new(()))
}

#[async_trait]
pub trait Merger: Send + Sync {
    /// Turn the manifest and segments in `fragments` into the single file `output`.
    async fn merge(&self, fragments: &Path, output: &Path) -> Result<()>;
}

/// Static file server over one directory, bound to `127.0.0.1` on a free port.
pub struct FileServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

impl FileServer {
    pub async fn serve(dir: &Path) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = Router::new().fallback_service(ServeDir::new(dir));
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });
        info!(%addr, dir = %dir.display(), "File server started");
        Ok(Self {
            addr,
            shutdown,
            handle,
        })
    }

    pub fn url(&self, file: &str) -> String {
        format!("http://{}/{file}", self.addr)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        match self.handle.await {
            Ok(Ok(())) => debug!(addr = %self.addr, "File server stopped"),
            Ok(Err(e)) => warn!(error = %e, "File server exited with error"),
            Err(e) => warn!(error = %e, "File server task failed"),
        }
    }
}

/// Runs `<tool> -i http://127.0.0.1:<port>/media.m3u8 -c copy <output>`.
#[derive(Debug, Clone)]
pub struct FfmpegMerger {
    tool: PathBuf,
}

impl FfmpegMerger {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    async fn run_tool(&self, input: &str, output: &Path) -> Result<()> {
        let mut child = Command::new(&self.tool)
            .args(["-analyzeduration", "100M", "-probesize", "50M", "-i", input])
            .args(["-c", "copy"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RewindError::merge(format!("cannot start {}: {e}", self.tool.display())))?;

        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            while let Some(line) = lines.next_line().await? {
                debug!(target: "rewind::muxer", "{line}");
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(RewindError::merge(format!(
                "{} exited with {status}",
                self.tool.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Merger for FfmpegMerger {
    async fn merge(&self, fragments: &Path, output: &Path) -> Result<()> {
        let server = FileServer::serve(fragments).await?;
        let input = server.url(LOCAL_MANIFEST);
        info!(input = %input, output = %output.display(), "Merging segments");
        let result = self.run_tool(&input, output).await;
        server.stop().await;
        result?;
        info!(output = %output.display(), "Merge finished");
        Ok(())
    }
}
