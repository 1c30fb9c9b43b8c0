//! Mission orchestration and the multi-mission runner.
//!
//! A mission records one rendition: resolve the playlists, mirror them, fetch
//! the init segment and key, run the [`DownloadEngine`], write the local
//! manifest and report, then merge when every segment made it.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::{DownloaderConfig, MissionConfig, create_client};
use crate::credentials::{CredentialSource, NoCredentials};
use crate::decryption::{Decryptor, Iv};
use crate::engine::DownloadEngine;
use crate::events::EventSink;
use crate::fetcher::download_resource;
use crate::logging::MissionLogGuard;
use crate::manifest::{MediaPlaylistInfo, resource_name};
use crate::merge::{FfmpegMerger, MergeLock, Merger, merge_lock};
use crate::output::MissionLayout;
use crate::patch::PatchUrl;
use crate::resolver::PlaylistResolver;
use crate::session::HttpSession;
use crate::status::MissionReport;
use crate::{Result, RewindError};

/// What to record, as handed over by whoever discovered the stream.
#[derive(Clone)]
pub struct MissionSpec {
    pub entry_url: String,
    pub title: String,
    /// Overrides [`MissionConfig::output_dir`].
    pub output_dir: Option<PathBuf>,
    /// Index into the sorted variant list of a master playlist.
    pub rendition: i64,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub credentials: Arc<dyn CredentialSource>,
}

impl MissionSpec {
    pub fn new(entry_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            entry_url: entry_url.into(),
            title: title.into(),
            output_dir: None,
            rendition: 0,
            referer: None,
            user_agent: None,
            credentials: Arc::new(NoCredentials),
        }
    }

    pub fn rendition(mut self, index: i64) -> Self {
        self.rendition = index;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }
}

impl fmt::Debug for MissionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MissionSpec")
            .field("entry_url", &self.entry_url)
            .field("title", &self.title)
            .field("output_dir", &self.output_dir)
            .field("rendition", &self.rendition)
            .field("referer", &self.referer)
            .field("user_agent", &self.user_agent)
            .field("rotating_credentials", &self.credentials.is_rotating())
            .finish()
    }
}

pub struct Mission {
    spec: MissionSpec,
    config: MissionConfig,
    downloader: DownloaderConfig,
    stop: CancellationToken,
    merge_lock: MergeLock,
    merger: Arc<dyn Merger>,
    events: EventSink,
}

impl Mission {
    pub fn new(spec: MissionSpec, config: MissionConfig) -> Self {
        let merger = Arc::new(FfmpegMerger::new(config.tool.clone()));
        Self {
            spec,
            config,
            downloader: DownloaderConfig::default(),
            stop: CancellationToken::new(),
            merge_lock: merge_lock(),
            merger,
            events: EventSink::default(),
        }
    }

    pub fn with_downloader_config(mut self, downloader: DownloaderConfig) -> Self {
        self.downloader = downloader;
        self
    }

    /// Cancelling this token stops scheduling and drains running downloads.
    pub fn with_stop_token(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_merge_lock(mut self, lock: MergeLock) -> Self {
        self.merge_lock = lock;
        self
    }

    pub fn with_merger(mut self, merger: Arc<dyn Merger>) -> Self {
        self.merger = merger;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn spec(&self) -> &MissionSpec {
        &self.spec
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Backup layout under the spec's output directory, or the configured one.
    pub fn layout(&self) -> MissionLayout {
        let root = self
            .spec
            .output_dir
            .clone()
            .unwrap_or_else(|| self.config.output_dir.clone());
        MissionLayout::new(root, self.spec.title.clone())
    }

    /// Run to completion. Only initialisation failures are returned as errors;
    /// segment failures end up in the report.
    pub async fn run(self) -> Result<MissionReport> {
        let span = info_span!("mission", title = %self.spec.title);
        self.execute().instrument(span).await
    }

    async fn execute(self) -> Result<MissionReport> {
        let mut downloader = self.downloader.clone();
        if let Some(user_agent) = &self.spec.user_agent {
            downloader.user_agent = user_agent.clone();
        }
        let client = create_client(&downloader)?;
        let session = HttpSession::new(
            client,
            self.spec.referer.clone(),
            self.spec.credentials.clone(),
        )
        .with_timeout(self.config.playlist_timeout);

        let mut resolver =
            PlaylistResolver::new(session.clone(), self.spec.rendition, self.config.probe_timeout);
        resolver.prepare(&self.spec.entry_url).await?;
        let (Some(media), Some(patch)) = (resolver.media().cloned(), resolver.patch().cloned())
        else {
            return Err(RewindError::Internal {
                reason: "resolver prepared without a media playlist".into(),
            });
        };

        let layout = self.layout();
        layout
            .create(self.config.decrypt && media.key_uri.is_some())
            .await?;
        mirror_sources(&resolver, &layout).await;

        info!(url = ?resolver.media_url(), "Mission started");
        if let Some(map) = &media.map_uri {
            let path = layout.fragment(&resource_name(map));
            if let Err(e) = download_resource(
                &session,
                &absolute(&patch, map),
                &path,
                self.config.segment_timeout,
                &self.stop,
            )
            .await
            {
                warn!(uri = %map, error = %e, "Failed to download init segment");
            }
        }
        let decryptor = self.fetch_key(&session, &media, &patch, &layout).await;

        let engine = DownloadEngine::new(self.config.clone(), layout.clone(), self.stop.clone())
            .with_decryptor(decryptor)
            .with_events(self.events.clone());
        let status = engine.run(&mut resolver).await;

        let final_media = resolver.media().unwrap_or(&media);
        let live_content = resolver.media_content().unwrap_or_default();
        let mut report = MissionReport::from_status(self.spec.title.clone(), &status);
        report.manifest = Some(
            layout
                .write_local_manifest(live_content, final_media, &status)
                .await?,
        );

        if !report.is_complete() {
            error!(
                failed = report.failed,
                "Some segments were not downloaded, merge skipped"
            );
        } else if status.is_empty() {
            warn!("No segment downloaded, merge skipped");
        } else if self.config.merge {
            report.merged = self.merge(&layout, &final_media.media_ext).await;
        }

        report.log();
        if let Err(e) = layout.write_report(&report).await {
            warn!(error = %e, "Failed to write status report");
        }
        Ok(report)
    }

    /// Download the key next to the fragments and build a decryptor from it
    /// when decryption is enabled.
    async fn fetch_key(
        &self,
        session: &HttpSession,
        media: &MediaPlaylistInfo,
        patch: &PatchUrl,
        layout: &MissionLayout,
    ) -> Option<Decryptor> {
        let key_uri = media.key_uri.as_ref()?;
        let path = layout.key_path();
        if let Err(e) = download_resource(
            session,
            &absolute(patch, key_uri),
            &path,
            self.config.segment_timeout,
            &self.stop,
        )
        .await
        {
            warn!(uri = %key_uri, error = %e, "Failed to download key");
            return None;
        }
        let key = match tokio::fs::read(&path).await {
            Ok(key) => key,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read key");
                return None;
            }
        };
        info!(key = %hex::encode(&key), path = %path.display(), iv = ?media.iv, "AES-128 key stored");

        if !self.config.decrypt {
            return None;
        }
        let iv = media.iv.clone().map(Iv::Hex);
        match Decryptor::new(&key, iv.as_ref()) {
            Ok(decryptor) => Some(decryptor),
            Err(e) => {
                warn!(error = %e, "Decryption disabled for this mission");
                None
            }
        }
    }

    async fn merge(&self, layout: &MissionLayout, media_ext: &str) -> Option<PathBuf> {
        let output = layout.final_output(media_ext);
        let _guard = self.merge_lock.lock().await;
        if tokio::fs::try_exists(&output).await.unwrap_or(false) {
            info!(output = %output.display(), "Final file already exists, merge skipped");
            return Some(output);
        }
        match self.merger.merge(&layout.fragments, &output).await {
            Ok(()) => Some(output),
            Err(e) => {
                error!(error = %e, "Merge failed");
                None
            }
        }
    }
}

fn absolute(patch: &PatchUrl, uri: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        uri.to_string()
    } else {
        patch.join(uri)
    }
}

async fn mirror_sources(resolver: &PlaylistResolver, layout: &MissionLayout) {
    let sources = [
        (resolver.master_url(), resolver.master_content()),
        (resolver.media_url(), resolver.media_content()),
    ];
    for (url, content) in sources {
        let (Some(url), Some(content)) = (url, content) else {
            continue;
        };
        if let Err(e) = layout.write_source_manifest(url, content).await {
            error!(url, error = %e, "Failed to mirror source manifest");
        }
    }
}

/// Runs missions side by side, each on its own thread with a current-thread
/// runtime. All missions share one stop token and one merge lock.
pub struct MissionRunner {
    threads: usize,
    stop: CancellationToken,
    merge_lock: MergeLock,
}

impl MissionRunner {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            stop: CancellationToken::new(),
            merge_lock: merge_lock(),
        }
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Blocks until every mission finished. Results are in input order.
    pub fn run(&self, missions: Vec<Mission>) -> Vec<Result<MissionReport>> {
        let count = missions.len();
        let queue: Mutex<VecDeque<(usize, Mission)>> = Mutex::new(
            missions
                .into_iter()
                .map(|m| {
                    m.with_stop_token(self.stop.child_token())
                        .with_merge_lock(self.merge_lock.clone())
                })
                .enumerate()
                .collect(),
        );
        let results: Mutex<Vec<Option<Result<MissionReport>>>> =
            Mutex::new((0..count).map(|_| None).collect());

        std::thread::scope(|scope| {
            for worker in 0..self.threads.min(count) {
                let queue = &queue;
                let results = &results;
                let spawned = std::thread::Builder::new()
                    .name(format!("mission-{worker}"))
                    .spawn_scoped(scope, move || {
                        loop {
                            let next = match queue.lock() {
                                Ok(mut queue) => queue.pop_front(),
                                Err(_) => None,
                            };
                            let Some((index, mission)) = next else {
                                break;
                            };
                            let outcome = run_blocking(mission);
                            if let Ok(mut results) = results.lock() {
                                results[index] = Some(outcome);
                            }
                        }
                    });
                if let Err(e) = spawned {
                    error!(worker, error = %e, "Failed to start mission thread");
                }
            }
        });

        results
            .into_inner()
            .unwrap_or_default()
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(RewindError::Internal {
                        reason: "mission did not run".into(),
                    })
                })
            })
            .collect()
    }
}

fn run_blocking(mission: Mission) -> Result<MissionReport> {
    let log_path = mission.layout().log_path();
    let _log = MissionLogGuard::install(&log_path)
        .inspect_err(|e| warn!(path = %log_path.display(), error = %e, "Cannot open mission log"))
        .ok();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let title = mission.spec.title.clone();
    let outcome = runtime.block_on(mission.run());
    if let Err(e) = &outcome {
        error!(title = %title, error = %e, "Mission failed");
    }
    outcome
}
