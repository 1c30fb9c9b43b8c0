//! Per-mission polling loop.
//!
//! The loop owns the status map. Segment downloads run in a [`JoinSet`] and
//! report `(sequence, outcome)` back; outcomes are applied between polls and
//! while the loop idles. Two ways out:
//!
//! - graceful: the stop token fires or the playlist stagnates; scheduling
//!   stops and running downloads are drained.
//! - hard: the media playlist keeps failing to refresh; running downloads are
//!   aborted and every segment still in flight is recorded as failed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backfill::{GuessSearch, Strategy, find_range};
use crate::config::MissionConfig;
use crate::decryption::Decryptor;
use crate::events::{EventSink, MissionEvent};
use crate::fetcher::{SegmentFetcher, SegmentJob};
use crate::manifest::{MediaFile, MediaPlaylistInfo, resource_name};
use crate::output::MissionLayout;
use crate::pattern::{self, FormatInfo};
use crate::probe::{SequenceProbe, TemplateProbe};
use crate::resolver::PlaylistResolver;
use crate::retry::RetryPolicy;
use crate::status::{SegmentState, StatusMap};
use crate::Result;

type SegmentOutcome = (u64, Result<u64>);

/// How segments are discovered for a mission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadMode {
    /// Follow whatever the playlist window lists.
    Live,
    /// Build segment URLs from a numbered template, starting before the window.
    Backfill(FormatInfo),
}

/// Backfill needs a full download request and two samples that agree on a template.
pub fn select_mode(media: &MediaPlaylistInfo, full_download: bool) -> DownloadMode {
    if !full_download {
        return DownloadMode::Live;
    }
    let [first, second, ..] = media.files.as_slice() else {
        warn!("Fewer than two segments listed, following the live window");
        return DownloadMode::Live;
    };
    match pattern::infer(&first.path, &second.path) {
        Ok(format) => {
            info!(template = %format.template, space = format.space, "Numbered segment names, backfilling");
            DownloadMode::Backfill(format)
        }
        Err(e) => {
            warn!(error = %e, "No usable naming pattern, following the live window");
            DownloadMode::Live
        }
    }
}

/// Sequence number of a listed file: last digit run of its name, else its
/// position after `EXT-X-MEDIA-SEQUENCE`.
pub fn file_sequence(media: &MediaPlaylistInfo, file: &MediaFile) -> u64 {
    pattern::sequence_number(&file.path)
        .unwrap_or_else(|| media.media_sequence + file.order.saturating_sub(1))
}

pub struct DownloadEngine {
    config: MissionConfig,
    layout: MissionLayout,
    decryptor: Option<Arc<Decryptor>>,
    events: EventSink,
    stop: CancellationToken,
    cancel: CancellationToken,
    gate: Arc<Semaphore>,
    status: StatusMap,
    tasks: JoinSet<SegmentOutcome>,
}

impl DownloadEngine {
    pub fn new(config: MissionConfig, layout: MissionLayout, stop: CancellationToken) -> Self {
        let gate = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            config,
            layout,
            decryptor: None,
            events: EventSink::default(),
            cancel: CancellationToken::new(),
            stop,
            gate,
            status: StatusMap::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Decrypt every downloaded segment into the layout's `decrypt` folder.
    pub fn with_decryptor(mut self, decryptor: Option<Decryptor>) -> Self {
        self.decryptor = decryptor.map(Arc::new);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn status(&self) -> &StatusMap {
        &self.status
    }

    /// Poll `resolver` until the stream ends or a stop is requested, then
    /// return the final status map. `resolver` must already be prepared.
    pub async fn run(mut self, resolver: &mut PlaylistResolver) -> StatusMap {
        let Some(media) = resolver.media().cloned() else {
            warn!("Media playlist not resolved, nothing to download");
            return self.status;
        };
        let mode = select_mode(&media, self.config.full_download);
        let tries = match mode {
            DownloadMode::Live => self.config.live_tries,
            DownloadMode::Backfill(_) => self.config.backfill_tries,
        };
        let fetcher = SegmentFetcher::new(
            resolver.session().clone(),
            self.gate.clone(),
            RetryPolicy::fixed(tries, self.config.retry_delay),
            self.config.segment_timeout,
            self.cancel.clone(),
        );
        let has_key = media.key_uri.is_some();

        let mut cursor = match &mode {
            DownloadMode::Backfill(format) => self.seed(resolver, format, &fetcher).await,
            DownloadMode::Live => None,
        };

        let mut stagnation = 0u32;
        let mut failures = 0u32;
        let mut hard = false;
        let mut first_cycle = true;

        loop {
            if !first_cycle {
                self.idle(self.config.poll_interval).await;
            }
            if self.stop.is_cancelled() {
                warn!("Stop requested, waiting for running downloads");
                break;
            }
            if !first_cycle {
                if mode == DownloadMode::Live && !has_key {
                    resolver.update_master_playlist().await;
                }
                if !resolver.update_media_playlist().await {
                    failures += 1;
                    if failures > self.config.poll_failure_limit {
                        error!(failures, "Playlist unreachable, stream considered ended");
                        hard = true;
                        break;
                    }
                    continue;
                }
                failures = 0;
            }
            first_cycle = false;

            let (Some(media), Some(patch)) = (resolver.media(), resolver.patch()) else {
                continue;
            };
            let Some(newest) = media.last_file().map(|f| file_sequence(media, f)) else {
                continue;
            };
            self.events.emit(MissionEvent::PlaylistRefreshed {
                media_sequence: media.media_sequence,
                newest: Some(newest),
                segments: media.files.len(),
            });

            if self.status.contains(newest) {
                stagnation += 1;
                debug!(stagnation, newest, "No new segment");
                if stagnation >= self.config.stagnation_limit {
                    info!(polls = stagnation, "Playlist stopped growing, finishing downloads");
                    break;
                }
                continue;
            }
            stagnation = 0;

            match &mode {
                DownloadMode::Live => {
                    for file in &media.files {
                        let sequence = file_sequence(media, file);
                        self.schedule(&fetcher, sequence, patch.join(&file.path));
                    }
                }
                DownloadMode::Backfill(format) if format.space <= 1 => {
                    let start = cursor.unwrap_or(newest).min(newest);
                    let added = (start..=newest)
                        .filter(|id| self.schedule(&fetcher, *id, patch.join(&format.template.render(*id))))
                        .count();
                    info!(from = start, to = newest, added, "Scheduled segment range");
                    cursor = Some(newest);
                }
                DownloadMode::Backfill(format) => {
                    for file in &media.files {
                        let id = file_sequence(media, file);
                        self.schedule(&fetcher, id, patch.join(&format.template.render(id)));
                    }
                    cursor = Some(newest);
                }
            }
        }

        if hard {
            self.tasks.abort_all();
            self.cancel.cancel();
        }
        self.drain().await;
        self.events.emit(MissionEvent::StreamEnded { hard });
        self.status
    }

    /// Discover the elapsed part of the stream once. Returns where the first
    /// scheduled range starts.
    async fn seed(
        &mut self,
        resolver: &PlaylistResolver,
        format: &FormatInfo,
        fetcher: &SegmentFetcher,
    ) -> Option<u64> {
        let (Some(media), Some(patch)) = (resolver.media(), resolver.patch()) else {
            return None;
        };
        let first = file_sequence(media, media.first_file()?);
        let probe: Arc<dyn SequenceProbe> = Arc::new(TemplateProbe::new(
            resolver.session().clone(),
            patch.base.clone(),
            format.template.clone(),
            self.gate.clone(),
            self.config.probe_timeout,
        ));

        match Strategy::for_space(format.space) {
            Strategy::Boundary => {
                let lo = first.saturating_sub(self.config.boundary_distance);
                match find_range(&probe, lo, first, self.config.guess_async_limit).await {
                    Ok((start, end)) => {
                        info!(start, end, "Elapsed segments found");
                        self.events.emit(MissionEvent::BackfillSeeded {
                            earliest: start,
                            discovered: usize::try_from(first - start).unwrap_or(usize::MAX),
                        });
                        Some(start)
                    }
                    Err(e) => {
                        warn!(error = %e, "Boundary search failed, starting at the playlist window");
                        Some(first)
                    }
                }
            }
            Strategy::Guess => {
                let mut search = GuessSearch::new(probe, format.space, self.config.guess_async_limit);
                let ids = search.search(first).await;
                debug!(deltas = ?search.deltas(), "Delta set after guess search");
                for id in &ids {
                    self.schedule(fetcher, *id, patch.join(&format.template.render(*id)));
                }
                self.events.emit(MissionEvent::BackfillSeeded {
                    earliest: ids.first().copied().unwrap_or(first),
                    discovered: ids.len(),
                });
                Some(first)
            }
        }
    }

    /// Track `sequence` and spawn its download. `false` if it was already tracked.
    fn schedule(&mut self, fetcher: &SegmentFetcher, sequence: u64, url: String) -> bool {
        let filename = resource_name(&url);
        if !self.status.track(sequence, filename.clone(), url.clone()) {
            return false;
        }
        let job = SegmentJob {
            sequence,
            path: self.layout.fragment(&filename),
            url,
        };
        let decrypt = self
            .decryptor
            .clone()
            .map(|decryptor| (decryptor, self.layout.decrypted(&filename)));
        let fetcher = fetcher.clone();

        self.tasks.spawn(async move {
            let result = fetcher.download(&job).await;
            if result.is_ok()
                && let Some((decryptor, target)) = decrypt
            {
                match decryptor.decrypt_file(&job.path, &target).await {
                    Ok(outcome) => debug!(sequence = job.sequence, ?outcome, "Segment decrypted"),
                    Err(e) => warn!(sequence = job.sequence, error = %e, "Segment decryption failed"),
                }
            }
            (job.sequence, result)
        });
        true
    }

    /// Sleep for `period`, applying download outcomes as they arrive.
    async fn idle(&mut self, period: Duration) {
        let sleep = tokio::time::sleep(period);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                Some(joined) = self.tasks.join_next() => self.apply(joined),
                _ = &mut sleep => break,
            }
        }
    }

    async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            self.apply(joined);
        }
        let unfinished: Vec<u64> = self
            .status
            .iter()
            .filter(|(_, s)| s.state == SegmentState::Downloading)
            .map(|(id, _)| id)
            .collect();
        for id in unfinished {
            self.status.set_state(id, SegmentState::Failed);
        }
    }

    fn apply(&mut self, joined: std::result::Result<SegmentOutcome, JoinError>) {
        match joined {
            Ok((sequence, Ok(bytes))) => {
                self.status.set_state(sequence, SegmentState::Successful);
                self.events
                    .emit(MissionEvent::SegmentCompleted { sequence, bytes });
            }
            Ok((sequence, Err(e))) => {
                self.status.set_state(sequence, SegmentState::Failed);
                let url = self
                    .status
                    .get(sequence)
                    .map(|s| s.url.as_str())
                    .unwrap_or_default();
                error!(sequence, url, error = %e, "Segment download failed");
                self.events.emit(MissionEvent::SegmentFailed {
                    sequence,
                    reason: e.to_string(),
                });
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(error = %e, "Segment task panicked"),
        }
    }
}
