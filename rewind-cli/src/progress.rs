//! Per-mission progress lines built from engine events.

use rewind_engine::{EventSink, MissionEvent};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Running totals of one mission.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub failed: usize,
    pub bytes: u64,
    pub ended: Option<bool>,
    dirty: bool,
}

impl Progress {
    /// Fold `event` in. Returns `true` on a playlist refresh that follows new
    /// segment outcomes, which is when a progress line is due.
    pub fn apply(&mut self, event: &MissionEvent) -> bool {
        match event {
            MissionEvent::SegmentCompleted { bytes, .. } => {
                self.completed += 1;
                self.bytes += bytes;
                self.dirty = true;
            }
            MissionEvent::SegmentFailed { .. } => {
                self.failed += 1;
                self.dirty = true;
            }
            MissionEvent::PlaylistRefreshed { .. } => {
                return std::mem::take(&mut self.dirty);
            }
            MissionEvent::StreamEnded { hard } => self.ended = Some(*hard),
            MissionEvent::BackfillSeeded { .. } => {}
        }
        false
    }
}

/// Spawn a task logging the progress of the mission `title`. The task ends
/// once every clone of the returned sink is dropped.
pub fn spawn_reporter(title: String) -> (EventSink, JoinHandle<Progress>) {
    let (sink, mut rx) = EventSink::channel();
    let handle = tokio::spawn(async move {
        let mut progress = Progress::default();
        while let Some(event) = rx.recv().await {
            let due = progress.apply(&event);
            match &event {
                MissionEvent::BackfillSeeded {
                    earliest,
                    discovered,
                } => info!(title = %title, earliest, discovered, "Backfill seeded"),
                MissionEvent::SegmentFailed { sequence, reason } => {
                    warn!(title = %title, sequence, reason = %reason, "Segment gave up")
                }
                MissionEvent::StreamEnded { hard } => info!(
                    title = %title,
                    hard,
                    completed = progress.completed,
                    failed = progress.failed,
                    "Stream ended"
                ),
                _ if due => info!(
                    title = %title,
                    completed = progress.completed,
                    failed = progress.failed,
                    mib = progress.bytes / (1024 * 1024),
                    "Progress"
                ),
                _ => {}
            }
        }
        progress
    });
    (sink, handle)
}
