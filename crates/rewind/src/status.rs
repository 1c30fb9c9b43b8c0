use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SegmentState {
    Downloading,
    Successful,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentStatus {
    pub filename: String,
    pub url: String,
    pub state: SegmentState,
}

/// Per-mission segment bookkeeping, keyed by sequence number.
///
/// An id is inserted at most once; later scheduling attempts for the same id
/// are rejected by [`StatusMap::track`].
#[derive(Debug, Default, Clone)]
pub struct StatusMap {
    segments: BTreeMap<u64, SegmentStatus>,
}

impl StatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `id` as `Downloading`. Returns `false` when it was already tracked.
    pub fn track(&mut self, id: u64, filename: String, url: String) -> bool {
        if self.segments.contains_key(&id) {
            return false;
        }
        self.segments.insert(
            id,
            SegmentStatus {
                filename,
                url,
                state: SegmentState::Downloading,
            },
        );
        true
    }

    pub fn contains(&self, id: u64) -> bool {
        self.segments.contains_key(&id)
    }

    pub fn set_state(&mut self, id: u64, state: SegmentState) {
        if let Some(status) = self.segments.get_mut(&id) {
            status.state = state;
        }
    }

    pub fn get(&self, id: u64) -> Option<&SegmentStatus> {
        self.segments.get(&id)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments in ascending sequence order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &SegmentStatus)> {
        self.segments.iter().map(|(id, status)| (*id, status))
    }

    pub fn count(&self, state: SegmentState) -> usize {
        self.segments.values().filter(|s| s.state == state).count()
    }

    pub fn all_successful(&self) -> bool {
        self.segments
            .values()
            .all(|s| s.state == SegmentState::Successful)
    }

    /// Everything that did not end `Successful`, including segments still
    /// marked `Downloading` after a hard stop.
    pub fn unresolved(&self) -> Vec<UnresolvedSegment> {
        self.iter()
            .filter(|(_, s)| s.state != SegmentState::Successful)
            .map(|(sequence, s)| UnresolvedSegment {
                sequence,
                url: s.url.clone(),
                state: s.state,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedSegment {
    pub sequence: u64,
    pub url: String,
    pub state: SegmentState,
}

/// Outcome of a finished mission.
#[derive(Debug, Clone, Serialize)]
pub struct MissionReport {
    pub title: String,
    pub successful: usize,
    pub failed: usize,
    pub unresolved: Vec<UnresolvedSegment>,
    pub manifest: Option<PathBuf>,
    pub merged: Option<PathBuf>,
}

impl MissionReport {
    pub fn from_status(title: impl Into<String>, status: &StatusMap) -> Self {
        let unresolved = status.unresolved();
        Self {
            title: title.into(),
            successful: status.count(SegmentState::Successful),
            failed: unresolved.len(),
            unresolved,
            manifest: None,
            merged: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    pub fn log(&self) {
        info!(
            title = %self.title,
            successful = self.successful,
            failed = self.failed,
            "Mission finished"
        );
        for segment in &self.unresolved {
            error!(
                sequence = segment.sequence,
                url = %segment.url,
                state = ?segment.state,
                "Segment not downloaded"
            );
        }
    }
}
