use std::sync::Arc;

use tracing::{debug, info};

use crate::probe::{SequenceProbe, first_success};

/// Jump sizes seen together in the wild. A stream whose window spacing is in
/// one group tends to use the other sizes of that group as well.
const DELTA_GROUPS: &[&[u64]] = &[
    // segment counters that skip a few numbers
    &[2, 3, 4, 5, 6],
    // millisecond timestamps of 1-10s segments
    &[1000, 2000, 3000, 4000, 5000, 6000, 8000, 10000],
    // 29.97/59.94 fps frame counters
    &[1001, 2002, 3003, 4004, 5005, 6006],
    // 90 kHz presentation timestamps
    &[90_000, 180_000, 270_000, 360_000, 540_000],
    // 100 ns ticks
    &[10_000_000, 20_000_000, 40_000_000, 60_000_000],
];

/// Candidate jump sizes for a stream whose window shows `space` between ids.
pub fn common_deltas(space: u64) -> Vec<u64> {
    DELTA_GROUPS
        .iter()
        .find(|group| group.contains(&space))
        .map(|group| group.to_vec())
        .unwrap_or_else(|| vec![space])
}

/// Backward walk over sparsely numbered segments.
pub struct GuessSearch {
    probe: Arc<dyn SequenceProbe>,
    deltas: Vec<u64>,
    space: u64,
    batch: usize,
}

impl GuessSearch {
    pub fn new(probe: Arc<dyn SequenceProbe>, space: u64, async_limit: usize) -> Self {
        let space = space.max(1);
        let batch = async_limit
            .min(usize::try_from(space).unwrap_or(usize::MAX))
            .max(1);
        Self {
            probe,
            deltas: common_deltas(space),
            space,
            batch,
        }
    }

    pub fn deltas(&self) -> &[u64] {
        &self.deltas
    }

    /// Walk backward from the known-valid `start` and return every id found,
    /// `start` included, in ascending order.
    pub async fn search(&mut self, start: u64) -> Vec<u64> {
        let mut found = vec![start];
        let mut current = start;

        while current > 0 {
            let candidates: Vec<u64> = self
                .deltas
                .iter()
                .filter(|d| **d > 0 && **d <= current)
                .map(|d| current - d)
                .collect();
            if let Some(id) = first_success(&self.probe, candidates).await {
                debug!(id, delta = current - id, "Known delta hit");
                found.push(id);
                current = id;
                continue;
            }

            let Some(id) = self.scan_window(current).await else {
                break;
            };
            let delta = current - id;
            if !self.deltas.contains(&delta) {
                info!(delta, "Learned new segment delta");
                self.deltas.push(delta);
            }
            found.push(id);
            current = id;
        }

        found.sort_unstable();
        found.dedup();
        info!(
            count = found.len(),
            earliest = found.first().copied().unwrap_or(start),
            "Guess search finished"
        );
        found
    }

    /// Scan the `1.5 * space` ids below `current`, batch by batch.
    async fn scan_window(&self, current: u64) -> Option<u64> {
        let window = self.space.saturating_mul(3) / 2;
        let from = current.saturating_sub(window);
        let ids: Vec<u64> = (from..current).collect();
        for chunk in ids.chunks(self.batch) {
            if let Some(id) = first_success(&self.probe, chunk.iter().copied()).await {
                return Some(id);
            }
        }
        None
    }
}
