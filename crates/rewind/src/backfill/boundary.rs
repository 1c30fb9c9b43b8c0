use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::probe::{SequenceProbe, first_success};
use crate::{Result, RewindError};

/// Find the contiguous run of valid ids inside `[lo, hi]`.
///
/// The probe is assumed monotonic on each side of the run: everything between
/// the run's edges answers true, everything outside answers false. `batch`
/// bounds how many probes a single scan step fans out at once.
pub async fn find_range(
    probe: &Arc<dyn SequenceProbe>,
    lo: u64,
    hi: u64,
    batch: usize,
) -> Result<(u64, u64)> {
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    let lo_ok = probe.check(lo).await;
    let hi_ok = probe.check(hi).await;
    debug!(lo, hi, lo_ok, hi_ok, "Boundary search started");

    match (lo_ok, hi_ok) {
        (true, true) => Ok((lo, hi)),
        (true, false) => Ok((lo, last_true(probe, lo, hi).await)),
        (false, true) => Ok((first_true(probe, lo, hi).await, hi)),
        (false, false) => {
            let anchor = scan_for_anchor(probe, lo, hi, batch.max(1)).await?;
            info!(anchor, "Boundary search found an anchor");
            let start = first_true(probe, lo, anchor).await;
            let end = last_true(probe, anchor, hi).await;
            Ok((start, end))
        }
    }
}

/// `check(t)` is true and `check(f)` false with `t < f`; returns the last true id.
async fn last_true(probe: &Arc<dyn SequenceProbe>, mut t: u64, mut f: u64) -> u64 {
    while f - t > 1 {
        let mid = t + (f - t) / 2;
        if probe.check(mid).await {
            t = mid;
        } else {
            f = mid;
        }
    }
    t
}

/// `check(f)` is false and `check(t)` true with `f < t`; returns the first true id.
async fn first_true(probe: &Arc<dyn SequenceProbe>, mut f: u64, mut t: u64) -> u64 {
    while t - f > 1 {
        let mid = f + (t - f) / 2;
        if probe.check(mid).await {
            t = mid;
        } else {
            f = mid;
        }
    }
    t
}

/// Probe a grid over `(lo, hi)` whose step halves every round until a valid id
/// shows up. Ids already probed in an earlier round are skipped.
async fn scan_for_anchor(
    probe: &Arc<dyn SequenceProbe>,
    lo: u64,
    hi: u64,
    batch: usize,
) -> Result<u64> {
    let mut tried: HashSet<u64> = HashSet::from([lo, hi]);
    let mut step = ((hi - lo) / 4).max(1);

    loop {
        let round: Vec<u64> = (lo..=hi)
            .step_by(usize::try_from(step).unwrap_or(usize::MAX))
            .filter(|id| tried.insert(*id))
            .collect();
        debug!(step, probes = round.len(), "Scanning for any valid id");

        for chunk in round.chunks(batch) {
            if let Some(anchor) = first_success(probe, chunk.iter().copied()).await {
                return Ok(anchor);
            }
        }

        if step == 1 {
            return Err(RewindError::BoundaryNotFound { lo, hi });
        }
        step = (step / 2).max(1);
    }
}
