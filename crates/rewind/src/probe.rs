//! Existence probes for numbered segments.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::trace;

use crate::pattern::SegmentTemplate;
use crate::session::HttpSession;

/// Answers whether the segment with a given sequence number exists.
#[async_trait]
pub trait SequenceProbe: Send + Sync + 'static {
    async fn check(&self, id: u64) -> bool;
}

/// Probes `base + template(id)` over HTTP, bounded by a shared gate.
pub struct TemplateProbe {
    session: HttpSession,
    base: String,
    template: SegmentTemplate,
    gate: Arc<Semaphore>,
    timeout: Duration,
}

impl TemplateProbe {
    pub fn new(
        session: HttpSession,
        base: impl Into<String>,
        template: SegmentTemplate,
        gate: Arc<Semaphore>,
        timeout: Duration,
    ) -> Self {
        Self {
            session,
            base: base.into(),
            template,
            gate,
            timeout,
        }
    }

    pub fn url_for(&self, id: u64) -> String {
        format!("{}{}", self.base, self.template.render(id))
    }
}

#[async_trait]
impl SequenceProbe for TemplateProbe {
    async fn check(&self, id: u64) -> bool {
        let Ok(_permit) = self.gate.acquire().await else {
            return false;
        };
        self.session.probe(&self.url_for(id), self.timeout).await
    }
}

/// Probe every id concurrently and return the first one that answers true.
///
/// Once a winner is known the remaining probes are aborted, and the call only
/// returns after every aborted task has been reaped. Results that arrive
/// during that drain are discarded.
pub async fn first_success<I>(probe: &Arc<dyn SequenceProbe>, ids: I) -> Option<u64>
where
    I: IntoIterator<Item = u64>,
{
    let mut set = JoinSet::new();
    for id in ids {
        let probe = Arc::clone(probe);
        set.spawn(async move { (id, probe.check(id).await) });
    }

    let mut winner = None;
    while let Some(joined) = set.join_next().await {
        if let Ok((id, true)) = joined {
            winner = Some(id);
            break;
        }
    }

    if winner.is_some() {
        set.abort_all();
        while let Some(late) = set.join_next().await {
            if let Ok((id, true)) = late {
                trace!(id, "Ignoring probe that resolved after cancellation");
            }
        }
    }
    winner
}
