use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum MissionEvent {
    PlaylistRefreshed {
        media_sequence: u64,
        newest: Option<u64>,
        segments: usize,
    },
    /// Backfill produced its seed; `earliest` is the first id to record.
    BackfillSeeded {
        earliest: u64,
        discovered: usize,
    },
    SegmentCompleted {
        sequence: u64,
        bytes: u64,
    },
    SegmentFailed {
        sequence: u64,
        reason: String,
    },
    /// Scheduling stopped; `hard` is set when outstanding downloads were cancelled.
    StreamEnded {
        hard: bool,
    },
}

/// Optional progress channel. Sending never blocks and a dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<MissionEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<MissionEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MissionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: MissionEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
