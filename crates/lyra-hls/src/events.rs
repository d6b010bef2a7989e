use std::time::Duration;

use lyra_abr::SelectionReason;
use tokio::sync::broadcast;

/// Telemetry for hosts. Nothing in the engine waits on a subscriber.
#[derive(Clone, Debug, PartialEq)]
pub enum HlsEvent {
    VariantsDiscovered {
        bitrates: Vec<u64>,
    },
    VariantSwitched {
        from: Option<usize>,
        to: usize,
        reason: SelectionReason,
    },
    PlaylistReloaded {
        variant: usize,
        changed: bool,
        next_reload: Option<Duration>,
    },
    SegmentStarted {
        variant: usize,
        sequence: u64,
        attempt: u32,
    },
    SegmentCompleted {
        variant: usize,
        sequence: u64,
        bytes: u64,
        elapsed: Duration,
    },
    SegmentSkipped {
        variant: usize,
        sequence: u64,
        error: String,
    },
    KeyFetched {
        key_url: String,
        cached: bool,
    },
    BandwidthSampled {
        average_bps: Option<u64>,
        recent_bps: Option<u64>,
    },
    BufferingChanged {
        buffering: bool,
        progress: f32,
    },
    EndOfStream,
    Error {
        error: String,
        fatal: bool,
    },
}

#[derive(Clone, Debug)]
pub struct EventEmitter {
    tx: broadcast::Sender<HlsEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HlsEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: HlsEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}
