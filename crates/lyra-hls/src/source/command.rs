use std::time::Duration;

use lyra_ts::DemuxStats;
use tokio::sync::oneshot;

use crate::playback::PlaybackStats;

/// Requests from the host into the worker loop.
#[derive(Debug)]
pub(crate) enum Command {
    Seek {
        position: Duration,
    },
    /// `None` hands selection back to ABR.
    SwitchVariant {
        variant: Option<usize>,
    },
    Diagnostics {
        reply: oneshot::Sender<Diagnostics>,
    },
}

/// Point-in-time view of a running source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diagnostics {
    pub current_variant: Option<usize>,
    /// Declared bitrate of the current variant.
    pub bitrate: Option<u64>,
    pub bitrates: Vec<u64>,
    pub live: bool,
    pub buffering: bool,
    pub video_buffered: Duration,
    pub audio_buffered: Duration,
    pub buffered_bytes: usize,
    pub average_bps: Option<u64>,
    pub recent_bps: Option<u64>,
    pub playback: PlaybackStats,
    pub demux: DemuxStats,
}

/// What a closed source hands back for the next session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Seed for [`AbrOptions::initial_bandwidth_bps`](lyra_abr::AbrOptions::initial_bandwidth_bps)
    /// of the next session.
    pub average_bandwidth_bps: Option<u64>,
    pub segments_downloaded: u64,
    pub segments_skipped: u64,
    pub bytes_downloaded: u64,
}
