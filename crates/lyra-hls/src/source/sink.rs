use std::time::Duration;

use lyra_sample::{MediaType, SampleDelivery, StreamDescriptor};

use crate::error::HlsError;

/// What the host learns when the source opens.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenInfo {
    /// `None` for live streams.
    pub duration: Option<Duration>,
    pub seekable: bool,
    pub video: Option<StreamDescriptor>,
    pub audio: Option<StreamDescriptor>,
}

/// Host side of the source.
///
/// Calls come from the source's worker task and, for deliveries, also from
/// whichever thread calls
/// [`HlsMediaStreamSource::request_sample`](super::HlsMediaStreamSource::request_sample).
/// Implementations must not block.
pub trait MediaSink: Send + Sync + 'static {
    fn on_open_completed(&self, info: OpenInfo);

    /// Answer to one sample request.
    fn deliver(&self, media: MediaType, delivery: SampleDelivery);

    /// The first timestamp after a seek, in 100 ns units.
    fn on_seek_completed(&self, timestamp: i64);

    /// Fill level while buffering, in `[0, 1]`.
    fn on_buffering_progress(&self, progress: f32);

    /// The source failed and has stopped. Called at most once.
    fn on_error(&self, error: &HlsError);
}

#[derive(Debug)]
pub enum SinkEvent {
    Opened(OpenInfo),
    Delivered(MediaType, SampleDelivery),
    SeekCompleted(i64),
    BufferingProgress(f32),
    Failed(String),
}

/// Forwards every sink call into a channel.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: kanal::Sender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, kanal::Receiver<SinkEvent>) {
        let (tx, rx) = kanal::unbounded();
        (Self { tx }, rx)
    }

    fn send(&self, event: SinkEvent) {
        // The host dropping its receiver only loses telemetry.
        let _ = self.tx.send(event);
    }
}

impl MediaSink for ChannelSink {
    fn on_open_completed(&self, info: OpenInfo) {
        self.send(SinkEvent::Opened(info));
    }

    fn deliver(&self, media: MediaType, delivery: SampleDelivery) {
        self.send(SinkEvent::Delivered(media, delivery));
    }

    fn on_seek_completed(&self, timestamp: i64) {
        self.send(SinkEvent::SeekCompleted(timestamp));
    }

    fn on_buffering_progress(&self, progress: f32) {
        self.send(SinkEvent::BufferingProgress(progress));
    }

    fn on_error(&self, error: &HlsError) {
        self.send(SinkEvent::Failed(error.to_string()));
    }
}
