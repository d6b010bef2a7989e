use std::{collections::HashSet, sync::Arc, time::Duration};

use lyra::prelude::*;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::default()
                .add_directive("lyra_hls=debug".parse().unwrap())
                .add_directive("lyra_net=info".parse().unwrap())
                .add_directive("warn".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// Retries fast enough for tests; the event bus holds a whole session.
pub(crate) fn test_config(url: url::Url) -> HlsConfig {
    let fast = RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20));
    HlsConfig::new(url)
        .with_net(NetOptions::default().with_retry_policy(fast))
        .with_chunk_packets(32)
        .with_events_channel_capacity(1024)
}

/// What a host saw while pulling a session to its end.
#[derive(Debug, Default)]
pub(crate) struct Played {
    /// `(adjusted timestamp, key frame)` per video sample.
    pub video: Vec<(i64, bool)>,
    pub audio: Vec<i64>,
}

/// A session plus the host side of its sink.
pub(crate) struct Player {
    pub source: HlsMediaStreamSource,
    pub sink: kanal::AsyncReceiver<SinkEvent>,
    pub events: broadcast::Receiver<HlsEvent>,
}

impl Player {
    pub(crate) fn open(config: HlsConfig) -> Self {
        let (sink, rx) = ChannelSink::new();
        let source = HlsMediaStreamSource::open(config, Arc::new(sink)).unwrap();
        let events = source.events();
        Self {
            source,
            sink: rx.to_async(),
            events,
        }
    }

    pub(crate) async fn wait_open(&self) -> OpenInfo {
        loop {
            match self.sink.recv().await.unwrap() {
                SinkEvent::Opened(info) => return info,
                SinkEvent::Failed(error) => panic!("session failed before open: {error}"),
                _ => {}
            }
        }
    }

    pub(crate) async fn wait_seek(&self) -> i64 {
        loop {
            match self.sink.recv().await.unwrap() {
                SinkEvent::SeekCompleted(timestamp) => return timestamp,
                SinkEvent::Failed(error) => panic!("session failed during seek: {error}"),
                _ => {}
            }
        }
    }

    /// Wait for the terminal error.
    pub(crate) async fn wait_failure(&self) -> String {
        loop {
            if let SinkEvent::Failed(error) = self.sink.recv().await.unwrap() {
                return error;
            }
        }
    }

    /// Request and recycle samples on both streams until each ends.
    pub(crate) async fn play_to_end(&self) -> Played {
        let mut played = Played::default();
        let mut ended = HashSet::new();
        self.source.request_sample(MediaType::Video);
        self.source.request_sample(MediaType::Audio);
        while ended.len() < 2 {
            match self.sink.recv().await.unwrap() {
                SinkEvent::Delivered(media, SampleDelivery::Sample(sample)) => {
                    match media {
                        MediaType::Video => played
                            .video
                            .push((sample.adjusted_timestamp, sample.key_frame)),
                        MediaType::Audio => played.audio.push(sample.adjusted_timestamp),
                    }
                    self.source.recycle(media, sample).unwrap();
                    self.source.request_sample(media);
                }
                SinkEvent::Delivered(media, SampleDelivery::EndOfStream) => {
                    ended.insert(media);
                }
                SinkEvent::Failed(error) => panic!("session failed while playing: {error}"),
                _ => {}
            }
        }
        played
    }

    /// Everything published on the event bus so far.
    pub(crate) fn drain_events(&mut self) -> Vec<HlsEvent> {
        let mut seen = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => seen.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return seen,
            }
        }
    }
}
