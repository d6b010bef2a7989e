//! Adaptive HLS client.
//!
//! [`HlsMediaStreamSource`] loads a master (or single media) playlist, picks
//! a variant per segment with [`lyra_abr`], downloads and decrypts segments,
//! demuxes them with [`lyra_ts`] and queues samples into one
//! [`SampleBuffer`](lyra_sample::SampleBuffer) per media type. The host pulls
//! samples and receives open, seek, buffering and error notifications
//! through a [`MediaSink`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use lyra_hls::{ChannelSink, HlsConfig, HlsMediaStreamSource, SinkEvent};
//! use url::Url;
//!
//! # async fn run() -> lyra_hls::HlsResult<()> {
//! let url = Url::parse("https://cdn.example/master.m3u8")?;
//! let (sink, events) = ChannelSink::new();
//! let source = HlsMediaStreamSource::open(HlsConfig::new(url), Arc::new(sink))?;
//! if let Ok(SinkEvent::Opened(info)) = events.to_async().recv().await {
//!     println!("duration: {:?}", info.duration);
//! }
//! let summary = source.close().await;
//! println!("next session starts at {:?} bps", summary.average_bandwidth_bps);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod keys;
pub mod parsing;
pub mod playback;
pub mod playlist;
pub mod source;

pub use config::{
    AbrMode, AbrOptions, HlsConfig, KeyContext, KeyOptions, KeyProcessor, VariantChoice,
    VariantOverride,
};
pub use error::{HlsError, HlsResult};
pub use events::{EventEmitter, HlsEvent};
pub use playback::{HlsPlayback, PlaybackStats};
pub use playlist::{HlsPlaylist, HlsProgram, HlsStream, HlsVariant};
pub use source::{
    ChannelSink, Diagnostics, HlsMediaStreamSource, MediaSink, OpenInfo, SessionSummary, SinkEvent,
};
