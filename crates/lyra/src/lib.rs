#![forbid(unsafe_code)]

//! # Lyra
//!
//! Facade crate for the adaptive HLS client.
//!
//! ## Quick start
//!
//! ```ignore
//! use lyra::prelude::*;
//!
//! let (sink, events) = ChannelSink::new();
//! let source = HlsMediaStreamSource::open(HlsConfig::new(url), Arc::new(sink))?;
//! source.request_sample(MediaType::Video);
//! ```

// ── Re-export sub-crates ────────────────────────────────────────────────

pub mod abr {
    pub use lyra_abr::*;
}

pub mod bufpool {
    pub use lyra_bufpool::*;
}

pub mod drm {
    pub use lyra_drm::*;
}

pub mod hls {
    pub use lyra_hls::*;
}

pub mod net {
    pub use lyra_net::*;
}

pub mod sample {
    pub use lyra_sample::*;
}

pub mod ts {
    pub use lyra_ts::*;
}

// ── Prelude ─────────────────────────────────────────────────────────────

pub mod prelude {
    pub use lyra_abr::{AbrMode, AbrOptions};
    pub use lyra_hls::{
        ChannelSink, Diagnostics, HlsConfig, HlsError, HlsEvent, HlsMediaStreamSource,
        HlsResult, MediaSink, OpenInfo, SessionSummary, SinkEvent,
    };
    pub use lyra_net::{NetOptions, RetryPolicy};
    pub use lyra_sample::{
        Codec, MediaType, Sample, SampleDelivery, StreamAttributes, StreamDescriptor,
    };
}
