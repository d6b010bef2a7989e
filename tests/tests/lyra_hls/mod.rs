//! Integration tests for lyra-hls against a local HTTP origin

pub(crate) mod fixture;

mod keys_integration;
mod live_reload;
mod segment_failures;
mod source_seek;
mod variant_selection;
mod vod_playback;
