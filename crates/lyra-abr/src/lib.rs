//! Adaptive bitrate selection for segmented streaming.
//!
//! [`BandwidthHistory`] keeps one-second throughput buckets. The heuristic
//! ([`calculate_target_buffer`], [`select_variant`]) projects the buffer level
//! each variant would leave over the next two minutes and picks the highest
//! bitrate that keeps playback fed. [`AbrController`] ties both together and
//! applies the post-seek discount and manual overrides.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use lyra_abr::{AbrController, AbrOptions, VariantProfile};
//!
//! let ten = Duration::from_secs(10);
//! let variants = vec![
//!     VariantProfile::new(500_000).with_segments(20, ten),
//!     VariantProfile::new(1_500_000).with_segments(20, ten),
//!     VariantProfile::new(3_000_000).with_segments(20, ten),
//! ];
//!
//! let options = AbrOptions::default().with_initial_bandwidth(Some(2_000_000));
//! let mut controller = AbrController::new(options);
//! let decision = controller.decide(&variants, Duration::ZERO).unwrap();
//! assert_eq!(decision.target_variant_index, 1);
//! ```

#![forbid(unsafe_code)]

mod controller;
mod estimator;
mod heuristic;
mod types;

pub use controller::{AbrController, AbrDecision};
pub use estimator::{BandwidthHistory, Estimator};
pub use heuristic::{
    BufferProjection, SelectionReason, VariantSelection, calculate_target_buffer, select_variant,
};
pub use types::{
    AbrMode, AbrOptions, SegmentPlan, ThroughputSample, VariantProfile, VariantSource,
};
