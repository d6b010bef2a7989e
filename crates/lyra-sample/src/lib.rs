//! Access-unit samples and the per-media-type sample queue.
//!
//! A [`SampleBuffer`] owns a [`FifoMemoryPool`](lyra_bufpool::FifoMemoryPool)
//! for payload bytes and a [`Recycler`](lyra_bufpool::Recycler) for
//! [`Sample`] wrappers. Timestamps arrive as 90 kHz values, are corrected for
//! 33-bit rollover and normalized onto a shared [`TimelineClock`] in 100 ns
//! units.

#![forbid(unsafe_code)]

mod buffer;
mod descriptor;
mod error;
mod sample;
mod timeline;

pub use buffer::{SampleBuffer, SampleBufferOptions, SampleDelivery, TimelineTransition};
pub use descriptor::{Codec, MediaType, StreamAttributes, StreamDescriptor};
pub use error::{SampleError, SampleResult};
pub use sample::{Sample, SegmentRef};
pub use timeline::{TimelineClock, TimelineInfo, TimelineSpec, pts_to_hns};

/// 100 ns units per second.
pub const HNS_PER_SECOND: i64 = 10_000_000;
