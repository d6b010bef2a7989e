//! MPEG-2 transport stream demuxing.
//!
//! Bytes flow through three layers:
//!
//! - [`TsDemux`]: 188-byte packets, PAT/PMT, continuity checks and stream
//!   binding.
//! - [`PesParser`]: per-PID PES reassembly and PTS/DTS extraction.
//! - [`MediaFormatParser`]: codec framing (H.264, ADTS AAC, DD+) into
//!   [`Sample`](lyra_sample::Sample)s queued on a
//!   [`SampleBuffer`](lyra_sample::SampleBuffer).
//!
//! [`BitstreamReader`] is the bit-field reader the framers share.

#![forbid(unsafe_code)]

mod bitstream;
mod demux;
mod error;
mod format;
mod pes;
mod psi;

pub use bitstream::BitstreamReader;
pub use demux::{DemuxStats, TS_PACKET_SIZE, TsDemux};
pub use error::{BitstreamError, BitstreamResult, TsError, TsResult};
pub use format::{FormatKind, MediaFormatParser, SegmentContext, SpsInfo, parse_sps};
pub use pes::{PesParser, PesTimestamps};
pub use psi::{PatEntry, Pmt, PmtStream, parse_pat, parse_pmt};
