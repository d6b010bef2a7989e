//! Elementary stream framers.
//!
//! [`MediaFormatParser`] owns everything codec independent: the unconsumed
//! tail of the stream, PES timestamp marks, the open sample and the sample
//! buffer. Each codec only implements [`FrameParser::parse`], which looks at
//! the pending bytes and answers with a skip count plus, optionally, a
//! `begin_sample`/`add_to_last_sample` request recorded in [`ParseContext`].
//! The base applies them in the order skip, begin, add.

mod adts;
mod ddplus;
mod h264;
mod null;
mod wave;

use std::{collections::VecDeque, sync::Arc};

use lyra_sample::{MediaType, Sample, SampleBuffer, SegmentRef, StreamDescriptor, pts_to_hns};
use tracing::{debug, trace, warn};

use self::{adts::AdtsFramer, ddplus::DdPlusFramer, h264::H264Framer, null::NullFramer};
use crate::error::{TsError, TsResult};

pub use self::h264::{SpsInfo, parse_sps};

const PTS_MASK: u64 = (1 << 33) - 1;

/// Elementary stream kinds the demuxer can bind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormatKind {
    H264,
    Adts,
    DdPlus,
    /// Discards every byte.
    Null,
}

impl FormatKind {
    /// Map a PMT `stream_type` to a framer.
    pub fn from_stream_type(stream_type: u8) -> Self {
        match stream_type {
            0x1B => FormatKind::H264,
            0x0F => FormatKind::Adts,
            0x84 | 0x87 => FormatKind::DdPlus,
            _ => FormatKind::Null,
        }
    }

    pub fn media_type(self) -> Option<MediaType> {
        match self {
            FormatKind::H264 => Some(MediaType::Video),
            FormatKind::Adts | FormatKind::DdPlus => Some(MediaType::Audio),
            FormatKind::Null => None,
        }
    }
}

/// Segment metadata stamped on every sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SegmentContext {
    /// Declared bitrate of the variant the segment belongs to.
    pub bitrate: u64,
    pub segment: Option<SegmentRef>,
    pub timeline: usize,
}

/// How a frame is timed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FrameTiming {
    /// Fixed sample count; the timestamp is extrapolated from the PES PTS.
    Audio { samples: u32, sample_rate: u32 },
    /// PES PTS; duration is known once the next frame starts.
    Video,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct FrameStart {
    /// `None` while the frame end is unknown.
    size: Option<usize>,
    timing: FrameTiming,
}

/// Requests recorded by one [`FrameParser::parse`] call.
#[derive(Debug, Default)]
pub(crate) struct ParseContext {
    begin: Option<FrameStart>,
    add: usize,
    key_frame: bool,
    descriptor: Option<StreamDescriptor>,
}

impl ParseContext {
    /// Close the open sample and start a new one after the skipped bytes.
    pub(crate) fn begin_sample(&mut self, size: Option<usize>, timing: FrameTiming) {
        self.begin = Some(FrameStart { size, timing });
    }

    /// Append `count` bytes following the skip to the open sample.
    pub(crate) fn add_to_last_sample(&mut self, count: usize) {
        self.add += count;
    }

    pub(crate) fn mark_key_frame(&mut self) {
        self.key_frame = true;
    }

    pub(crate) fn describe(&mut self, descriptor: StreamDescriptor) {
        self.descriptor = Some(descriptor);
    }

    fn made_progress(&self, skip: usize) -> bool {
        skip > 0
            || self.add > 0
            || matches!(self.begin, Some(FrameStart { size: Some(n), .. }) if n > 0)
    }
}

/// Codec specific framing.
pub(crate) trait FrameParser {
    /// Inspect `data` (the pending stream bytes) and return how many leading
    /// bytes to skip. Returning 0 with no request asks for more data.
    fn parse(&mut self, data: &[u8], ctx: &mut ParseContext) -> TsResult<usize>;

    /// Whether [`FrameParser::sample_closed`] wants the payload of the next
    /// closed sample.
    fn wants_closed_payload(&self) -> bool {
        false
    }

    fn sample_closed(&mut self, _payload: &[u8], _ctx: &mut ParseContext) -> TsResult<()> {
        Ok(())
    }

    /// Trim what is left of the stream at a normal flush.
    fn finish_tail<'a>(&mut self, tail: &'a [u8]) -> &'a [u8] {
        tail
    }

    fn reset(&mut self) {}
}

enum Framer {
    H264(H264Framer),
    Adts(AdtsFramer),
    DdPlus(DdPlusFramer),
    Null(NullFramer),
}

impl Framer {
    fn new(kind: FormatKind) -> Self {
        match kind {
            FormatKind::H264 => Framer::H264(H264Framer::default()),
            FormatKind::Adts => Framer::Adts(AdtsFramer::default()),
            FormatKind::DdPlus => Framer::DdPlus(DdPlusFramer::default()),
            FormatKind::Null => Framer::Null(NullFramer),
        }
    }

    fn parser(&mut self) -> &mut dyn FrameParser {
        match self {
            Framer::H264(framer) => framer,
            Framer::Adts(framer) => framer,
            Framer::DdPlus(framer) => framer,
            Framer::Null(framer) => framer,
        }
    }
}

struct OpenSample {
    /// `None` when the frame has no timestamp yet; bytes are dropped.
    sample: Option<Sample>,
    expected: Option<usize>,
    written: usize,
}

impl OpenSample {
    fn missing(&self) -> Option<usize> {
        self.expected.map(|expected| expected - self.written)
    }
}

/// Turns one elementary stream into timestamped samples.
pub struct MediaFormatParser {
    kind: FormatKind,
    framer: Framer,
    buffer: Option<Arc<SampleBuffer>>,
    pending: Vec<u8>,
    /// Absolute stream position of `pending[0]`.
    stream_pos: u64,
    /// `(stream position, pts)` of PES headers not yet reached.
    marks: VecDeque<(u64, u64)>,
    mark: Option<(u64, u64)>,
    frames_since_mark: u64,
    open: Option<OpenSample>,
    /// Closed video sample waiting for the next timestamp to learn its duration.
    held: Option<Sample>,
    last_pts: Option<u64>,
    /// 90 kHz.
    last_duration: u64,
    segment: SegmentContext,
    samples: u64,
}

impl std::fmt::Debug for MediaFormatParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFormatParser")
            .field("kind", &self.kind)
            .field("pending", &self.pending.len())
            .field("stream_pos", &self.stream_pos)
            .field("samples", &self.samples)
            .finish_non_exhaustive()
    }
}

/// 25 fps, used until two video timestamps have been seen.
const DEFAULT_VIDEO_DURATION_90K: u64 = 3_600;

impl MediaFormatParser {
    /// A parser writing into `buffer`. Without a buffer every kind behaves
    /// like [`FormatKind::Null`].
    pub fn new(kind: FormatKind, buffer: Option<Arc<SampleBuffer>>) -> Self {
        let kind = if buffer.is_some() { kind } else { FormatKind::Null };
        Self {
            kind,
            framer: Framer::new(kind),
            buffer,
            pending: Vec::new(),
            stream_pos: 0,
            marks: VecDeque::new(),
            mark: None,
            frames_since_mark: 0,
            open: None,
            held: None,
            last_pts: None,
            last_duration: DEFAULT_VIDEO_DURATION_90K,
            segment: SegmentContext::default(),
            samples: 0,
        }
    }

    pub fn null() -> Self {
        Self::new(FormatKind::Null, None)
    }

    pub fn kind(&self) -> FormatKind {
        self.kind
    }

    /// Samples handed to the buffer so far.
    pub fn samples_emitted(&self) -> u64 {
        self.samples
    }

    pub fn begin_segment(&mut self, segment: SegmentContext) {
        self.segment = segment;
    }

    /// The next written byte starts a PES payload stamped with `pts`.
    pub fn timestamp(&mut self, pts: u64) {
        let position = self.stream_pos + self.pending.len() as u64;
        trace!(kind = ?self.kind, position, pts, "MediaFormatParser: timestamp mark");
        self.marks.push_back((position, pts & PTS_MASK));
    }

    pub fn write_byte(&mut self, byte: u8) -> TsResult<()> {
        self.write(&[byte])
    }

    pub fn write(&mut self, data: &[u8]) -> TsResult<()> {
        self.pending.extend_from_slice(data);
        self.run()
    }

    fn run(&mut self) -> TsResult<()> {
        let data = std::mem::take(&mut self.pending);
        let result = self.frame(&data);
        let consumed = *result.as_ref().unwrap_or(&0);
        self.pending = data;
        self.pending.drain(..consumed);
        self.stream_pos += consumed as u64;
        result.map(|_| ())
    }

    /// Frame as much of `data` as possible, returning the consumed length.
    fn frame(&mut self, data: &[u8]) -> TsResult<usize> {
        let mut consumed = 0;
        while consumed < data.len() {
            let available = data.len() - consumed;

            if let Some(missing) = self.open.as_ref().and_then(OpenSample::missing) {
                let n = missing.min(available);
                self.add(&data[consumed..consumed + n])?;
                consumed += n;
                continue;
            }

            let mut ctx = ParseContext::default();
            let skip = self.framer.parser().parse(&data[consumed..], &mut ctx)?;
            if skip > available {
                return Err(TsError::Internal(format!(
                    "{:?} framer skipped {skip} of {available} bytes",
                    self.kind
                )));
            }
            if ctx.add > available - skip {
                return Err(TsError::Internal(format!(
                    "{:?} framer added {} of {} bytes",
                    self.kind,
                    ctx.add,
                    available - skip
                )));
            }
            let progressed = ctx.made_progress(skip);
            consumed += skip;

            if let Some(descriptor) = ctx.descriptor.take() {
                self.publish(descriptor);
            }
            if let Some(start) = ctx.begin {
                let position = self.stream_pos + consumed as u64;
                self.begin(start, position)?;
            }
            if ctx.key_frame {
                self.mark_key_frame();
            }
            if ctx.add > 0 {
                self.add(&data[consumed..consumed + ctx.add])?;
                consumed += ctx.add;
            }
            if !progressed {
                break;
            }
        }
        Ok(consumed)
    }

    fn publish(&self, descriptor: StreamDescriptor) {
        if let Some(buffer) = &self.buffer {
            buffer.set_descriptor(descriptor);
        }
    }

    fn mark_key_frame(&mut self) {
        if let Some(sample) = self.open.as_mut().and_then(|open| open.sample.as_mut()) {
            sample.key_frame = true;
        }
    }

    /// Timestamp for a frame starting at `position`.
    fn timestamp_for(&mut self, position: u64, timing: FrameTiming) -> Option<u64> {
        while let Some(&(pos, pts)) = self.marks.front() {
            if pos > position {
                break;
            }
            self.marks.pop_front();
            self.mark = Some((pos, pts));
            self.frames_since_mark = 0;
        }
        let (_, base) = self.mark?;
        let index = self.frames_since_mark;
        self.frames_since_mark += 1;

        let pts = match timing {
            FrameTiming::Audio {
                samples,
                sample_rate,
            } => base + index * u64::from(samples) * 90_000 / u64::from(sample_rate.max(1)),
            FrameTiming::Video if index == 0 => base,
            FrameTiming::Video => self.last_pts.map_or(base, |last| last + self.last_duration),
        };
        Some(pts & PTS_MASK)
    }

    fn begin(&mut self, start: FrameStart, position: u64) -> TsResult<()> {
        self.close_open()?;
        let Some(buffer) = self.buffer.clone() else {
            return Ok(());
        };

        let Some(pts) = self.timestamp_for(position, start.timing) else {
            debug!(kind = ?self.kind, position, "MediaFormatParser: frame before first PTS dropped");
            self.open = Some(OpenSample {
                sample: None,
                expected: start.size,
                written: 0,
            });
            return Ok(());
        };

        if start.timing == FrameTiming::Video {
            if let Some(last) = self.last_pts {
                let delta = pts.wrapping_sub(last) & PTS_MASK;
                if delta > 0 && delta < 90_000 * 10 {
                    self.last_duration = delta;
                }
            }
            self.release_held()?;
            self.last_pts = Some(pts);
        }

        let mut sample = buffer.new_sample(start.size.unwrap_or(0))?;
        sample.pts_90k = pts;
        sample.duration = match start.timing {
            FrameTiming::Audio {
                samples,
                sample_rate,
            } => i64::from(samples) * lyra_sample::HNS_PER_SECOND / i64::from(sample_rate.max(1)),
            FrameTiming::Video => 0,
        };
        sample.bitrate = self.segment.bitrate;
        sample.segment = self.segment.segment;
        sample.timeline = self.segment.timeline;

        self.open = Some(OpenSample {
            sample: Some(sample),
            expected: start.size,
            written: 0,
        });
        if start.size == Some(0) {
            self.close_open()?;
        }
        Ok(())
    }

    fn add(&mut self, bytes: &[u8]) -> TsResult<()> {
        let Some(open) = self.open.as_mut() else {
            trace!(kind = ?self.kind, len = bytes.len(), "MediaFormatParser: bytes outside a sample");
            return Ok(());
        };
        if let Some(sample) = open.sample.as_mut() {
            sample.append(bytes)?;
        }
        open.written += bytes.len();
        if open.missing() == Some(0) {
            self.close_open()?;
        }
        Ok(())
    }

    /// Finish the open sample: sized samples must be complete, open ended
    /// ones are taken as they are.
    fn close_open(&mut self) -> TsResult<()> {
        let Some(mut open) = self.open.take() else {
            return Ok(());
        };
        let Some(sample) = open.sample.take() else {
            return Ok(());
        };

        if open.missing().is_some_and(|missing| missing > 0) {
            warn!(
                kind = ?self.kind,
                written = open.written,
                expected = ?open.expected,
                "MediaFormatParser: truncated frame dropped"
            );
            return self.discard(sample);
        }

        if self.framer.parser().wants_closed_payload() && sample.key_frame {
            let payload = sample.payload_to_vec().map_err(lyra_sample::SampleError::from)?;
            let mut ctx = ParseContext::default();
            self.framer.parser().sample_closed(&payload, &mut ctx)?;
            if let Some(descriptor) = ctx.descriptor.take() {
                self.publish(descriptor);
            }
        }

        match self.kind {
            FormatKind::H264 => {
                self.release_held()?;
                self.held = Some(sample);
                Ok(())
            }
            _ => self.enqueue(sample),
        }
    }

    /// Queue the held video sample with the best known duration.
    fn release_held(&mut self) -> TsResult<()> {
        let Some(mut sample) = self.held.take() else {
            return Ok(());
        };
        sample.duration = pts_to_hns(self.last_duration as i64);
        self.enqueue(sample)
    }

    fn enqueue(&mut self, sample: Sample) -> TsResult<()> {
        let Some(buffer) = &self.buffer else {
            return Ok(());
        };
        trace!(
            kind = ?self.kind,
            pts = sample.pts_90k,
            len = sample.payload_len(),
            key = sample.key_frame,
            "MediaFormatParser: sample"
        );
        buffer.enqueue(sample)?;
        self.samples += 1;
        Ok(())
    }

    fn discard(&self, sample: Sample) -> TsResult<()> {
        if let Some(buffer) = &self.buffer {
            buffer.discard(sample)?;
        }
        Ok(())
    }

    /// End of the current run of data.
    ///
    /// With `discontinuity` the open sample and any unparsed bytes are
    /// dropped; otherwise the remaining bytes close the open sample.
    pub fn flush(&mut self, discontinuity: bool) -> TsResult<()> {
        let tail = std::mem::take(&mut self.pending);
        self.stream_pos += tail.len() as u64;

        if discontinuity {
            if let Some(open) = self.open.take() {
                if let Some(sample) = open.sample {
                    self.discard(sample)?;
                }
            }
        } else if self.open.as_ref().is_some_and(|open| open.expected.is_none()) {
            let keep = self.framer.parser().finish_tail(&tail).len();
            self.add(&tail[..keep])?;
            self.close_open()?;
        } else {
            self.close_open()?;
        }

        self.release_held()?;
        self.framer.parser().reset();
        self.marks.clear();
        self.mark = None;
        self.frames_since_mark = 0;
        if discontinuity {
            self.last_pts = None;
        }
        debug!(kind = ?self.kind, discontinuity, samples = self.samples, "MediaFormatParser: flush");
        Ok(())
    }
}
