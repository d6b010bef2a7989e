//! Transport stream packet layer.

use std::{collections::HashMap, sync::Arc};

use lyra_sample::{MediaType, SampleBuffer};
use tracing::{debug, trace, warn};

use crate::{
    error::{TsError, TsResult},
    format::{FormatKind, MediaFormatParser, SegmentContext},
    pes::PesParser,
    psi::{SectionAssembler, parse_pat, parse_pmt},
};

pub const TS_PACKET_SIZE: usize = 188;
const SYNC_BYTE: u8 = 0x47;
const PAT_PID: u16 = 0x0000;
const NULL_PID: u16 = 0x1FFF;

/// Counters kept across segments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub packets: u64,
    pub continuity_errors: u64,
    pub sync_losses: u64,
    /// Packets flagged by `transport_error_indicator`.
    pub transport_errors: u64,
    /// Recoverable PSI/PES/framing errors.
    pub parse_errors: u64,
}

/// Splits a transport stream into elementary streams and feeds the bound
/// video and audio [`SampleBuffer`]s.
///
/// Only the first program of the PAT is demuxed. Within it, the lowest PID
/// of each media type is bound; other PIDs of the same type are read and
/// dropped.
pub struct TsDemux {
    video: Option<Arc<SampleBuffer>>,
    audio: Option<Arc<SampleBuffer>>,
    /// Bytes of an incomplete packet carried into the next push.
    carry: Vec<u8>,
    in_sync: bool,
    continuity: HashMap<u16, u8>,
    pat: SectionAssembler,
    pmt: SectionAssembler,
    pmt_pid: Option<u16>,
    /// Last accepted PMT section; identical repeats are not reparsed.
    pmt_section: Option<Vec<u8>>,
    streams: HashMap<u16, PesParser>,
    segment: SegmentContext,
    stats: DemuxStats,
}

impl std::fmt::Debug for TsDemux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsDemux")
            .field("pmt_pid", &self.pmt_pid)
            .field("streams", &self.streams.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl TsDemux {
    pub fn new(video: Option<Arc<SampleBuffer>>, audio: Option<Arc<SampleBuffer>>) -> Self {
        Self {
            video,
            audio,
            carry: Vec::with_capacity(TS_PACKET_SIZE),
            in_sync: true,
            continuity: HashMap::new(),
            pat: SectionAssembler::default(),
            pmt: SectionAssembler::default(),
            pmt_pid: None,
            pmt_section: None,
            streams: HashMap::new(),
            segment: SegmentContext::default(),
            stats: DemuxStats::default(),
        }
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    /// Bound PIDs and the framer each one feeds, ordered by PID.
    pub fn bound_pids(&self) -> Vec<(u16, FormatKind)> {
        let mut pids: Vec<_> = self
            .streams
            .iter()
            .map(|(&pid, parser)| (pid, parser.format().kind()))
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Stamp following samples with `segment`.
    pub fn begin_segment(&mut self, segment: SegmentContext) {
        self.segment = segment;
        for parser in self.streams.values_mut() {
            parser.begin_segment(segment);
        }
    }

    /// Feed raw segment bytes in chunks of any size.
    pub fn push(&mut self, data: &[u8]) -> TsResult<()> {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(data);

        let mut pos = 0;
        let mut result = Ok(());
        while bytes.len() - pos >= TS_PACKET_SIZE {
            if bytes[pos] != SYNC_BYTE {
                if self.in_sync {
                    self.stats.sync_losses += 1;
                    warn!(offset = pos, "TsDemux: lost sync");
                    self.in_sync = false;
                }
                match find_sync(&bytes, pos + 1) {
                    Some(next) => pos = next,
                    None => {
                        pos = bytes.len();
                        break;
                    }
                }
                continue;
            }
            if !self.in_sync {
                debug!(offset = pos, "TsDemux: sync regained");
                self.in_sync = true;
            }
            result = self.packet(&bytes[pos..pos + TS_PACKET_SIZE]);
            pos += TS_PACKET_SIZE;
            if result.is_err() {
                break;
            }
        }

        bytes.drain(..pos);
        self.carry = bytes;
        result
    }

    fn packet(&mut self, packet: &[u8]) -> TsResult<()> {
        self.stats.packets += 1;
        if packet[1] & 0x80 != 0 {
            self.stats.transport_errors += 1;
            trace!("TsDemux: transport error indicator set, packet dropped");
            return Ok(());
        }
        let unit_start = packet[1] & 0x40 != 0;
        let pid = u16::from_be_bytes([packet[1] & 0x1F, packet[2]]);
        if pid == NULL_PID {
            return Ok(());
        }
        let adaptation = packet[3] & 0x20 != 0;
        let has_payload = packet[3] & 0x10 != 0;
        let cc = packet[3] & 0x0F;

        let mut offset = 4;
        let mut discontinuity_indicator = false;
        if adaptation {
            let length = usize::from(packet[4]);
            if length > 0 {
                discontinuity_indicator = packet[5] & 0x80 != 0;
            }
            offset = 5 + length;
            if offset > TS_PACKET_SIZE {
                return self.recover(pid, TsError::parse(format!("adaptation field length {length}")));
            }
        }
        if !has_payload {
            return Ok(());
        }

        if let Some(previous) = self.continuity.insert(pid, cc) {
            if !discontinuity_indicator {
                if cc == previous {
                    trace!(pid, cc, "TsDemux: duplicate packet skipped");
                    return Ok(());
                }
                if cc != (previous + 1) & 0x0F {
                    self.stats.continuity_errors += 1;
                    warn!(pid, expected = (previous + 1) & 0x0F, found = cc, "TsDemux: continuity error");
                    self.reset_section(pid);
                    self.flush_stream(pid)?;
                }
            }
        }

        let payload = &packet[offset..];
        let result = if pid == PAT_PID {
            self.on_pat(payload, unit_start)
        } else if Some(pid) == self.pmt_pid {
            self.on_pmt(payload, unit_start)
        } else if let Some(parser) = self.streams.get_mut(&pid) {
            parser.push(payload, unit_start)
        } else {
            Ok(())
        };
        match result {
            Ok(()) => Ok(()),
            Err(error) => self.recover(pid, error),
        }
    }

    /// Fatal errors propagate; anything else costs the PID its partial state.
    fn recover(&mut self, pid: u16, error: TsError) -> TsResult<()> {
        if error.is_fatal() {
            return Err(error);
        }
        self.stats.parse_errors += 1;
        warn!(pid, %error, "TsDemux: dropping partial data");
        self.reset_section(pid);
        self.flush_stream(pid)
    }

    fn reset_section(&mut self, pid: u16) {
        if pid == PAT_PID {
            self.pat.reset();
        } else if Some(pid) == self.pmt_pid {
            self.pmt.reset();
        }
    }

    fn flush_stream(&mut self, pid: u16) -> TsResult<()> {
        let Some(parser) = self.streams.get_mut(&pid) else {
            return Ok(());
        };
        match parser.flush(true) {
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                self.stats.parse_errors += 1;
                warn!(pid, %error, "TsDemux: flush failed");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn on_pat(&mut self, payload: &[u8], unit_start: bool) -> TsResult<()> {
        let Some(section) = self.pat.push(payload, unit_start)? else {
            return Ok(());
        };
        let programs: Vec<_> = parse_pat(&section)?
            .into_iter()
            .filter(|entry| entry.program_number != 0)
            .collect();
        let Some(first) = programs.first() else {
            return Err(TsError::parse("PAT lists no program"));
        };
        if programs.len() > 1 {
            warn!(
                programs = programs.len(),
                program = first.program_number,
                "TsDemux: multiple programs, demuxing the first"
            );
        }
        if self.pmt_pid != Some(first.pmt_pid) {
            debug!(pmt_pid = first.pmt_pid, "TsDemux: PMT pid");
            self.pmt_pid = Some(first.pmt_pid);
            self.pmt.reset();
            self.pmt_section = None;
        }
        Ok(())
    }

    fn on_pmt(&mut self, payload: &[u8], unit_start: bool) -> TsResult<()> {
        let Some(section) = self.pmt.push(payload, unit_start)? else {
            return Ok(());
        };
        if self.pmt_section.as_ref() == Some(&section) {
            return Ok(());
        }
        let pmt = parse_pmt(&section)?;
        self.pmt_section = Some(section);

        let mut video_pid = None;
        let mut audio_pid = None;
        for stream in &pmt.streams {
            let slot = match FormatKind::from_stream_type(stream.stream_type).media_type() {
                Some(MediaType::Video) => &mut video_pid,
                Some(MediaType::Audio) => &mut audio_pid,
                None => continue,
            };
            if slot.is_none_or(|pid| stream.pid < pid) {
                *slot = Some(stream.pid);
            }
        }

        let mut bound = HashMap::new();
        for stream in &pmt.streams {
            let kind = FormatKind::from_stream_type(stream.stream_type);
            let buffer = match kind.media_type() {
                Some(MediaType::Video) if video_pid == Some(stream.pid) => self.video.clone(),
                Some(MediaType::Audio) if audio_pid == Some(stream.pid) => self.audio.clone(),
                Some(_) => None,
                None => {
                    trace!(
                        pid = stream.pid,
                        stream_type = stream.stream_type,
                        "TsDemux: unsupported stream ignored"
                    );
                    continue;
                }
            };
            let kind = if buffer.is_some() { kind } else { FormatKind::Null };

            if let Some(existing) = self.streams.remove(&stream.pid) {
                if existing.format().kind() == kind {
                    bound.insert(stream.pid, existing);
                    continue;
                }
                self.retire(existing)?;
            }
            debug!(pid = stream.pid, ?kind, "TsDemux: bound elementary stream");
            let mut parser = PesParser::new(stream.pid, MediaFormatParser::new(kind, buffer));
            parser.begin_segment(self.segment);
            bound.insert(stream.pid, parser);
        }

        let stale: Vec<_> = self.streams.drain().map(|(_, parser)| parser).collect();
        for parser in stale {
            self.retire(parser)?;
        }
        self.streams = bound;
        Ok(())
    }

    fn retire(&mut self, mut parser: PesParser) -> TsResult<()> {
        debug!(pid = parser.pid(), "TsDemux: stream unbound");
        match parser.flush(true) {
            Err(error) if error.is_fatal() => Err(error),
            _ => Ok(()),
        }
    }

    fn flush_all(&mut self, discontinuity: bool) -> TsResult<()> {
        let mut first_error = None;
        for parser in self.streams.values_mut() {
            if let Err(error) = parser.flush(discontinuity) {
                if error.is_fatal() {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                } else {
                    self.stats.parse_errors += 1;
                    warn!(pid = parser.pid(), %error, "TsDemux: flush failed");
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn reset_packet_state(&mut self) {
        if !self.carry.is_empty() {
            debug!(len = self.carry.len(), "TsDemux: partial packet dropped");
            self.carry.clear();
        }
        self.in_sync = true;
        self.continuity.clear();
        self.pat.reset();
        self.pmt.reset();
    }

    /// The segment ended cleanly: emit every complete frame still pending.
    pub fn end_of_segment(&mut self) -> TsResult<()> {
        self.reset_packet_state();
        self.flush_all(false)
    }

    /// Following data does not continue the previous data; partial frames
    /// are dropped. Stream bindings survive.
    pub fn discontinuity(&mut self) -> TsResult<()> {
        self.reset_packet_state();
        self.flush_all(true)
    }

    /// Forget everything including the program tables.
    pub fn reset(&mut self) -> TsResult<()> {
        let result = self.discontinuity();
        self.streams.clear();
        self.pmt_pid = None;
        self.pmt_section = None;
        result
    }
}

/// Next offset at or after `from` holding a sync byte that is followed by
/// another one a packet later, or that is too close to the end to check.
fn find_sync(bytes: &[u8], from: usize) -> Option<usize> {
    (from..bytes.len()).find(|&i| {
        bytes[i] == SYNC_BYTE
            && bytes
                .get(i + TS_PACKET_SIZE)
                .is_none_or(|&next| next == SYNC_BYTE)
    })
}
