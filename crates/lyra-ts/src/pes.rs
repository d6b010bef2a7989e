//! PES packet reassembly.

use tracing::{debug, trace, warn};

use crate::{
    bitstream::BitstreamReader,
    error::{TsError, TsResult},
    format::{MediaFormatParser, SegmentContext},
};

/// Start code, stream id, length, flags and header data length.
const FIXED_HEADER_LEN: usize = 9;
const MARKER_LEN: usize = 4;

/// Stream ids whose packets carry no optional header.
fn has_optional_header(stream_id: u8) -> bool {
    !matches!(stream_id, 0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF)
}

/// Timestamps from one PES header, 90 kHz.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PesTimestamps {
    pub pts: Option<u64>,
    pub dts: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PesState {
    /// Waiting for a payload unit start.
    Idle,
    Header,
    Bounded { remaining: usize },
    /// Packets of this stream id carry no parseable payload.
    Discard { remaining: usize },
    Unbounded,
}

/// Reassembles one PID's PES packets and feeds the payload to a
/// [`MediaFormatParser`].
#[derive(Debug)]
pub struct PesParser {
    pid: u16,
    state: PesState,
    header: Vec<u8>,
    /// Bytes of a possible next-packet marker held back in unbounded mode.
    held: Vec<u8>,
    stream_id: Option<u8>,
    alignment_warned: bool,
    format: MediaFormatParser,
    headers: Vec<PesTimestamps>,
    record_headers: bool,
}

fn read_timestamp(reader: &mut BitstreamReader<'_>, prefixes: &[u32]) -> TsResult<u64> {
    let prefix = reader.read_unsigned_bits(4)?;
    if !prefixes.contains(&prefix) {
        return Err(TsError::parse(format!("timestamp prefix {prefix:#x}")));
    }
    let high = reader.read_bits_u64(3)?;
    reader.skip_bits(1)?;
    let mid = reader.read_bits_u64(15)?;
    reader.skip_bits(1)?;
    let low = reader.read_bits_u64(15)?;
    reader.skip_bits(1)?;
    Ok((high << 30) | (mid << 15) | low)
}

impl PesParser {
    pub fn new(pid: u16, format: MediaFormatParser) -> Self {
        Self {
            pid,
            state: PesState::Idle,
            header: Vec::with_capacity(32),
            held: Vec::with_capacity(MARKER_LEN),
            stream_id: None,
            alignment_warned: false,
            format,
            headers: Vec::new(),
            record_headers: false,
        }
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    pub fn format(&self) -> &MediaFormatParser {
        &self.format
    }

    /// Keep every parsed header's timestamps for inspection.
    pub fn with_header_log(mut self) -> Self {
        self.record_headers = true;
        self
    }

    pub fn header_log(&self) -> &[PesTimestamps] {
        &self.headers
    }

    pub fn begin_segment(&mut self, segment: SegmentContext) {
        self.format.begin_segment(segment);
    }

    /// Feed the payload of one TS packet.
    pub fn push(&mut self, mut data: &[u8], unit_start: bool) -> TsResult<()> {
        if unit_start {
            match self.state {
                PesState::Bounded { remaining } => {
                    warn!(pid = self.pid, remaining, "PesParser: packet cut short by a new unit");
                    self.format.flush(true)?;
                    self.begin_header();
                }
                PesState::Header if !self.header.is_empty() => {
                    warn!(pid = self.pid, "PesParser: header cut short by a new unit");
                    self.begin_header();
                }
                PesState::Idle | PesState::Discard { .. } => self.begin_header(),
                PesState::Header | PesState::Unbounded => {}
            }
        }

        while !data.is_empty() {
            match self.state {
                PesState::Idle => {
                    trace!(pid = self.pid, len = data.len(), "PesParser: bytes before unit start");
                    return Ok(());
                }
                PesState::Header => {
                    let used = self.fill_header(data)?;
                    data = &data[used..];
                }
                PesState::Bounded { remaining } => {
                    let n = remaining.min(data.len());
                    self.format.write(&data[..n])?;
                    data = &data[n..];
                    self.state = if n == remaining {
                        self.header.clear();
                        PesState::Header
                    } else {
                        PesState::Bounded {
                            remaining: remaining - n,
                        }
                    };
                }
                PesState::Discard { remaining } => {
                    let n = remaining.min(data.len());
                    data = &data[n..];
                    self.state = if n == remaining {
                        self.header.clear();
                        PesState::Header
                    } else {
                        PesState::Discard {
                            remaining: remaining - n,
                        }
                    };
                }
                PesState::Unbounded => {
                    let used = self.scan_unbounded(data)?;
                    data = &data[used..];
                }
            }
        }
        Ok(())
    }

    fn begin_header(&mut self) {
        self.header.clear();
        self.held.clear();
        self.state = PesState::Header;
    }

    /// Accumulate header bytes, returning how many of `data` were used.
    fn fill_header(&mut self, data: &[u8]) -> TsResult<usize> {
        let wanted = |header: &[u8]| -> usize {
            if header.len() < MARKER_LEN {
                MARKER_LEN
            } else if !has_optional_header(header[3]) {
                6
            } else if header.len() < FIXED_HEADER_LEN {
                FIXED_HEADER_LEN
            } else {
                FIXED_HEADER_LEN + usize::from(header[8])
            }
        };

        let mut used = 0;
        loop {
            let need = wanted(&self.header);
            if self.header.len() >= need {
                break;
            }
            let take = (need - self.header.len()).min(data.len() - used);
            if take == 0 {
                return Ok(used);
            }
            self.header.extend_from_slice(&data[used..used + take]);
            used += take;
            if self.header.len() >= 3 && self.header[..3] != [0x00, 0x00, 0x01] {
                let prefix = self.header[..3].to_vec();
                self.state = PesState::Idle;
                self.header.clear();
                return Err(TsError::parse(format!(
                    "PES start code missing on pid {}: {prefix:02x?}",
                    self.pid
                )));
            }
        }

        self.parse_header()?;
        Ok(used)
    }

    fn parse_header(&mut self) -> TsResult<()> {
        let stream_id = self.header[3];
        let packet_length = usize::from(u16::from_be_bytes([self.header[4], self.header[5]]));

        if !has_optional_header(stream_id) {
            trace!(pid = self.pid, stream_id, packet_length, "PesParser: skipping packet");
            self.state = if packet_length == 0 {
                PesState::Idle
            } else {
                PesState::Discard {
                    remaining: packet_length,
                }
            };
            return Ok(());
        }

        if self.stream_id.is_some_and(|known| known != stream_id) {
            debug!(pid = self.pid, stream_id, "PesParser: stream id changed");
        }
        self.stream_id = Some(stream_id);

        let mut reader = BitstreamReader::new(&self.header[6..]);
        if reader.read_unsigned_bits(2)? != 0b10 {
            return Err(TsError::parse("PES optional header marker bits"));
        }
        reader.skip_bits(3)?;
        let data_aligned = reader.read_flag()?;
        reader.skip_bits(2)?;
        let pts_dts_flags = reader.read_unsigned_bits(2)?;
        reader.skip_bits(6)?;
        let header_data_length = usize::from(reader.read_byte()?);

        if !data_aligned && !self.alignment_warned {
            self.alignment_warned = true;
            warn!(pid = self.pid, "PesParser: data_alignment_indicator is 0");
        }

        let mut timestamps = PesTimestamps::default();
        match pts_dts_flags {
            0b10 => timestamps.pts = Some(read_timestamp(&mut reader, &[0x2, 0x3])?),
            0b11 => {
                timestamps.pts = Some(read_timestamp(&mut reader, &[0x2, 0x3])?);
                timestamps.dts = Some(read_timestamp(&mut reader, &[0x1])?);
            }
            0b00 => {}
            _ => return Err(TsError::parse("PES PTS_DTS_flags = 01")),
        }

        trace!(
            pid = self.pid,
            stream_id,
            packet_length,
            pts = ?timestamps.pts,
            dts = ?timestamps.dts,
            "PesParser: header"
        );
        if self.record_headers {
            self.headers.push(timestamps);
        }
        if let Some(pts) = timestamps.pts {
            self.format.timestamp(pts);
        }

        self.state = if packet_length == 0 {
            PesState::Unbounded
        } else {
            let body = packet_length
                .checked_sub(3 + header_data_length)
                .ok_or_else(|| {
                    TsError::parse(format!(
                        "PES length {packet_length} shorter than its header ({header_data_length})"
                    ))
                })?;
            PesState::Bounded { remaining: body }
        };
        Ok(())
    }

    /// Forward unbounded payload until the next `00 00 01 <stream id>`,
    /// returning how many bytes of `data` were used.
    fn scan_unbounded(&mut self, data: &[u8]) -> TsResult<usize> {
        let marker = [0x00, 0x00, 0x01, self.stream_id.unwrap_or(0xE0)];
        let held = std::mem::take(&mut self.held);
        let total = held.len() + data.len();
        let at = |i: usize| {
            if i < held.len() {
                held[i]
            } else {
                data[i - held.len()]
            }
        };

        let found = (0..total.saturating_sub(MARKER_LEN - 1))
            .find(|&start| (0..MARKER_LEN).all(|k| at(start + k) == marker[k]));

        match found {
            Some(start) => {
                self.forward(&held, data, start)?;
                self.header.clear();
                self.header.extend_from_slice(&marker);
                self.state = PesState::Header;
                Ok(start + MARKER_LEN - held.len())
            }
            None => {
                // The last bytes may begin the next marker.
                let keep = total.min(MARKER_LEN - 1);
                self.forward(&held, data, total - keep)?;
                self.held = (total - keep..total).map(at).collect();
                Ok(data.len())
            }
        }
    }

    /// Forward the first `count` bytes of `held ++ data`.
    fn forward(&mut self, held: &[u8], data: &[u8], count: usize) -> TsResult<()> {
        let from_held = count.min(held.len());
        if from_held > 0 {
            self.format.write(&held[..from_held])?;
        }
        if count > held.len() {
            self.format.write(&data[..count - held.len()])?;
        }
        Ok(())
    }

    /// End of data for this PID.
    ///
    /// With `discontinuity` the in-flight sample is discarded, otherwise it
    /// is finalized.
    pub fn flush(&mut self, discontinuity: bool) -> TsResult<()> {
        if !discontinuity && self.state == PesState::Unbounded && !self.held.is_empty() {
            let held = std::mem::take(&mut self.held);
            self.format.write(&held)?;
        }
        self.held.clear();
        self.header.clear();
        self.state = PesState::Idle;
        self.format.flush(discontinuity)
    }
}
