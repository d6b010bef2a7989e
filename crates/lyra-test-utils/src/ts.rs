//! Synthetic MPEG-TS muxing for demuxer and end-to-end tests.
//!
//! The output is not meant to decode; it only has to be structurally valid:
//! PAT/PMT sections, PES headers with PTS/DTS, ADTS and DD+ frame headers and
//! H.264 access units delimited by AUD NAL units.

use std::collections::HashMap;

use crate::bits::BitWriter;

pub const TS_PACKET_SIZE: usize = 188;
pub const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x0100;
pub const AUDIO_PID: u16 = 0x0101;
pub const STREAM_TYPE_H264: u8 = 0x1B;
pub const STREAM_TYPE_AAC: u8 = 0x0F;
pub const STREAM_TYPE_DDPLUS: u8 = 0x84;
pub const VIDEO_STREAM_ID: u8 = 0xE0;
pub const AUDIO_STREAM_ID: u8 = 0xC0;
pub const DDPLUS_STREAM_ID: u8 = 0xBD;

/// 90 kHz ticks per second.
pub const PTS_HZ: u64 = 90_000;

fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= u32::from(byte) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn timestamp_bytes(prefix: u8, ts: u64) -> [u8; 5] {
    [
        (prefix << 4) | ((((ts >> 30) & 0x07) as u8) << 1) | 1,
        ((ts >> 22) & 0xFF) as u8,
        ((((ts >> 15) & 0x7F) as u8) << 1) | 1,
        ((ts >> 7) & 0xFF) as u8,
        (((ts & 0x7F) as u8) << 1) | 1,
    ]
}

/// Options for one PES packet.
#[derive(Clone, Copy, Debug)]
pub struct PesOptions {
    pub stream_id: u8,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// Write the real packet length instead of 0.
    pub bounded: bool,
    pub data_aligned: bool,
}

impl PesOptions {
    #[must_use]
    pub fn new(stream_id: u8, pts: Option<u64>) -> Self {
        Self {
            stream_id,
            pts,
            dts: None,
            bounded: true,
            data_aligned: true,
        }
    }

    #[must_use]
    pub fn unbounded(mut self) -> Self {
        self.bounded = false;
        self
    }

    #[must_use]
    pub fn with_dts(mut self, dts: u64) -> Self {
        self.dts = Some(dts);
        self
    }

    #[must_use]
    pub fn misaligned(mut self) -> Self {
        self.data_aligned = false;
        self
    }
}

/// Build one PES packet.
#[must_use]
pub fn pes_packet(options: PesOptions, payload: &[u8]) -> Vec<u8> {
    let mut header = Vec::with_capacity(19);
    let flags = match (options.pts, options.dts) {
        (Some(_), Some(_)) => 0xC0,
        (Some(_), None) => 0x80,
        _ => 0x00,
    };
    if let Some(pts) = options.pts {
        let prefix = if options.dts.is_some() { 0x3 } else { 0x2 };
        header.extend_from_slice(&timestamp_bytes(prefix, pts));
        if let Some(dts) = options.dts {
            header.extend_from_slice(&timestamp_bytes(0x1, dts));
        }
    }

    let length = 3 + header.len() + payload.len();
    let length = if options.bounded && length <= 0xFFFF {
        length as u16
    } else {
        0
    };

    let mut out = vec![0x00, 0x00, 0x01, options.stream_id];
    out.extend_from_slice(&length.to_be_bytes());
    out.push(if options.data_aligned { 0x84 } else { 0x80 });
    out.push(flags);
    out.push(header.len() as u8);
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    out
}

/// ADTS frame (AAC LC, no CRC) wrapping `payload`.
#[must_use]
pub fn adts_frame(sample_rate_index: u8, channels: u8, payload: &[u8]) -> Vec<u8> {
    let frame_len = 7 + payload.len();
    let mut out = vec![
        0xFF,
        0xF1,
        (1 << 6) | ((sample_rate_index & 0x0F) << 2) | ((channels >> 2) & 0x01),
        ((channels & 0x03) << 6) | ((frame_len >> 11) as u8 & 0x03),
        ((frame_len >> 3) & 0xFF) as u8,
        (((frame_len & 0x07) as u8) << 5) | 0x1F,
        0xFC,
    ];
    out.extend_from_slice(payload);
    out
}

/// DD+ (E-AC-3) syncframe of `frame_bytes` bytes (even, >= 8).
///
/// `rate_code` is `numblkscod` when `fscod < 3`, or `fscod2` when `fscod == 3`.
#[must_use]
pub fn ddplus_frame(fscod: u8, rate_code: u8, acmod: u8, lfe: bool, frame_bytes: usize) -> Vec<u8> {
    let words = (frame_bytes / 2) as u32;
    let mut bits = BitWriter::new();
    bits.put(0x0B77, 16)
        .put(0, 2)
        .put(0, 3)
        .put(words - 1, 11)
        .put(u32::from(fscod), 2)
        .put(u32::from(rate_code), 2)
        .put(u32::from(acmod), 3)
        .flag(lfe)
        .put(16, 5)
        .put(0, 5);
    let mut out = bits.finish();
    out.resize(words as usize * 2, 0);
    out
}

/// Baseline SPS for `width` x `height` (multiples of 16) without emulation bytes.
#[must_use]
pub fn h264_sps(width: u32, height: u32) -> Vec<u8> {
    let mut bits = BitWriter::new();
    bits.put(0x67, 8)
        .put(66, 8)
        .put(0xC0, 8)
        .put(30, 8)
        .ue(0)
        .ue(0)
        .ue(0)
        .ue(0)
        .ue(1)
        .flag(false)
        .ue(width / 16 - 1)
        .ue(height / 16 - 1)
        .flag(true)
        .flag(true)
        .flag(false)
        .flag(false)
        .trailing();
    bits.finish()
}

#[must_use]
pub fn h264_pps() -> Vec<u8> {
    let mut bits = BitWriter::new();
    bits.put(0x68, 8).ue(0).ue(0).flag(false).flag(false).ue(0).trailing();
    bits.finish()
}

/// One Annex B access unit starting with an AUD.
///
/// Key frames carry SPS, PPS and an IDR slice.
#[must_use]
pub fn h264_access_unit(key_frame: bool, width: u32, height: u32, slice_len: usize) -> Vec<u8> {
    let mut out = vec![0x00, 0x00, 0x00, 0x01, 0x09, 0xF0];
    if key_frame {
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        out.extend_from_slice(&h264_sps(width, height));
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        out.extend_from_slice(&h264_pps());
        out.extend_from_slice(&[0x00, 0x00, 0x01, 0x65]);
    } else {
        out.extend_from_slice(&[0x00, 0x00, 0x01, 0x41]);
    }
    // 0xAB never forms a start code prefix.
    out.extend(std::iter::repeat_n(0xAB, slice_len));
    out
}

/// Packetizer with per-PID continuity counters.
#[derive(Default)]
pub struct TsMuxer {
    out: Vec<u8>,
    counters: HashMap<u16, u8>,
}

impl TsMuxer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the next continuity counter used for `pid`.
    pub fn set_continuity(&mut self, pid: u16, next: u8) -> &mut Self {
        self.counters.insert(pid, next & 0x0F);
        self
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let cc = self.counters.entry(pid).or_insert(0);
        let current = *cc;
        *cc = (*cc + 1) & 0x0F;
        current
    }

    fn header(&mut self, pid: u16, start: bool, adaptation: bool) -> [u8; 4] {
        let cc = self.next_cc(pid);
        [
            0x47,
            (u8::from(start) << 6) | ((pid >> 8) as u8 & 0x1F),
            (pid & 0xFF) as u8,
            (if adaptation { 0x30 } else { 0x10 }) | cc,
        ]
    }

    /// Split `payload` over packets, stuffing the last one via adaptation field.
    pub fn payload(&mut self, pid: u16, payload: &[u8]) -> &mut Self {
        let mut first = true;
        let mut rest = payload;
        while !rest.is_empty() || first {
            let take = rest.len().min(184);
            if take == 184 {
                let header = self.header(pid, first, false);
                self.out.extend_from_slice(&header);
            } else {
                let header = self.header(pid, first, true);
                self.out.extend_from_slice(&header);
                let af_len = 183 - take;
                self.out.push(af_len as u8);
                if af_len > 0 {
                    self.out.push(0x00);
                    self.out.extend(std::iter::repeat_n(0xFF, af_len - 1));
                }
            }
            self.out.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            first = false;
        }
        self
    }

    fn section(&mut self, pid: u16, section: &[u8]) -> &mut Self {
        let crc = crc32_mpeg2(section);
        let mut payload = vec![0x00];
        payload.extend_from_slice(section);
        payload.extend_from_slice(&crc.to_be_bytes());
        payload.resize(184, 0xFF);
        let header = self.header(pid, true, false);
        self.out.extend_from_slice(&header);
        self.out.extend_from_slice(&payload);
        self
    }

    /// PAT listing `(program_number, pmt_pid)` pairs.
    pub fn pat(&mut self, programs: &[(u16, u16)]) -> &mut Self {
        let length = 5 + 4 * programs.len() + 4;
        let mut section = vec![
            0x00,
            0xB0 | ((length >> 8) as u8 & 0x0F),
            (length & 0xFF) as u8,
            0x00,
            0x01,
            0xC1,
            0x00,
            0x00,
        ];
        for &(program, pid) in programs {
            section.extend_from_slice(&program.to_be_bytes());
            section.push(0xE0 | ((pid >> 8) as u8 & 0x1F));
            section.push((pid & 0xFF) as u8);
        }
        self.section(0, &section)
    }

    /// PMT listing `(stream_type, pid)` pairs.
    pub fn pmt(&mut self, pmt_pid: u16, program: u16, streams: &[(u8, u16)]) -> &mut Self {
        let length = 9 + 5 * streams.len() + 4;
        let pcr_pid = streams.first().map_or(0x1FFF, |&(_, pid)| pid);
        let mut section = vec![
            0x02,
            0xB0 | ((length >> 8) as u8 & 0x0F),
            (length & 0xFF) as u8,
        ];
        section.extend_from_slice(&program.to_be_bytes());
        section.extend_from_slice(&[
            0xC1,
            0x00,
            0x00,
            0xE0 | ((pcr_pid >> 8) as u8 & 0x1F),
            (pcr_pid & 0xFF) as u8,
            0xF0,
            0x00,
        ]);
        for &(stream_type, pid) in streams {
            section.extend_from_slice(&[
                stream_type,
                0xE0 | ((pid >> 8) as u8 & 0x1F),
                (pid & 0xFF) as u8,
                0xF0,
                0x00,
            ]);
        }
        self.section(pmt_pid, &section)
    }

    pub fn pes(&mut self, pid: u16, options: PesOptions, payload: &[u8]) -> &mut Self {
        let packet = pes_packet(options, payload);
        self.payload(pid, &packet)
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.out
    }

    #[must_use]
    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }
}

/// Audio flavour of a synthetic segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentAudio {
    None,
    /// 48 kHz stereo AAC.
    Aac,
    /// 48 kHz 5.1 DD+, six blocks per frame.
    DdPlus,
}

/// Shape of a synthetic segment.
#[derive(Clone, Copy, Debug)]
pub struct SegmentSpec {
    pub duration_secs: u32,
    pub video: bool,
    pub audio: SegmentAudio,
    /// PTS of the first access unit, 90 kHz.
    pub start_pts: u64,
    pub width: u32,
    pub height: u32,
    /// Filler bytes per video slice; scales the segment size.
    pub slice_len: usize,
}

impl Default for SegmentSpec {
    fn default() -> Self {
        Self {
            duration_secs: 2,
            video: true,
            audio: SegmentAudio::Aac,
            start_pts: 10 * PTS_HZ,
            width: 320,
            height: 240,
            slice_len: 400,
        }
    }
}

/// Video frame interval at 25 fps in 90 kHz ticks.
pub const VIDEO_FRAME_TICKS: u64 = PTS_HZ / 25;
/// AAC frame interval at 48 kHz in 90 kHz ticks.
pub const AAC_FRAME_TICKS: u64 = 1024 * PTS_HZ / 48_000;
/// DD+ frame interval (1536 samples at 48 kHz) in 90 kHz ticks.
pub const DDPLUS_FRAME_TICKS: u64 = 1536 * PTS_HZ / 48_000;

/// Mux a complete segment: PAT, PMT, then PES packets interleaved by PTS.
///
/// Video PES packets are unbounded (length 0), audio PES packets carry a
/// length and group four frames each. Each segment starts on a key frame.
#[must_use]
pub fn build_segment(spec: &SegmentSpec) -> Vec<u8> {
    let end = spec.start_pts + u64::from(spec.duration_secs) * PTS_HZ;
    let mut streams = Vec::new();
    if spec.video {
        streams.push((STREAM_TYPE_H264, VIDEO_PID));
    }
    match spec.audio {
        SegmentAudio::Aac => streams.push((STREAM_TYPE_AAC, AUDIO_PID)),
        SegmentAudio::DdPlus => streams.push((STREAM_TYPE_DDPLUS, AUDIO_PID)),
        SegmentAudio::None => {}
    }

    let mut mux = TsMuxer::new();
    mux.pat(&[(1, PMT_PID)]).pmt(PMT_PID, 1, &streams);

    let mut video_pts = spec.start_pts;
    let mut audio_pts = spec.start_pts;
    let mut first_video = true;
    let video_done = |pts: u64| !spec.video || pts >= end;
    let audio_done = |pts: u64| spec.audio == SegmentAudio::None || pts >= end;

    while !(video_done(video_pts) && audio_done(audio_pts)) {
        let video_next = !video_done(video_pts) && (audio_done(audio_pts) || video_pts <= audio_pts);
        if video_next {
            let au = h264_access_unit(first_video, spec.width, spec.height, spec.slice_len);
            first_video = false;
            mux.pes(
                VIDEO_PID,
                PesOptions::new(VIDEO_STREAM_ID, Some(video_pts))
                    .with_dts(video_pts)
                    .unbounded(),
                &au,
            );
            video_pts += VIDEO_FRAME_TICKS;
        } else {
            let mut payload = Vec::new();
            let pes_pts = audio_pts;
            for _ in 0..4 {
                if audio_pts >= end {
                    break;
                }
                match spec.audio {
                    SegmentAudio::Aac => {
                        payload.extend_from_slice(&adts_frame(3, 2, &[0x21; 120]));
                        audio_pts += AAC_FRAME_TICKS;
                    }
                    SegmentAudio::DdPlus => {
                        payload.extend_from_slice(&ddplus_frame(0, 3, 7, true, 512));
                        audio_pts += DDPLUS_FRAME_TICKS;
                    }
                    SegmentAudio::None => break,
                }
            }
            let stream_id = if spec.audio == SegmentAudio::DdPlus {
                DDPLUS_STREAM_ID
            } else {
                AUDIO_STREAM_ID
            };
            mux.pes(AUDIO_PID, PesOptions::new(stream_id, Some(pes_pts)), &payload);
        }
    }
    mux.finish()
}
