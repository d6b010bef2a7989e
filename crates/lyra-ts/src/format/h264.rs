use lyra_sample::{Codec, StreamAttributes, StreamDescriptor};
use tracing::{debug, warn};

use super::{FrameParser, FrameTiming, ParseContext};
use crate::{
    bitstream::BitstreamReader,
    error::{TsError, TsResult},
};

const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_AUD: u8 = 9;

/// Start code plus AUD header byte.
const AUD_MARKER_LEN: usize = 4;

/// Fields of a sequence parameter set needed to configure a decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
}

/// Drop `emulation_prevention_three_byte`s.
fn unescape_rbsp(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zeros = 0;
    for &byte in nal {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

fn skip_scaling_list(reader: &mut BitstreamReader<'_>, size: usize) -> TsResult<()> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = reader.read_se()?;
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

/// Parse an SPS NAL unit, header byte included.
pub fn parse_sps(nal: &[u8]) -> TsResult<SpsInfo> {
    let rbsp = unescape_rbsp(nal);
    let mut reader = BitstreamReader::new(&rbsp);
    let header = reader.read_byte()?;
    if header & 0x1F != NAL_SPS {
        return Err(TsError::parse(format!("NAL type {} is not an SPS", header & 0x1F)));
    }
    let profile_idc = reader.read_byte()?;
    reader.skip_bits(8)?;
    let level_idc = reader.read_byte()?;
    reader.read_ue()?;

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = reader.read_ue()?;
        if chroma_format_idc == 3 {
            separate_colour_plane = reader.read_flag()?;
        }
        reader.read_ue()?;
        reader.read_ue()?;
        reader.skip_bits(1)?;
        if reader.read_flag()? {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if reader.read_flag()? {
                    skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    reader.read_ue()?;
    match reader.read_ue()? {
        0 => {
            reader.read_ue()?;
        }
        1 => {
            reader.skip_bits(1)?;
            reader.read_se()?;
            reader.read_se()?;
            let cycle = reader.read_ue()?;
            for _ in 0..cycle {
                reader.read_se()?;
            }
        }
        _ => {}
    }
    reader.read_ue()?;
    reader.skip_bits(1)?;

    let width_mbs = reader.read_ue()? + 1;
    let height_map_units = reader.read_ue()? + 1;
    let frame_mbs_only = reader.read_flag()?;
    if !frame_mbs_only {
        reader.skip_bits(1)?;
    }
    reader.skip_bits(1)?;

    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
    if reader.read_flag()? {
        crop_left = reader.read_ue()?;
        crop_right = reader.read_ue()?;
        crop_top = reader.read_ue()?;
        crop_bottom = reader.read_ue()?;
    }

    let field_factor = if frame_mbs_only { 1 } else { 2 };
    let (crop_unit_x, crop_unit_y) = match (chroma_format_idc, separate_colour_plane) {
        (0, _) | (3, true) => (1, field_factor),
        (1, _) => (2, 2 * field_factor),
        (2, _) => (2, field_factor),
        _ => (1, field_factor),
    };

    let width = (width_mbs * 16)
        .checked_sub(crop_unit_x * (crop_left + crop_right))
        .ok_or_else(|| TsError::parse("SPS crop exceeds width"))?;
    let height = (field_factor * height_map_units * 16)
        .checked_sub(crop_unit_y * (crop_top + crop_bottom))
        .ok_or_else(|| TsError::parse("SPS crop exceeds height"))?;

    Ok(SpsInfo {
        profile_idc,
        level_idc,
        width,
        height,
    })
}

/// NAL units of an Annex B byte string, start codes removed.
fn nal_units(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }
    let ends: Vec<usize> = starts
        .iter()
        .skip(1)
        .map(|&next| {
            let mut end = next - 3;
            while end > 0 && data[end - 1] == 0 {
                end -= 1;
            }
            end
        })
        .chain(std::iter::once(data.len()))
        .collect();
    starts
        .into_iter()
        .zip(ends)
        .filter(|(start, end)| start < end)
        .map(move |(start, end)| &data[start..end])
}

/// Annex B framing on access unit delimiters.
#[derive(Default)]
pub(crate) struct H264Framer {
    described: bool,
}

impl H264Framer {
    fn describe(payload: &[u8]) -> TsResult<Option<StreamDescriptor>> {
        let mut sps = None;
        let mut pps = None;
        for nal in nal_units(payload) {
            match nal[0] & 0x1F {
                NAL_SPS if sps.is_none() => sps = Some(nal),
                NAL_PPS if pps.is_none() => pps = Some(nal),
                _ => {}
            }
        }
        let (Some(sps), Some(pps)) = (sps, pps) else {
            return Ok(None);
        };
        let info = parse_sps(sps)?;
        debug!(
            profile = info.profile_idc,
            level = info.level_idc,
            width = info.width,
            height = info.height,
            "H264Framer: SPS"
        );
        Ok(Some(StreamDescriptor {
            codec: Codec::H264,
            codec_private_data: format!(
                "00000001{}00000001{}",
                hex::encode_upper(sps),
                hex::encode_upper(pps)
            ),
            attributes: StreamAttributes::Video {
                width: info.width,
                height: info.height,
            },
        }))
    }
}

impl FrameParser for H264Framer {
    fn parse(&mut self, data: &[u8], ctx: &mut ParseContext) -> TsResult<usize> {
        let mut i = 0;
        while i + AUD_MARKER_LEN <= data.len() {
            if data[i] != 0 || data[i + 1] != 0 || data[i + 2] != 1 {
                i += 1;
                continue;
            }
            match data[i + 3] & 0x1F {
                NAL_AUD => {
                    let zeros = data[..i].iter().rev().take_while(|&&b| b == 0).count();
                    if zeros == i {
                        // Only start code padding precedes the delimiter.
                        ctx.begin_sample(None, FrameTiming::Video);
                        ctx.add_to_last_sample(AUD_MARKER_LEN);
                        return Ok(i);
                    }
                    // The zero bytes belong to the next access unit's start code.
                    ctx.add_to_last_sample(i - zeros);
                    return Ok(0);
                }
                NAL_IDR => ctx.mark_key_frame(),
                _ => {}
            }
            i += 3;
        }
        // The last three bytes may begin a start code.
        ctx.add_to_last_sample(data.len().saturating_sub(AUD_MARKER_LEN - 1));
        Ok(0)
    }

    fn wants_closed_payload(&self) -> bool {
        !self.described
    }

    fn sample_closed(&mut self, payload: &[u8], ctx: &mut ParseContext) -> TsResult<()> {
        match Self::describe(payload) {
            Ok(Some(descriptor)) => {
                self.described = true;
                ctx.describe(descriptor);
            }
            Ok(None) => {}
            Err(error) => warn!(%error, "H264Framer: unusable SPS"),
        }
        Ok(())
    }

    fn finish_tail<'a>(&mut self, tail: &'a [u8]) -> &'a [u8] {
        let end = tail.len() - tail.iter().rev().take_while(|&&b| b == 0).count();
        &tail[..end]
    }
}
