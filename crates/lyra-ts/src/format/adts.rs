use lyra_sample::{Codec, StreamAttributes, StreamDescriptor};
use tracing::debug;

use super::{
    FrameParser, FrameTiming, ParseContext,
    wave::{
        SPEAKER_BACK_LEFT, SPEAKER_BACK_RIGHT, SPEAKER_FRONT_CENTER, SPEAKER_FRONT_LEFT,
        SPEAKER_FRONT_RIGHT, SPEAKER_LOW_FREQUENCY, WaveFormat,
    },
};
use crate::{
    bitstream::BitstreamReader,
    error::{TsError, TsResult},
};

const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
    8_000, 7_350,
];

const SAMPLES_PER_BLOCK: u32 = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AdtsHeader {
    pub profile: u8,
    pub sample_rate_index: u8,
    pub channel_config: u8,
    /// Whole frame, header included.
    pub frame_length: usize,
    pub header_length: usize,
    pub raw_blocks: u8,
}

impl AdtsHeader {
    pub(crate) fn parse(data: &[u8]) -> TsResult<Self> {
        let mut reader = BitstreamReader::new(data);
        if reader.read_unsigned_bits(12)? != 0xFFF {
            return Err(TsError::parse("ADTS sync word missing"));
        }
        reader.skip_bits(1 + 2)?;
        let protection_absent = reader.read_flag()?;
        let profile = reader.read_unsigned_bits(2)? as u8;
        let sample_rate_index = reader.read_unsigned_bits(4)? as u8;
        reader.skip_bits(1)?;
        let channel_config = reader.read_unsigned_bits(3)? as u8;
        reader.skip_bits(4)?;
        let frame_length = reader.read_unsigned_bits(13)? as usize;
        reader.skip_bits(11)?;
        let raw_blocks = reader.read_unsigned_bits(2)? as u8;

        let header_length = if protection_absent { 7 } else { 9 };
        if usize::from(sample_rate_index) >= SAMPLE_RATES.len() {
            return Err(TsError::parse(format!(
                "ADTS sample rate index {sample_rate_index}"
            )));
        }
        if frame_length < header_length {
            return Err(TsError::parse(format!(
                "ADTS frame length {frame_length} below header length {header_length}"
            )));
        }
        Ok(Self {
            profile,
            sample_rate_index,
            channel_config,
            frame_length,
            header_length,
            raw_blocks,
        })
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[usize::from(self.sample_rate_index)]
    }

    pub(crate) fn samples(&self) -> u32 {
        SAMPLES_PER_BLOCK * (u32::from(self.raw_blocks) + 1)
    }

    pub(crate) fn channels(&self) -> u16 {
        match self.channel_config {
            0 | 2 => 2,
            7 => 8,
            n => u16::from(n),
        }
    }

    fn channel_mask(&self) -> u32 {
        const STEREO: u32 = SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT;
        match self.channel_config {
            1 => SPEAKER_FRONT_CENTER,
            3 => STEREO | SPEAKER_FRONT_CENTER,
            4 | 5 => STEREO | SPEAKER_FRONT_CENTER | SPEAKER_BACK_LEFT | SPEAKER_BACK_RIGHT,
            6 => {
                STEREO
                    | SPEAKER_FRONT_CENTER
                    | SPEAKER_LOW_FREQUENCY
                    | SPEAKER_BACK_LEFT
                    | SPEAKER_BACK_RIGHT
            }
            _ => 0,
        }
    }

    /// Two byte AudioSpecificConfig.
    pub(crate) fn audio_specific_config(&self) -> [u8; 2] {
        let object_type = self.profile + 1;
        [
            (object_type << 3) | (self.sample_rate_index >> 1),
            ((self.sample_rate_index & 0x01) << 7) | (self.channel_config << 3),
        ]
    }

    fn descriptor(&self) -> StreamDescriptor {
        let format = WaveFormat {
            channels: self.channels(),
            sample_rate: self.sample_rate(),
            avg_bytes_per_sec: 0,
            block_align: 1,
            bits_per_sample: 16,
        };
        StreamDescriptor {
            codec: Codec::Aac,
            codec_private_data: format.raw_aac(self.audio_specific_config()),
            attributes: StreamAttributes::Audio {
                sample_rate: self.sample_rate(),
                channels: self.channels(),
                channel_mask: self.channel_mask(),
            },
        }
    }
}

fn find_sync(data: &[u8]) -> Option<usize> {
    data.windows(2)
        .position(|pair| pair[0] == 0xFF && pair[1] & 0xF0 == 0xF0)
}

/// ADTS framing: one sample per frame, header stripped.
#[derive(Default)]
pub(crate) struct AdtsFramer {
    described: bool,
}

impl FrameParser for AdtsFramer {
    fn parse(&mut self, data: &[u8], ctx: &mut ParseContext) -> TsResult<usize> {
        let Some(start) = find_sync(data) else {
            // A trailing 0xFF may be the first half of a sync word.
            return Ok(data.len().saturating_sub(1));
        };
        if start > 0 {
            debug!(skipped = start, "AdtsFramer: resync");
            return Ok(start);
        }
        if data.len() < 7 {
            return Ok(0);
        }

        let header = AdtsHeader::parse(data)?;
        if data.len() < header.header_length {
            return Ok(0);
        }
        if !self.described {
            self.described = true;
            ctx.describe(header.descriptor());
        }
        ctx.begin_sample(
            Some(header.frame_length - header.header_length),
            FrameTiming::Audio {
                samples: header.samples(),
                sample_rate: header.sample_rate(),
            },
        );
        Ok(header.header_length)
    }
}
