use lyra_sample::{Codec, StreamAttributes, StreamDescriptor};
use tracing::debug;

use super::{
    FrameParser, FrameTiming, ParseContext,
    wave::{
        SPEAKER_BACK_CENTER, SPEAKER_BACK_LEFT, SPEAKER_BACK_RIGHT, SPEAKER_FRONT_CENTER,
        SPEAKER_FRONT_LEFT, SPEAKER_FRONT_RIGHT, SPEAKER_LOW_FREQUENCY, WaveFormat,
    },
};
use crate::{
    bitstream::BitstreamReader,
    error::{TsError, TsResult},
};

const SYNC_WORD: u32 = 0x0B77;
/// Bytes needed to read through `bsid`.
const HEADER_PEEK: usize = 6;

const SAMPLE_RATES: [u32; 3] = [48_000, 44_100, 32_000];
/// Reduced rates, selected by `fscod2` when `fscod == 3`.
const REDUCED_SAMPLE_RATES: [u32; 3] = [24_000, 22_050, 16_000];
const BLOCKS_PER_FRAME: [u32; 4] = [1, 2, 3, 6];
const SAMPLES_PER_BLOCK: u32 = 256;
/// Full-bandwidth channels per `acmod`.
const ACMOD_CHANNELS: [u16; 8] = [2, 1, 2, 3, 3, 4, 4, 5];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DdPlusHeader {
    pub stream_type: u8,
    /// Whole syncframe in bytes.
    pub frame_size: usize,
    pub sample_rate: u32,
    pub blocks: u32,
    pub acmod: u8,
    pub lfe: bool,
    pub bsid: u8,
}

impl DdPlusHeader {
    pub(crate) fn parse(data: &[u8]) -> TsResult<Self> {
        let mut reader = BitstreamReader::new(data);
        if reader.read_unsigned_bits(16)? != SYNC_WORD {
            return Err(TsError::parse("DD+ sync word missing"));
        }
        let stream_type = reader.read_unsigned_bits(2)? as u8;
        reader.skip_bits(3)?;
        let frame_words = reader.read_unsigned_bits(11)? as usize + 1;
        let fscod = reader.read_unsigned_bits(2)? as usize;
        let rate_code = reader.read_unsigned_bits(2)? as usize;
        let acmod = reader.read_unsigned_bits(3)? as u8;
        let lfe = reader.read_flag()?;
        let bsid = reader.read_unsigned_bits(5)? as u8;

        if bsid <= 10 {
            return Err(TsError::ProtocolViolation(format!(
                "AC-3 bitstream (bsid {bsid}) in a DD+ stream"
            )));
        }
        if bsid > 16 {
            return Err(TsError::parse(format!("DD+ bsid {bsid}")));
        }

        let (sample_rate, blocks) = if fscod == 3 {
            let rate = REDUCED_SAMPLE_RATES
                .get(rate_code)
                .copied()
                .ok_or_else(|| TsError::parse("DD+ reserved fscod2"))?;
            (rate, 6)
        } else {
            (SAMPLE_RATES[fscod], BLOCKS_PER_FRAME[rate_code])
        };

        Ok(Self {
            stream_type,
            frame_size: frame_words * 2,
            sample_rate,
            blocks,
            acmod,
            lfe,
            bsid,
        })
    }

    pub(crate) fn samples(&self) -> u32 {
        self.blocks * SAMPLES_PER_BLOCK
    }

    pub(crate) fn channels(&self) -> u16 {
        ACMOD_CHANNELS[usize::from(self.acmod)] + u16::from(self.lfe)
    }

    pub(crate) fn channel_mask(&self) -> u32 {
        const STEREO: u32 = SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT;
        let mask = match self.acmod {
            1 => SPEAKER_FRONT_CENTER,
            3 => STEREO | SPEAKER_FRONT_CENTER,
            4 => STEREO | SPEAKER_BACK_CENTER,
            5 => STEREO | SPEAKER_FRONT_CENTER | SPEAKER_BACK_CENTER,
            6 => STEREO | SPEAKER_BACK_LEFT | SPEAKER_BACK_RIGHT,
            7 => STEREO | SPEAKER_FRONT_CENTER | SPEAKER_BACK_LEFT | SPEAKER_BACK_RIGHT,
            _ => STEREO,
        };
        if self.lfe {
            mask | SPEAKER_LOW_FREQUENCY
        } else {
            mask
        }
    }

    /// Independent substreams start an access unit; dependent ones extend it.
    pub(crate) fn is_dependent(&self) -> bool {
        self.stream_type == 1
    }

    fn descriptor(&self) -> StreamDescriptor {
        let avg_bytes_per_sec = self.frame_size as u64 * u64::from(self.sample_rate)
            / u64::from(self.samples());
        let format = WaveFormat {
            channels: self.channels(),
            sample_rate: self.sample_rate,
            avg_bytes_per_sec: u32::try_from(avg_bytes_per_sec).unwrap_or(u32::MAX),
            block_align: u16::try_from(self.frame_size).unwrap_or(u16::MAX),
            bits_per_sample: 16,
        };
        StreamDescriptor {
            codec: Codec::DdPlus,
            codec_private_data: format.ddplus_extensible(self.channel_mask()),
            attributes: StreamAttributes::Audio {
                sample_rate: self.sample_rate,
                channels: self.channels(),
                channel_mask: self.channel_mask(),
            },
        }
    }
}

fn find_sync(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|pair| pair == [0x0B, 0x77])
}

/// DD+ framing: one sample per independent syncframe, header kept.
#[derive(Default)]
pub(crate) struct DdPlusFramer {
    described: bool,
    /// Bytes of a dependent substream still to skip.
    skipping: usize,
}

impl FrameParser for DdPlusFramer {
    fn parse(&mut self, data: &[u8], ctx: &mut ParseContext) -> TsResult<usize> {
        if self.skipping > 0 {
            let skip = self.skipping.min(data.len());
            self.skipping -= skip;
            return Ok(skip);
        }
        let Some(start) = find_sync(data) else {
            return Ok(data.len().saturating_sub(1));
        };
        if start > 0 {
            debug!(skipped = start, "DdPlusFramer: resync");
            return Ok(start);
        }
        if data.len() < HEADER_PEEK {
            return Ok(0);
        }

        let header = DdPlusHeader::parse(data)?;
        if header.is_dependent() {
            let skip = header.frame_size.min(data.len());
            self.skipping = header.frame_size - skip;
            return Ok(skip);
        }
        if !self.described {
            self.described = true;
            ctx.describe(header.descriptor());
        }
        ctx.begin_sample(
            Some(header.frame_size),
            FrameTiming::Audio {
                samples: header.samples(),
                sample_rate: header.sample_rate,
            },
        );
        Ok(0)
    }

    fn reset(&mut self) {
        self.skipping = 0;
    }
}
