//! Little-endian wave format descriptors handed to audio decoders.

const WAVE_FORMAT_RAW_AAC1: u16 = 0x00FF;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;
const EXTENSIBLE_EXTRA: u16 = 22;

/// `{0000000A-0CEA-0010-8000-00AA00389B71}`, Dolby Digital Plus.
const KSDATAFORMAT_SUBTYPE_DDPLUS: [u8; 16] = [
    0x0A, 0x00, 0x00, 0x00, 0xEA, 0x0C, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B,
    0x71,
];

pub(crate) const SPEAKER_FRONT_LEFT: u32 = 0x1;
pub(crate) const SPEAKER_FRONT_RIGHT: u32 = 0x2;
pub(crate) const SPEAKER_FRONT_CENTER: u32 = 0x4;
pub(crate) const SPEAKER_LOW_FREQUENCY: u32 = 0x8;
pub(crate) const SPEAKER_BACK_LEFT: u32 = 0x10;
pub(crate) const SPEAKER_BACK_RIGHT: u32 = 0x20;
pub(crate) const SPEAKER_BACK_CENTER: u32 = 0x100;

/// Common WAVEFORMATEX header fields.
#[derive(Clone, Copy, Debug)]
pub(crate) struct WaveFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    fn header(&self, tag: u16, extra: u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(18 + usize::from(extra));
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&self.channels.to_le_bytes());
        out.extend_from_slice(&self.sample_rate.to_le_bytes());
        out.extend_from_slice(&self.avg_bytes_per_sec.to_le_bytes());
        out.extend_from_slice(&self.block_align.to_le_bytes());
        out.extend_from_slice(&self.bits_per_sample.to_le_bytes());
        out.extend_from_slice(&extra.to_le_bytes());
        out
    }

    /// Raw AAC header followed by the AudioSpecificConfig.
    pub(crate) fn raw_aac(&self, audio_specific_config: [u8; 2]) -> String {
        let mut out = self.header(WAVE_FORMAT_RAW_AAC1, 2);
        out.extend_from_slice(&audio_specific_config);
        hex::encode_upper(out)
    }

    /// WAVEFORMATEXTENSIBLE with the DD+ sub-format.
    pub(crate) fn ddplus_extensible(&self, channel_mask: u32) -> String {
        let mut out = self.header(WAVE_FORMAT_EXTENSIBLE, EXTENSIBLE_EXTRA);
        out.extend_from_slice(&self.bits_per_sample.to_le_bytes());
        out.extend_from_slice(&channel_mask.to_le_bytes());
        out.extend_from_slice(&KSDATAFORMAT_SUBTYPE_DDPLUS);
        hex::encode_upper(out)
    }
}
