use std::{collections::BTreeMap, fmt};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Video,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    Aac,
    DdPlus,
}

impl Codec {
    pub fn media_type(self) -> MediaType {
        match self {
            Codec::H264 => MediaType::Video,
            Codec::Aac | Codec::DdPlus => MediaType::Audio,
        }
    }

    /// Four character code reported to the host.
    pub fn fourcc(self) -> &'static str {
        match self {
            Codec::H264 => "H264",
            Codec::Aac => "AAC ",
            Codec::DdPlus => "EC-3",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamAttributes {
    Video {
        width: u32,
        height: u32,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
        channel_mask: u32,
    },
}

/// What the host needs to configure a decoder for one elementary stream.
///
/// Built once per stream by the media format parser, from the first
/// parseable frame header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub codec: Codec,
    /// Hex encoded decoder configuration.
    pub codec_private_data: String,
    pub attributes: StreamAttributes,
}

impl StreamDescriptor {
    pub fn media_type(&self) -> MediaType {
        self.codec.media_type()
    }

    /// Flattened key/value view, one entry per attribute.
    pub fn attribute_map(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        map.insert("CodecPrivateData", self.codec_private_data.clone());
        match &self.attributes {
            StreamAttributes::Video { width, height } => {
                map.insert("VideoFourCC", self.codec.fourcc().to_string());
                map.insert("Width", width.to_string());
                map.insert("Height", height.to_string());
            }
            StreamAttributes::Audio {
                sample_rate,
                channels,
                channel_mask,
            } => {
                map.insert("AudioFourCC", self.codec.fourcc().to_string());
                map.insert("SampleRate", sample_rate.to_string());
                map.insert("Channels", channels.to_string());
                if *channel_mask != 0 {
                    map.insert("ChannelMask", format!("{channel_mask:#x}"));
                }
            }
        }
        map
    }
}
