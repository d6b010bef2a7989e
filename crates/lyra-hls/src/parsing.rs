//! Extended M3U parsing.

use std::time::Duration;

use hls_m3u8::{
    Decryptable, MasterPlaylist as HlsMasterPlaylist, MediaPlaylist as HlsMediaPlaylist,
    tags::VariantStream as HlsVariantStreamTag, types::DecryptionKey as HlsDecryptionKey,
};
use tracing::{trace, warn};

use crate::error::{HlsError, HlsResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionMethod {
    Aes128,
    SampleAes,
    Other(String),
}

/// A parsed `#EXT-X-KEY` in effect for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub method: EncryptionMethod,
    /// Key URI, possibly relative to the playlist.
    pub uri: String,
    /// Explicit IV; the media sequence number is used when absent.
    pub iv: Option<[u8; 16]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantStream {
    pub uri: String,
    pub bandwidth: u64,
    pub codecs: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MasterPlaylist {
    pub variants: Vec<VariantStream>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    pub sequence: u64,
    pub uri: String,
    pub duration: Duration,
    pub key: Option<KeyInfo>,
    /// Preceded by `#EXT-X-DISCONTINUITY`.
    pub discontinuity: bool,
    /// Raw `#EXT-X-PROGRAM-DATE-TIME` value.
    pub program_date_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub segments: Vec<MediaSegment>,
    pub target_duration: Duration,
    pub media_sequence: u64,
    pub end_list: bool,
}

#[derive(Debug, Clone)]
pub enum Playlist {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}

fn as_text(data: &[u8]) -> HlsResult<&str> {
    std::str::from_utf8(data).map_err(|e| HlsError::PlaylistParse(e.to_string()))
}

/// Parse either playlist kind. A media playlist stands for a program with a
/// single variant.
pub fn parse_playlist(data: &[u8]) -> HlsResult<Playlist> {
    let input = as_text(data)?;
    if input.contains("#EXT-X-STREAM-INF") {
        parse_master_playlist(data).map(Playlist::Master)
    } else {
        parse_media_playlist(data).map(Playlist::Media)
    }
}

pub fn parse_master_playlist(data: &[u8]) -> HlsResult<MasterPlaylist> {
    let input = as_text(data)?;
    let hls_master = HlsMasterPlaylist::try_from(input)
        .map_err(|e| HlsError::PlaylistParse(e.to_string()))?
        .into_owned();

    let variants: Vec<VariantStream> = hls_master
        .variant_streams
        .iter()
        .filter_map(|vs| match vs {
            HlsVariantStreamTag::ExtXStreamInf {
                uri, stream_data, ..
            } => Some(VariantStream {
                uri: uri.to_string(),
                bandwidth: stream_data.bandwidth(),
                codecs: stream_data.codecs().map(|c| c.to_string()),
            }),
            // I-frame playlists cannot be played through.
            HlsVariantStreamTag::ExtXIFrame { .. } => None,
        })
        .collect();

    if variants.is_empty() {
        return Err(HlsError::PlaylistParse("master playlist has no variants".into()));
    }
    trace!(variants = variants.len(), "parse_master_playlist: done");
    Ok(MasterPlaylist { variants })
}

fn map_encryption_method(m: &hls_m3u8::types::EncryptionMethod) -> EncryptionMethod {
    match m {
        hls_m3u8::types::EncryptionMethod::Aes128 => EncryptionMethod::Aes128,
        hls_m3u8::types::EncryptionMethod::SampleAes => EncryptionMethod::SampleAes,
        other => EncryptionMethod::Other(other.to_string()),
    }
}

fn key_info(k: &HlsDecryptionKey<'_>) -> Option<KeyInfo> {
    let uri = k.uri().trim();
    if uri.is_empty() {
        return None;
    }
    Some(KeyInfo {
        method: map_encryption_method(&k.method),
        uri: uri.to_string(),
        iv: k.iv.to_slice(),
    })
}

pub fn parse_media_playlist(data: &[u8]) -> HlsResult<MediaPlaylist> {
    let input = as_text(data)?;
    let hls_media = HlsMediaPlaylist::try_from(input)
        .map_err(|e| HlsError::PlaylistParse(e.to_string()))?
        .into_owned();

    let end_list = input.contains("#EXT-X-ENDLIST");
    let media_sequence = hls_media.media_sequence as u64;

    let segments: Vec<MediaSegment> = hls_media
        .segments
        .iter()
        .enumerate()
        .map(|(index, (_idx, seg))| {
            // The last key tag before a segment is the one in effect;
            // METHOD=NONE leaves no key behind.
            let key = seg.keys().last().copied().and_then(key_info);
            let program_date_time = seg.program_date_time.as_ref().map(|tag| {
                let text = tag.to_string();
                text.strip_prefix("#EXT-X-PROGRAM-DATE-TIME:")
                    .map_or(text.clone(), str::to_string)
            });
            MediaSegment {
                sequence: media_sequence + index as u64,
                uri: seg.uri().to_string(),
                duration: seg.duration.duration(),
                key,
                discontinuity: seg.has_discontinuity,
                program_date_time,
            }
        })
        .collect();

    if let Some(key) = segments
        .iter()
        .filter_map(|s| s.key.as_ref())
        .find(|k| k.method != EncryptionMethod::Aes128)
    {
        warn!(method = ?key.method, "parse_media_playlist: unsupported encryption method");
    }

    Ok(MediaPlaylist {
        segments,
        target_duration: hls_media.target_duration,
        media_sequence,
        end_list,
    })
}
