use std::fmt::Write;

use lyra_test_utils::{PTS_HZ, SegmentSpec, build_segment};

/// Media playlist text for segments `first..first + count`, each `seconds`
/// long and named `seg{sequence}.ts`.
#[derive(Clone, Debug)]
pub(crate) struct MediaPlaylist {
    pub first: u64,
    pub count: u64,
    pub seconds: u32,
    pub ended: bool,
    pub key: Option<String>,
}

impl MediaPlaylist {
    pub(crate) fn vod(count: u64) -> Self {
        Self {
            first: 0,
            count,
            seconds: 2,
            ended: true,
            key: None,
        }
    }

    pub(crate) fn live(first: u64, count: u64, seconds: u32) -> Self {
        Self {
            first,
            count,
            seconds,
            ended: false,
            key: None,
        }
    }

    /// Raw `#EXT-X-KEY` attribute list applied to every segment.
    pub(crate) fn with_key(mut self, attributes: &str) -> Self {
        self.key = Some(attributes.to_string());
        self
    }

    pub(crate) fn render(&self) -> String {
        let mut text = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
        let _ = writeln!(text, "#EXT-X-TARGETDURATION:{}", self.seconds);
        let _ = writeln!(text, "#EXT-X-MEDIA-SEQUENCE:{}", self.first);
        if let Some(ref key) = self.key {
            let _ = writeln!(text, "#EXT-X-KEY:{key}");
        }
        for sequence in self.first..self.first + self.count {
            let _ = writeln!(text, "#EXTINF:{}.0,\nseg{sequence}.ts", self.seconds);
        }
        if self.ended {
            text.push_str("#EXT-X-ENDLIST\n");
        }
        text
    }
}

/// Master playlist listing `variants` as `(bandwidth, uri)` pairs.
pub(crate) fn master_playlist(variants: &[(u64, &str)]) -> String {
    let mut text = String::from("#EXTM3U\n");
    for (bandwidth, uri) in variants {
        let _ = writeln!(text, "#EXT-X-STREAM-INF:BANDWIDTH={bandwidth}\n{uri}");
    }
    text
}

/// A/V transport stream for `sequence`; timestamps continue across
/// sequences starting at 10 s.
pub(crate) fn ts_segment(sequence: u64, seconds: u32) -> Vec<u8> {
    build_segment(&SegmentSpec {
        duration_secs: seconds,
        start_pts: 10 * PTS_HZ + sequence * u64::from(seconds) * PTS_HZ,
        ..SegmentSpec::default()
    })
}

/// 25 fps video.
pub(crate) const VIDEO_FRAMES_PER_SECOND: usize = 25;
/// AAC frames in a 2 s segment at 48 kHz.
pub(crate) const AUDIO_FRAMES_PER_2S: usize = 94;
