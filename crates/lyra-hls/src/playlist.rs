//! Program, variant and segment model with the live reload policy.

use std::time::{Duration, Instant};

use lyra_abr::{SegmentPlan, VariantSource};
use lyra_drm::iv_for_sequence;
use tracing::{debug, trace};
use url::Url;

use crate::{
    error::{HlsError, HlsResult},
    parsing::{EncryptionMethod, MasterPlaylist, MediaPlaylist, MediaSegment},
};

/// Multipliers of the target duration applied after one, two and three or
/// more reloads that brought nothing new.
const UNCHANGED_BACKOFF: [f64; 3] = [0.5, 1.5, 3.0];

/// Resolved key of one segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamKey {
    pub method: EncryptionMethod,
    pub url: Url,
    /// Explicit IV, or the media sequence number when the tag had none.
    pub iv: [u8; 16],
}

/// One segment reference.
#[derive(Clone, Debug, PartialEq)]
pub struct HlsStream {
    pub url: Url,
    pub sequence: u64,
    pub duration: Duration,
    /// Body size once it has been downloaded.
    pub size: Option<u64>,
    pub key: Option<StreamKey>,
    pub discontinuity: bool,
    pub timeline: usize,
    pub program_date_time: Option<String>,
}

impl HlsStream {
    fn resolve(base: &Url, segment: MediaSegment) -> HlsResult<Self> {
        let key = match segment.key {
            Some(key) => Some(StreamKey {
                url: base.join(&key.uri)?,
                iv: key.iv.unwrap_or_else(|| iv_for_sequence(segment.sequence)),
                method: key.method,
            }),
            None => None,
        };
        Ok(Self {
            url: base.join(&segment.uri)?,
            sequence: segment.sequence,
            duration: segment.duration,
            size: None,
            key,
            discontinuity: segment.discontinuity,
            timeline: 0,
            program_date_time: segment.program_date_time,
        })
    }
}

/// What a reload did to a variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// The window was replaced by different content.
    pub changed: bool,
    /// The response was accepted as the newer window.
    pub authoritative: bool,
    /// Wait before the next reload, measured from when this load started.
    pub wait: Duration,
}

#[derive(Clone, Debug, Default)]
struct ReloadState {
    loaded: bool,
    load_started: Option<Instant>,
    unchanged: usize,
    wait: Duration,
}

/// One bitrate rendition and its current segment window.
#[derive(Clone, Debug)]
pub struct HlsVariant {
    pub url: Url,
    pub bandwidth: u64,
    pub codecs: Option<String>,
    streams: Vec<HlsStream>,
    target_duration: Option<Duration>,
    media_sequence: u64,
    end_list: bool,
    reload: ReloadState,
}

impl HlsVariant {
    pub fn new(url: Url, bandwidth: u64, codecs: Option<String>) -> Self {
        Self {
            url,
            bandwidth,
            codecs,
            streams: Vec::new(),
            target_duration: None,
            media_sequence: 0,
            end_list: false,
            reload: ReloadState::default(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.reload.loaded
    }

    /// Still growing: loaded without `#EXT-X-ENDLIST`.
    pub fn is_live(&self) -> bool {
        self.reload.loaded && !self.end_list
    }

    pub fn streams(&self) -> &[HlsStream] {
        &self.streams
    }

    pub fn target_duration(&self) -> Option<Duration> {
        self.target_duration
    }

    pub fn media_sequence(&self) -> u64 {
        self.media_sequence
    }

    pub fn first_sequence(&self) -> Option<u64> {
        self.streams.first().map(|s| s.sequence)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.streams.last().map(|s| s.sequence)
    }

    pub fn stream(&self, sequence: u64) -> Option<&HlsStream> {
        let first = self.first_sequence()?;
        let index = usize::try_from(sequence.checked_sub(first)?).ok()?;
        self.streams.get(index).filter(|s| s.sequence == sequence)
    }

    /// Start of `sequence` relative to the window start.
    pub fn stream_start(&self, sequence: u64) -> Option<Duration> {
        self.stream(sequence)?;
        Some(
            self.streams
                .iter()
                .take_while(|s| s.sequence < sequence)
                .map(|s| s.duration)
                .sum(),
        )
    }

    /// Segment playing at `position` from the window start; the last one
    /// when `position` is past the end.
    pub fn stream_at(&self, position: Duration) -> Option<&HlsStream> {
        let mut start = Duration::ZERO;
        for stream in &self.streams {
            if position < start + stream.duration {
                return Some(stream);
            }
            start += stream.duration;
        }
        self.streams.last()
    }

    pub fn duration(&self) -> Duration {
        self.streams.iter().map(|s| s.duration).sum()
    }

    pub fn set_stream_size(&mut self, sequence: u64, size: u64) {
        let Some(first) = self.first_sequence() else {
            return;
        };
        let Some(index) = sequence
            .checked_sub(first)
            .and_then(|i| usize::try_from(i).ok())
        else {
            return;
        };
        if let Some(stream) = self.streams.get_mut(index) {
            stream.size = Some(size);
        }
    }

    /// When the next reload is due. `None` for variants that never reload
    /// again.
    pub fn next_reload_at(&self) -> Option<Instant> {
        if !self.reload.loaded {
            return Some(Instant::now());
        }
        if self.end_list {
            return None;
        }
        Some(self.reload.load_started? + self.reload.wait)
    }

    /// Wait chosen after the latest load.
    pub fn reload_wait(&self) -> Duration {
        self.reload.wait
    }

    /// Replace the window with a freshly loaded playlist.
    ///
    /// `next_sequence` is the sequence playback wants next, if any. The
    /// window only moves when the response is authoritative: its last
    /// sequence is newer, or the sequence was reset (`new_last + new_count <
    /// old_last`).
    pub fn apply_playlist(
        &mut self,
        playlist: MediaPlaylist,
        load_started: Instant,
        next_sequence: Option<u64>,
    ) -> HlsResult<ReloadOutcome> {
        let streams = playlist
            .segments
            .into_iter()
            .map(|segment| HlsStream::resolve(&self.url, segment))
            .collect::<HlsResult<Vec<_>>>()?;
        let target = playlist.target_duration;

        let first_load = !self.reload.loaded;
        let authoritative = first_load || self.is_authoritative(&streams);
        let changed = authoritative && !same_window(&self.streams, &streams);

        let wait = if first_load {
            last_duration(&streams).unwrap_or(target)
        } else if changed {
            self.reload.unchanged = 0;
            let past_window = next_sequence
                .zip(streams.last().map(|s| s.sequence))
                .is_some_and(|(next, last)| next > last);
            if past_window {
                self.reload.wait
            } else {
                last_duration(&streams).unwrap_or(target)
            }
        } else {
            self.reload.unchanged += 1;
            let tier = UNCHANGED_BACKOFF[(self.reload.unchanged - 1).min(UNCHANGED_BACKOFF.len() - 1)];
            target.mul_f64(tier)
        };

        if authoritative {
            let mut streams = streams;
            for stream in &mut streams {
                stream.size = self.stream(stream.sequence).and_then(|s| s.size);
            }
            self.streams = streams;
            self.media_sequence = playlist.media_sequence;
            self.end_list = playlist.end_list;
            self.target_duration = Some(target);
        } else {
            debug!(url = %self.url, "HlsVariant: stale playlist ignored");
        }

        self.reload.loaded = true;
        self.reload.load_started = Some(load_started);
        self.reload.wait = wait;
        trace!(
            url = %self.url,
            changed,
            authoritative,
            wait_ms = wait.as_millis(),
            segments = self.streams.len(),
            "HlsVariant: playlist applied"
        );

        Ok(ReloadOutcome {
            changed: changed || first_load,
            authoritative,
            wait,
        })
    }

    fn is_authoritative(&self, streams: &[HlsStream]) -> bool {
        let (Some(old_last), Some(new_last)) =
            (self.last_sequence(), streams.last().map(|s| s.sequence))
        else {
            return !streams.is_empty() || self.streams.is_empty();
        };
        new_last > old_last || new_last + (streams.len() as u64) < old_last
    }
}

fn last_duration(streams: &[HlsStream]) -> Option<Duration> {
    streams.last().map(|s| s.duration).filter(|d| !d.is_zero())
}

fn same_window(old: &[HlsStream], new: &[HlsStream]) -> bool {
    old.len() == new.len()
        && old
            .iter()
            .zip(new)
            .all(|(a, b)| a.sequence == b.sequence && a.url == b.url)
}

/// Variants of one program, ascending by bitrate.
#[derive(Clone, Debug)]
pub struct HlsProgram {
    variants: Vec<HlsVariant>,
}

impl HlsProgram {
    pub fn new(mut variants: Vec<HlsVariant>) -> HlsResult<Self> {
        if variants.is_empty() {
            return Err(HlsError::PlaylistParse("program has no variants".into()));
        }
        variants.sort_by_key(|v| v.bandwidth);
        Ok(Self { variants })
    }

    pub fn variants(&self) -> &[HlsVariant] {
        &self.variants
    }

    pub fn variant(&self, index: usize) -> HlsResult<&HlsVariant> {
        self.variants.get(index).ok_or(HlsError::VariantNotFound(index))
    }

    pub fn variant_mut(&mut self, index: usize) -> HlsResult<&mut HlsVariant> {
        self.variants
            .get_mut(index)
            .ok_or(HlsError::VariantNotFound(index))
    }

    pub fn bitrates(&self) -> Vec<u64> {
        self.variants.iter().map(|v| v.bandwidth).collect()
    }

    pub fn highest(&self) -> usize {
        self.variants.len() - 1
    }

    /// Planning view from playback's next segment on, with `reference` (the
    /// playing variant) standing in for variants not loaded yet.
    pub fn view(&self, reference: usize, next_sequence: Option<u64>) -> ProgramView<'_> {
        ProgramView {
            program: self,
            reference,
            next_sequence,
        }
    }
}

/// The loaded manifest: a master playlist, or a media playlist standing in
/// for a single-variant program.
#[derive(Clone, Debug)]
pub struct HlsPlaylist {
    pub url: Url,
    pub program: HlsProgram,
    pub has_master: bool,
}

impl HlsPlaylist {
    pub fn from_master(url: Url, master: MasterPlaylist) -> HlsResult<Self> {
        let variants = master
            .variants
            .into_iter()
            .map(|v| Ok(HlsVariant::new(url.join(&v.uri)?, v.bandwidth, v.codecs)))
            .collect::<HlsResult<Vec<_>>>()?;
        debug!(url = %url, variants = variants.len(), "HlsPlaylist: master loaded");
        Ok(Self {
            program: HlsProgram::new(variants)?,
            url,
            has_master: true,
        })
    }

    /// Single-variant program over a media playlist that was loaded at
    /// `load_started`.
    pub fn from_media(url: Url, media: MediaPlaylist, load_started: Instant) -> HlsResult<Self> {
        let mut variant = HlsVariant::new(url.clone(), 0, None);
        variant.apply_playlist(media, load_started, None)?;
        debug!(url = %url, "HlsPlaylist: media playlist without master");
        Ok(Self {
            program: HlsProgram::new(vec![variant])?,
            url,
            has_master: false,
        })
    }
}

/// [`VariantSource`] over a program at the current playback position.
pub struct ProgramView<'a> {
    program: &'a HlsProgram,
    reference: usize,
    next_sequence: Option<u64>,
}

impl ProgramView<'_> {
    fn planned(&self, index: usize) -> Option<&HlsVariant> {
        let variant = self.program.variants.get(index)?;
        if variant.is_loaded() {
            return Some(variant);
        }
        self.program
            .variants
            .get(self.reference)
            .filter(|v| v.is_loaded())
    }
}

impl VariantSource for ProgramView<'_> {
    fn variant_count(&self) -> usize {
        self.program.variants.len()
    }

    fn variant_bandwidth(&self, index: usize) -> Option<u64> {
        self.program.variants.get(index).map(|v| v.bandwidth)
    }

    fn upcoming_segments(&self, index: usize) -> Vec<SegmentPlan> {
        let Some(variant) = self.planned(index) else {
            return Vec::new();
        };
        let own = std::ptr::eq(variant, &self.program.variants[index]);
        let next = self.next_sequence.unwrap_or(0);
        variant
            .streams
            .iter()
            .filter(|s| s.sequence >= next)
            .map(|s| SegmentPlan {
                duration: Some(s.duration),
                size_bytes: s.size.filter(|_| own),
            })
            .collect()
    }

    fn target_duration(&self, index: usize) -> Option<Duration> {
        self.planned(index)?.target_duration
    }

    fn is_live(&self, index: usize) -> bool {
        self.planned(index).is_some_and(HlsVariant::is_live)
    }
}
