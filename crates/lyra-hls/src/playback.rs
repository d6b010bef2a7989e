//! Segment sequencing.
//!
//! [`HlsPlayback`] decides what the worker does next: load a variant
//! playlist, fetch a segment or signal the end of the stream. It owns the
//! program, the ABR controller and the retry bookkeeping; the worker owns
//! the I/O and reports results back.

use std::time::{Duration, Instant};

use lyra_abr::{AbrController, AbrDecision, AbrMode, BandwidthHistory, SelectionReason, ThroughputSample};
use lyra_sample::SegmentRef;
use lyra_ts::SegmentContext;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::{HlsConfig, VariantChoice, VariantOverride},
    error::{HlsError, HlsResult},
    events::{EventEmitter, HlsEvent},
    parsing::MediaPlaylist,
    playlist::{HlsPlaylist, HlsVariant, ReloadOutcome, StreamKey},
};

/// One segment download, including retries of it.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentRequest {
    pub variant: usize,
    pub sequence: u64,
    pub url: Url,
    pub duration: Duration,
    /// Start relative to the variant's window start.
    pub start: Duration,
    pub key: Option<StreamKey>,
    /// Timestamps do not continue from the previous segment.
    pub discontinuity: bool,
    pub timeline: usize,
    pub bitrate: u64,
    /// 0 for the first try.
    pub attempt: u32,
    /// Plaintext bytes already demuxed by an earlier attempt.
    pub resume_offset: u64,
}

impl SegmentRequest {
    pub fn segment_context(&self) -> SegmentContext {
        SegmentContext {
            bitrate: self.bitrate,
            segment: Some(SegmentRef {
                sequence: self.sequence,
                variant: self.variant,
            }),
            timeline: self.timeline,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NextAction {
    /// Load (`reload == false`) or refresh a variant playlist once `at` is
    /// reached.
    LoadPlaylist {
        variant: usize,
        at: Instant,
        reload: bool,
    },
    FetchSegment(SegmentRequest),
    EndOfStream,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The same segment is handed out again by the next
    /// [`HlsPlayback::next_action`].
    Retry,
    Skipped,
}

/// Where playback resumes after a seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekPoint {
    pub variant: usize,
    pub sequence: u64,
    /// Start of the segment relative to the window start.
    pub start: Duration,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub segments_downloaded: u64,
    pub segments_skipped: u64,
    pub bytes_downloaded: u64,
}

pub struct HlsPlayback {
    playlist: HlsPlaylist,
    abr: AbrController<BandwidthHistory>,
    variant_override: Option<VariantOverride>,
    events: EventEmitter,
    current: Option<usize>,
    /// Variant decided for the next segment.
    decided: Option<usize>,
    /// Variant switched away from; the position is mapped once the new one
    /// is loaded.
    switched_from: Option<usize>,
    next_sequence: Option<u64>,
    discontinuity: bool,
    retry: Option<SegmentRequest>,
    consecutive_failures: u32,
    segment_retries: u32,
    max_consecutive_failures: u32,
    live_start_segments: usize,
    stats: PlaybackStats,
}

impl std::fmt::Debug for HlsPlayback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HlsPlayback")
            .field("current", &self.current)
            .field("next_sequence", &self.next_sequence)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl HlsPlayback {
    pub fn new(playlist: HlsPlaylist, config: &HlsConfig, events: EventEmitter) -> Self {
        Self {
            playlist,
            abr: AbrController::new(config.abr.clone()),
            variant_override: config.variant_override.clone(),
            events,
            current: None,
            decided: None,
            switched_from: None,
            next_sequence: None,
            discontinuity: false,
            retry: None,
            consecutive_failures: 0,
            segment_retries: config.segment_retries,
            max_consecutive_failures: config.max_consecutive_read_failures,
            live_start_segments: config.live_start_segments,
            stats: PlaybackStats::default(),
        }
    }

    pub fn playlist(&self) -> &HlsPlaylist {
        &self.playlist
    }

    pub fn current_variant(&self) -> Option<usize> {
        self.current
    }

    pub fn next_sequence(&self) -> Option<u64> {
        self.next_sequence
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    pub fn average_bps(&self) -> Option<u64> {
        self.abr.average_bps()
    }

    pub fn recent_bps(&self) -> Option<u64> {
        self.abr.recent_bps()
    }

    fn active_variant(&self) -> Option<&HlsVariant> {
        self.playlist
            .program
            .variants()
            .get(self.current.unwrap_or(0))
    }

    /// Total duration for VOD, `None` while live.
    pub fn duration(&self) -> Option<Duration> {
        self.active_variant()
            .filter(|v| v.is_loaded() && !v.is_live())
            .map(HlsVariant::duration)
    }

    pub fn is_seekable(&self) -> bool {
        self.duration().is_some()
    }

    pub fn is_live(&self) -> bool {
        self.active_variant().is_some_and(HlsVariant::is_live)
    }

    /// Refresh due for the playing live variant.
    pub fn live_reload_at(&self) -> Option<(usize, Instant)> {
        let index = self.current?;
        let variant = self.playlist.program.variants().get(index)?;
        if !variant.is_live() {
            return None;
        }
        Some((index, variant.next_reload_at()?))
    }

    pub fn set_mode(&mut self, mode: AbrMode) {
        self.abr.set_mode(mode);
        self.decided = None;
    }

    pub fn push_throughput(&mut self, bytes: u64, elapsed: Duration) {
        if bytes == 0 || elapsed.is_zero() {
            return;
        }
        self.abr.push_throughput_sample(ThroughputSample {
            bytes,
            duration: elapsed,
        });
        self.events.emit(HlsEvent::BandwidthSampled {
            average_bps: self.abr.average_bps(),
            recent_bps: self.abr.recent_bps(),
        });
    }

    /// What to do next, given the level of the less buffered stream.
    pub fn next_action(&mut self, buffer_level: Duration, now: Instant) -> HlsResult<NextAction> {
        if let Some(retry) = self.retry.take() {
            return Ok(NextAction::FetchSegment(retry));
        }

        let index = self.select_variant(buffer_level);
        if !self.playlist.program.variant(index)?.is_loaded() {
            return Ok(NextAction::LoadPlaylist {
                variant: index,
                at: now,
                reload: false,
            });
        }
        if let Some(from) = self.switched_from.take() {
            self.map_position(from, index);
        }
        self.position_in(index, now)
    }

    fn position_in(&mut self, index: usize, now: Instant) -> HlsResult<NextAction> {
        let variant = self.playlist.program.variant(index)?;
        let live = variant.is_live();
        let (Some(first), Some(last)) = (variant.first_sequence(), variant.last_sequence()) else {
            return Ok(if live {
                NextAction::LoadPlaylist {
                    variant: index,
                    at: variant.next_reload_at().unwrap_or(now),
                    reload: true,
                }
            } else {
                NextAction::EndOfStream
            });
        };

        let mut next = match self.next_sequence {
            Some(next) => next,
            None if live => {
                let back = self.live_start_segments.max(1) as u64;
                (last + 1).saturating_sub(back).max(first)
            }
            None => first,
        };
        if next < first {
            warn!(
                variant = index,
                wanted = next,
                first,
                "HlsPlayback: fell out of the live window, jumping to its start"
            );
            next = first;
            self.discontinuity = true;
        }
        self.next_sequence = Some(next);

        if let Some(stream) = variant.stream(next) {
            let request = SegmentRequest {
                variant: index,
                sequence: next,
                url: stream.url.clone(),
                duration: stream.duration,
                start: variant.stream_start(next).unwrap_or_default(),
                key: stream.key.clone(),
                discontinuity: stream.discontinuity || self.discontinuity,
                timeline: stream.timeline,
                bitrate: variant.bandwidth,
                attempt: 0,
                resume_offset: 0,
            };
            self.discontinuity = false;
            self.decided = None;
            return Ok(NextAction::FetchSegment(request));
        }

        if !live {
            debug!(variant = index, next, last, "HlsPlayback: end of playlist");
            return Ok(NextAction::EndOfStream);
        }
        Ok(NextAction::LoadPlaylist {
            variant: index,
            at: variant.next_reload_at().unwrap_or(now),
            reload: true,
        })
    }

    fn select_variant(&mut self, buffer_level: Duration) -> usize {
        if let Some(index) = self.decided {
            return index;
        }
        let program = &self.playlist.program;
        let highest = program.highest();
        let view = program.view(self.current.unwrap_or(0), self.next_sequence);
        let (proposed, reason) = self
            .abr
            .decide(&view, buffer_level)
            .map_or((highest, SelectionReason::ManualFallback), |d| {
                (d.target_variant_index, d.reason)
            });

        let target = match self.variant_override {
            Some(ref choose) => {
                let choice = VariantChoice {
                    bitrates: program.bitrates(),
                    current: self.current,
                    proposed,
                };
                match choose(&choice) {
                    Some(index) if index <= highest => index,
                    Some(index) => {
                        warn!(index, "HlsPlayback: override chose a missing variant, using highest");
                        highest
                    }
                    None => proposed,
                }
            }
            None => proposed,
        };

        if self.current != Some(target) {
            info!(from = ?self.current, to = target, ?reason, "HlsPlayback: variant switch");
            self.events.emit(HlsEvent::VariantSwitched {
                from: self.current,
                to: target,
                reason,
            });
            if self.current.is_some() {
                self.switched_from = self.current;
            }
            self.current = Some(target);
        }
        self.abr.apply(&AbrDecision {
            target_variant_index: target,
            reason,
            changed: false,
        });
        self.decided = Some(target);
        target
    }

    /// Carry the position over to variant `to`: by sequence number when it
    /// lists the same one, otherwise by time from the window start.
    fn map_position(&mut self, from: usize, to: usize) {
        let Some(next) = self.next_sequence else {
            return;
        };
        let program = &self.playlist.program;
        let (Ok(from_variant), Ok(to_variant)) = (program.variant(from), program.variant(to)) else {
            return;
        };
        if to_variant.stream(next).is_some() {
            return;
        }
        let Some(start) = from_variant.stream_start(next) else {
            return;
        };
        if let Some(stream) = to_variant.stream_at(start) {
            debug!(from, to, next, mapped = stream.sequence, "HlsPlayback: position mapped by time");
            self.next_sequence = Some(stream.sequence);
        }
    }

    pub fn on_playlist_loaded(
        &mut self,
        variant: usize,
        media: MediaPlaylist,
        load_started: Instant,
    ) -> HlsResult<ReloadOutcome> {
        let next = self.next_sequence;
        let entry = self.playlist.program.variant_mut(variant)?;
        let outcome = entry.apply_playlist(media, load_started, next)?;
        self.events.emit(HlsEvent::PlaylistReloaded {
            variant,
            changed: outcome.changed,
            next_reload: entry.is_live().then_some(outcome.wait),
        });
        Ok(outcome)
    }

    pub fn on_segment_started(&self, request: &SegmentRequest) {
        self.events.emit(HlsEvent::SegmentStarted {
            variant: request.variant,
            sequence: request.sequence,
            attempt: request.attempt,
        });
    }

    pub fn on_segment_completed(&mut self, request: &SegmentRequest, bytes: u64, elapsed: Duration) {
        self.consecutive_failures = 0;
        self.next_sequence = Some(request.sequence + 1);
        self.stats.segments_downloaded += 1;
        self.stats.bytes_downloaded += bytes;
        if let Ok(variant) = self.playlist.program.variant_mut(request.variant) {
            variant.set_stream_size(request.sequence, bytes);
        }
        self.events.emit(HlsEvent::SegmentCompleted {
            variant: request.variant,
            sequence: request.sequence,
            bytes,
            elapsed,
        });
    }

    /// A segment attempt failed after `demuxed` plaintext bytes went into
    /// the demuxer.
    ///
    /// Transport failures are retried `segment_retries` times; after that,
    /// or for any other recoverable error, the segment is skipped. Fatal
    /// errors, and one failure too many in a row, come back as `Err`.
    pub fn on_segment_failed(
        &mut self,
        request: SegmentRequest,
        error: HlsError,
        demuxed: u64,
    ) -> HlsResult<FailureOutcome> {
        if error.is_fatal() {
            return Err(error);
        }

        if matches!(error, HlsError::Net(_)) && request.attempt < self.segment_retries {
            warn!(
                variant = request.variant,
                sequence = request.sequence,
                attempt = request.attempt,
                %error,
                "HlsPlayback: segment failed, retrying"
            );
            let resume_offset = request.resume_offset.max(demuxed);
            self.retry = Some(SegmentRequest {
                attempt: request.attempt + 1,
                discontinuity: request.discontinuity && resume_offset == 0,
                resume_offset,
                ..request
            });
            return Ok(FailureOutcome::Retry);
        }

        self.consecutive_failures += 1;
        self.stats.segments_skipped += 1;
        self.next_sequence = Some(request.sequence + 1);
        warn!(
            variant = request.variant,
            sequence = request.sequence,
            consecutive = self.consecutive_failures,
            %error,
            "HlsPlayback: skipping segment"
        );
        self.events.emit(HlsEvent::SegmentSkipped {
            variant: request.variant,
            sequence: request.sequence,
            error: error.to_string(),
        });
        if self.consecutive_failures > self.max_consecutive_failures {
            return Err(error);
        }
        Ok(FailureOutcome::Skipped)
    }

    /// Reposition to the segment playing at `position`.
    pub fn seek(&mut self, position: Duration) -> HlsResult<SeekPoint> {
        let index = self.current.unwrap_or(0);
        let variant = self.playlist.program.variant(index)?;
        let stream = variant
            .stream_at(position)
            .ok_or_else(|| HlsError::ProtocolViolation("seek in an empty playlist".into()))?;
        let point = SeekPoint {
            variant: index,
            sequence: stream.sequence,
            start: variant.stream_start(stream.sequence).unwrap_or_default(),
        };

        self.next_sequence = Some(point.sequence);
        self.retry = None;
        self.discontinuity = false;
        self.decided = None;
        self.switched_from = None;
        self.consecutive_failures = 0;
        self.abr.notify_seek();
        debug!(?position, sequence = point.sequence, "HlsPlayback: seek");
        Ok(point)
    }
}
