use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{SampleError, SampleResult};

/// PTS values are 33 bits wide.
const PTS_WRAP: i64 = 1 << 33;
const PTS_HALF_RANGE: u64 = 1 << 32;

/// Convert a 90 kHz tick count to 100 ns units.
pub fn pts_to_hns(ticks: i64) -> i64 {
    ticks * 1000 / 9
}

/// Where a timeline starts on the presentation clock, in 100 ns units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimelineSpec {
    pub start_offset: i64,
}

#[derive(Debug)]
struct ClockTimeline {
    start_offset: i64,
    /// First corrected timestamp seen since the last (re)anchor.
    anchor: Option<i64>,
    /// Adjusted value assigned to `anchor`.
    base: i64,
    /// Latest adjusted end over every stream.
    last_end: Option<i64>,
    reanchor: bool,
    /// Bumped on every discontinuity.
    generation: u64,
    /// Shared by every stream so both unwrap against the same anchor.
    rollover: TimelineInfo,
}

impl ClockTimeline {
    fn new(spec: TimelineSpec) -> Self {
        Self {
            start_offset: spec.start_offset,
            anchor: None,
            base: spec.start_offset,
            last_end: None,
            reanchor: false,
            generation: 0,
            rollover: TimelineInfo::default(),
        }
    }
}

#[derive(Debug)]
struct ClockState {
    timelines: Vec<ClockTimeline>,
    /// Bumped on every `establish`.
    epoch: u64,
}

/// Presentation clock shared by the audio and video buffers.
///
/// The first sample of either stream on a timeline anchors it, so both
/// streams keep their relative offset. After a discontinuity the next sample
/// re-anchors at the latest presented end.
#[derive(Clone, Debug)]
pub struct TimelineClock {
    state: Arc<Mutex<ClockState>>,
}

impl Default for TimelineClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineClock {
    /// A clock with a single timeline starting at zero.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                timelines: vec![ClockTimeline::new(TimelineSpec::default())],
                epoch: 0,
            })),
        }
    }

    /// Replace every timeline. Anchors are dropped.
    pub fn establish(&self, specs: &[TimelineSpec]) {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.timelines = specs.iter().copied().map(ClockTimeline::new).collect();
        debug!(
            timelines = specs.len(),
            epoch = state.epoch,
            "TimelineClock: established"
        );
    }

    /// Append a timeline continuing after the latest end of `after`.
    pub fn continue_timeline(&self, after: usize) -> usize {
        let mut state = self.state.lock();
        let start_offset = state
            .timelines
            .get(after)
            .map_or(0, |t| t.last_end.unwrap_or(t.start_offset));
        state
            .timelines
            .push(ClockTimeline::new(TimelineSpec { start_offset }));
        state.timelines.len() - 1
    }

    /// The next sample on `timeline` re-anchors at the latest end.
    ///
    /// # Errors
    ///
    /// [`SampleError::UnknownTimeline`] for an index never established.
    pub fn mark_discontinuity(&self, timeline: usize) -> SampleResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .timelines
            .get_mut(timeline)
            .ok_or(SampleError::UnknownTimeline(timeline))?;
        entry.reanchor = true;
        entry.generation += 1;
        entry.rollover = TimelineInfo::default();
        debug!(timeline, generation = entry.generation, "TimelineClock: discontinuity");
        Ok(())
    }

    pub fn timeline_count(&self) -> usize {
        self.state.lock().timelines.len()
    }

    pub fn start_offset(&self, timeline: usize) -> Option<i64> {
        self.state
            .lock()
            .timelines
            .get(timeline)
            .map(|t| t.start_offset)
    }

    /// Unwrap `pts_90k` and place it on `timeline`.
    ///
    /// Returns `(original, adjusted)` in 100 ns units.
    ///
    /// # Errors
    ///
    /// [`SampleError::UnknownTimeline`] for an index never established.
    pub(crate) fn normalize(
        &self,
        timeline: usize,
        pts_90k: u64,
        duration: i64,
    ) -> SampleResult<(i64, i64)> {
        let mut state = self.state.lock();
        let entry = state
            .timelines
            .get_mut(timeline)
            .ok_or(SampleError::UnknownTimeline(timeline))?;

        let original = pts_to_hns(entry.rollover.unwrap_pts(pts_90k));
        let anchor = match entry.anchor {
            Some(anchor) if !entry.reanchor => anchor,
            _ => {
                if entry.reanchor {
                    entry.base = entry.last_end.unwrap_or(entry.start_offset);
                    entry.reanchor = false;
                }
                entry.anchor = Some(original);
                original
            }
        };

        let adjusted = original - anchor + entry.base;
        let end = adjusted + duration;
        entry.last_end = Some(entry.last_end.map_or(end, |last| last.max(end)));
        Ok((original, adjusted))
    }
}

/// Rollover bookkeeping for one timeline.
#[derive(Clone, Debug, Default)]
pub struct TimelineInfo {
    last_pts: Option<u64>,
    rollover: i64,
}

impl TimelineInfo {
    /// Correct a 33-bit PTS for wraparound.
    ///
    /// A forward wrap (the value drops by more than half the range) adds
    /// 2^33 to this and later samples. A value that jumps up by more than half
    /// the range is a late sample from before the wrap.
    pub fn unwrap_pts(&mut self, pts: u64) -> i64 {
        let Some(last) = self.last_pts else {
            self.last_pts = Some(pts);
            return pts as i64 + self.rollover;
        };

        if last > pts && last - pts > PTS_HALF_RANGE {
            self.rollover += PTS_WRAP;
            self.last_pts = Some(pts);
            debug!(pts, last, "TimelineInfo: PTS rollover");
            pts as i64 + self.rollover
        } else if pts > last && pts - last > PTS_HALF_RANGE {
            pts as i64 + self.rollover - PTS_WRAP
        } else {
            self.last_pts = Some(pts);
            pts as i64 + self.rollover
        }
    }
}
