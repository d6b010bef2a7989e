use std::time::Duration;

/// ABR mode selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AbrMode {
    /// Select by projected buffer level.
    #[default]
    Auto,
    /// Always use the variant at this index. An index that does not exist
    /// falls back to the highest bitrate.
    Manual(usize),
}

/// ABR configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct AbrOptions {
    pub mode: AbrMode,
    /// Fallback selection never goes below this bitrate if a variant above it exists.
    pub bandwidth_floor_bps: u64,
    /// Multiplier applied to the bandwidth estimate for the first decision after a seek.
    pub post_seek_discount: f64,
    /// Average bandwidth carried over from a previous session; used until
    /// the first measurement.
    pub initial_bandwidth_bps: Option<u64>,
    /// Number of one-second buckets kept by the bandwidth history.
    pub history_buckets: usize,
    /// How far ahead buffer levels are projected.
    pub horizon: Duration,
    /// Projected low buffer a variant must keep. The current buffer level
    /// replaces it when smaller.
    pub low_buffer_threshold: Duration,
    /// Projected buffer a variant must reach at the horizon.
    pub target_buffer_threshold: Duration,
    /// Segment duration assumed when neither the segment nor the playlist
    /// provides one.
    pub default_segment_duration: Duration,
}

impl Default for AbrOptions {
    fn default() -> Self {
        Self {
            mode: AbrMode::default(),
            bandwidth_floor_bps: 0,
            post_seek_discount: 0.5,
            initial_bandwidth_bps: None,
            history_buckets: 10,
            horizon: Duration::from_secs(120),
            low_buffer_threshold: Duration::from_secs(5),
            target_buffer_threshold: Duration::from_secs(30),
            default_segment_duration: Duration::from_secs(10),
        }
    }
}

impl AbrOptions {
    pub fn with_mode(mut self, mode: AbrMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_initial_bandwidth(mut self, bps: Option<u64>) -> Self {
        self.initial_bandwidth_bps = bps;
        self
    }

    pub fn with_bandwidth_floor(mut self, bps: u64) -> Self {
        self.bandwidth_floor_bps = bps;
        self
    }

    pub fn is_auto(&self) -> bool {
        matches!(self.mode, AbrMode::Auto)
    }
}

/// One completed read: `bytes` arrived over `duration` of wall time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThroughputSample {
    pub bytes: u64,
    pub duration: Duration,
}

/// What is known about one upcoming segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SegmentPlan {
    pub duration: Option<Duration>,
    pub size_bytes: Option<u64>,
}

/// Source of variant information for selection.
///
/// Variants are addressed by index; the order need not follow bitrate.
pub trait VariantSource {
    fn variant_count(&self) -> usize;

    /// Declared bitrate in bits per second, `None` when out of range.
    fn variant_bandwidth(&self, index: usize) -> Option<u64>;

    /// Segments from the playback position onwards, in play order.
    fn upcoming_segments(&self, index: usize) -> Vec<SegmentPlan>;

    fn target_duration(&self, index: usize) -> Option<Duration>;

    /// Live variants keep growing past their last listed segment.
    fn is_live(&self, index: usize) -> bool;
}

/// Self-contained variant description, mostly for tests and tools.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VariantProfile {
    pub bandwidth_bps: u64,
    pub target_duration: Option<Duration>,
    pub upcoming: Vec<SegmentPlan>,
    pub live: bool,
}

impl VariantProfile {
    pub fn new(bandwidth_bps: u64) -> Self {
        Self {
            bandwidth_bps,
            ..Self::default()
        }
    }

    /// `count` segments of `duration` with unknown sizes.
    pub fn with_segments(mut self, count: usize, duration: Duration) -> Self {
        self.upcoming = vec![
            SegmentPlan {
                duration: Some(duration),
                size_bytes: None,
            };
            count
        ];
        self
    }

    pub fn with_target_duration(mut self, duration: Duration) -> Self {
        self.target_duration = Some(duration);
        self
    }

    pub fn live(mut self) -> Self {
        self.live = true;
        self
    }
}

impl VariantSource for [VariantProfile] {
    fn variant_count(&self) -> usize {
        self.len()
    }

    fn variant_bandwidth(&self, index: usize) -> Option<u64> {
        self.get(index).map(|v| v.bandwidth_bps)
    }

    fn upcoming_segments(&self, index: usize) -> Vec<SegmentPlan> {
        self.get(index).map(|v| v.upcoming.clone()).unwrap_or_default()
    }

    fn target_duration(&self, index: usize) -> Option<Duration> {
        self.get(index).and_then(|v| v.target_duration)
    }

    fn is_live(&self, index: usize) -> bool {
        self.get(index).is_some_and(|v| v.live)
    }
}

impl VariantSource for Vec<VariantProfile> {
    fn variant_count(&self) -> usize {
        self.as_slice().variant_count()
    }

    fn variant_bandwidth(&self, index: usize) -> Option<u64> {
        self.as_slice().variant_bandwidth(index)
    }

    fn upcoming_segments(&self, index: usize) -> Vec<SegmentPlan> {
        self.as_slice().upcoming_segments(index)
    }

    fn target_duration(&self, index: usize) -> Option<Duration> {
        self.as_slice().target_duration(index)
    }

    fn is_live(&self, index: usize) -> bool {
        self.as_slice().is_live(index)
    }
}
