use std::{collections::VecDeque, time::Duration};

#[cfg(test)]
use mockall::automock;

use crate::types::ThroughputSample;

/// Throughput estimation seam used by [`AbrController`](crate::AbrController).
#[cfg_attr(test, automock)]
pub trait Estimator {
    /// Average throughput in bits per second.
    fn estimate_bps(&self) -> Option<u64>;

    /// Throughput of the latest measurement bucket.
    fn recent_bps(&self) -> Option<u64>;

    fn push_sample(&mut self, sample: ThroughputSample);
}

const BUCKET_SPAN: Duration = Duration::from_secs(1);
const MAX_BUCKET_BPS: f64 = 100_000_000.0;

#[derive(Clone, Copy, Debug, Default)]
struct Bucket {
    bytes: u64,
    duration: Duration,
}

impl Bucket {
    fn bps(&self) -> Option<f64> {
        let secs = self.duration.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        #[expect(clippy::cast_precision_loss, reason = "byte counts stay far below 2^52")]
        let bits = self.bytes as f64 * 8.0;
        Some((bits / secs).min(MAX_BUCKET_BPS))
    }
}

/// Ring of one-second throughput buckets.
///
/// Reads are split across buckets by wall time so that every bucket covers
/// at most one second; a bucket's rate is capped at 100 Mbit/s.
#[derive(Clone, Debug)]
pub struct BandwidthHistory {
    buckets: VecDeque<Bucket>,
    capacity: usize,
    initial_bps: Option<u64>,
}

impl BandwidthHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buckets: VecDeque::with_capacity(capacity),
            capacity,
            initial_bps: None,
        }
    }

    /// Estimate reported until the first measurement arrives.
    pub fn with_initial(mut self, bps: Option<u64>) -> Self {
        self.initial_bps = bps.filter(|&bps| bps > 0);
        self
    }

    fn open_bucket(&mut self) {
        self.buckets.push_back(Bucket::default());
        while self.buckets.len() > self.capacity {
            self.buckets.pop_front();
        }
    }

    pub fn push_sample(&mut self, sample: ThroughputSample) {
        if sample.duration.is_zero() {
            if self.buckets.is_empty() {
                self.open_bucket();
            }
            if let Some(bucket) = self.buckets.back_mut() {
                bucket.bytes += sample.bytes;
            }
            return;
        }

        let mut left_time = sample.duration;
        let mut left_bytes = sample.bytes;
        while !left_time.is_zero() {
            if self
                .buckets
                .back()
                .is_none_or(|bucket| bucket.duration >= BUCKET_SPAN)
            {
                self.open_bucket();
            }
            let Some(bucket) = self.buckets.back_mut() else {
                break;
            };
            let take = (BUCKET_SPAN - bucket.duration).min(left_time);
            let bytes = if take == left_time {
                left_bytes
            } else {
                let share = u128::from(left_bytes) * take.as_nanos() / left_time.as_nanos();
                u64::try_from(share).unwrap_or(left_bytes)
            };
            bucket.duration += take;
            bucket.bytes += bytes;
            left_time -= take;
            left_bytes -= bytes;
        }
    }

    /// Duration-weighted average over all buckets, or the initial value.
    pub fn average_bps(&self) -> Option<u64> {
        let (weighted, secs) = self
            .buckets
            .iter()
            .filter_map(|bucket| Some((bucket.bps()?, bucket.duration.as_secs_f64())))
            .fold((0.0, 0.0), |(w, s), (bps, secs)| (w + bps * secs, s + secs));
        if secs > 0.0 {
            #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "capped positive rate")]
            let average = (weighted / secs).round() as u64;
            Some(average)
        } else {
            self.initial_bps
        }
    }

    /// Rate of the newest bucket with data.
    pub fn recent_bps(&self) -> Option<u64> {
        let bps = self.buckets.iter().rev().find_map(Bucket::bps)?;
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "capped positive rate")]
        let bps = bps.round() as u64;
        Some(bps)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl Estimator for BandwidthHistory {
    fn estimate_bps(&self) -> Option<u64> {
        self.average_bps()
    }

    fn recent_bps(&self) -> Option<u64> {
        self.recent_bps()
    }

    fn push_sample(&mut self, sample: ThroughputSample) {
        self.push_sample(sample);
    }
}
