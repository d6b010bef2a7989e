//! Buffer-projection variant selection.
//!
//! For each candidate the projection walks the upcoming segments, adding
//! each segment's play time and subtracting the time it takes to download
//! at the measured bandwidth, until the horizon is covered. A variant
//! qualifies when its lowest projected buffer and its buffer at the horizon
//! both clear their thresholds. Candidates are tried from the highest
//! bitrate down.

use std::time::Duration;

use tracing::{debug, trace};

use crate::types::{AbrMode, AbrOptions, SegmentPlan, VariantSource};

/// Projected buffer levels in seconds. Negative values mean a stall.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferProjection {
    /// Buffer left when the horizon is reached.
    pub target_buffer_secs: f64,
    /// Lowest buffer seen on the way, including the starting level.
    pub low_buffer_secs: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionReason {
    Manual,
    /// The manual index does not exist; highest bitrate used.
    ManualFallback,
    Projected,
    /// Nothing qualified; lowest variant at or above the floor.
    Floor,
    /// No bandwidth estimate yet; lowest variant at or above the floor.
    NoEstimate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VariantSelection {
    pub index: usize,
    pub reason: SelectionReason,
}

/// Project buffer levels for variant `index` at `bandwidth_bps`.
///
/// Segment durations fall back to the playlist target duration, then to
/// [`AbrOptions::default_segment_duration`]; sizes fall back to duration times
/// the declared bitrate. Live variants are extended with fallback-length
/// segments past their last listed one.
pub fn calculate_target_buffer<S: VariantSource + ?Sized>(
    source: &S,
    index: usize,
    bandwidth_bps: f64,
    current_buffer: Duration,
    options: &AbrOptions,
) -> Option<BufferProjection> {
    #[expect(clippy::cast_precision_loss, reason = "bitrates stay far below 2^52")]
    let bitrate = source.variant_bandwidth(index)? as f64;
    if bandwidth_bps <= 0.0 {
        return None;
    }
    let fallback = source
        .target_duration(index)
        .filter(|duration| !duration.is_zero())
        .unwrap_or(options.default_segment_duration);
    let live = source.is_live(index);
    let horizon = options.horizon.as_secs_f64();

    let mut buffer = current_buffer.as_secs_f64();
    let mut low = buffer;
    let mut covered = 0.0;
    let listed = source.upcoming_segments(index);
    let mut listed = listed.iter();

    while covered < horizon {
        let plan = match listed.next() {
            Some(plan) => *plan,
            None if live && !fallback.is_zero() => SegmentPlan::default(),
            None => break,
        };
        let duration = plan.duration.unwrap_or(fallback).as_secs_f64();
        #[expect(clippy::cast_precision_loss, reason = "segment sizes stay far below 2^52")]
        let bits = plan
            .size_bytes
            .map_or(duration * bitrate, |bytes| bytes as f64 * 8.0);
        buffer += duration - bits / bandwidth_bps;
        low = low.min(buffer);
        covered += duration;
    }

    Some(BufferProjection {
        target_buffer_secs: buffer,
        low_buffer_secs: low,
    })
}

fn qualifies(projection: &BufferProjection, current_buffer: Duration, options: &AbrOptions) -> bool {
    let low_threshold = options.low_buffer_threshold.min(current_buffer).as_secs_f64();
    projection.low_buffer_secs >= low_threshold
        && projection.target_buffer_secs >= options.target_buffer_threshold.as_secs_f64()
}

/// Indices with a known bitrate, ascending by bitrate.
fn by_bitrate<S: VariantSource + ?Sized>(source: &S) -> Vec<(usize, u64)> {
    let mut variants: Vec<_> = (0..source.variant_count())
        .filter_map(|index| Some((index, source.variant_bandwidth(index)?)))
        .collect();
    variants.sort_by_key(|&(index, bps)| (bps, index));
    variants
}

/// Lowest variant at or above the floor, or the highest when all are below.
fn lowest_above_floor(variants: &[(usize, u64)], floor: u64) -> Option<usize> {
    variants
        .iter()
        .find(|&&(_, bps)| bps >= floor)
        .or_else(|| variants.last())
        .map(|&(index, _)| index)
}

/// Pick the variant to download next.
///
/// `bandwidth_bps` is the estimate after any post-seek discount. Returns
/// `None` only when no variant declares a bitrate.
pub fn select_variant<S: VariantSource + ?Sized>(
    source: &S,
    bandwidth_bps: Option<f64>,
    current_buffer: Duration,
    options: &AbrOptions,
) -> Option<VariantSelection> {
    let variants = by_bitrate(source);
    let highest = variants.last().map(|&(index, _)| index);

    if let AbrMode::Manual(index) = options.mode {
        return if index < source.variant_count() {
            Some(VariantSelection {
                index,
                reason: SelectionReason::Manual,
            })
        } else {
            debug!(index, "heuristic: manual variant missing, using highest");
            highest.map(|index| VariantSelection {
                index,
                reason: SelectionReason::ManualFallback,
            })
        };
    }

    let Some(bandwidth) = bandwidth_bps.filter(|&bps| bps > 0.0) else {
        return lowest_above_floor(&variants, options.bandwidth_floor_bps).map(|index| {
            VariantSelection {
                index,
                reason: SelectionReason::NoEstimate,
            }
        });
    };

    for &(index, bps) in variants.iter().rev() {
        let Some(projection) =
            calculate_target_buffer(source, index, bandwidth, current_buffer, options)
        else {
            continue;
        };
        let ok = qualifies(&projection, current_buffer, options);
        trace!(
            index,
            bps,
            bandwidth,
            low = projection.low_buffer_secs,
            target = projection.target_buffer_secs,
            ok,
            "heuristic: projection"
        );
        if ok {
            return Some(VariantSelection {
                index,
                reason: SelectionReason::Projected,
            });
        }
    }

    lowest_above_floor(&variants, options.bandwidth_floor_bps).map(|index| VariantSelection {
        index,
        reason: SelectionReason::Floor,
    })
}
