use std::time::Duration;

use tracing::debug;

use crate::{
    estimator::{BandwidthHistory, Estimator},
    heuristic::{SelectionReason, select_variant},
    types::{AbrMode, AbrOptions, ThroughputSample, VariantSource},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbrDecision {
    pub target_variant_index: usize,
    pub reason: SelectionReason,
    pub changed: bool,
}

/// Tracks throughput and the current variant, and decides where the next
/// segment comes from.
pub struct AbrController<E: Estimator> {
    cfg: AbrOptions,
    current_variant: Option<usize>,
    estimator: E,
    /// The next decision is the first one after a seek.
    after_seek: bool,
}

impl<E: Estimator> AbrController<E> {
    pub fn with_estimator(cfg: AbrOptions, estimator: E) -> Self {
        let current_variant = match cfg.mode {
            AbrMode::Manual(index) => Some(index),
            AbrMode::Auto => None,
        };
        Self {
            cfg,
            current_variant,
            estimator,
            after_seek: false,
        }
    }

    pub fn options(&self) -> &AbrOptions {
        &self.cfg
    }

    pub fn current_variant(&self) -> Option<usize> {
        self.current_variant
    }

    pub fn push_throughput_sample(&mut self, sample: ThroughputSample) {
        self.estimator.push_sample(sample);
    }

    pub fn average_bps(&self) -> Option<u64> {
        self.estimator.estimate_bps()
    }

    pub fn recent_bps(&self) -> Option<u64> {
        self.estimator.recent_bps()
    }

    /// Switch between automatic selection and a pinned variant.
    pub fn set_mode(&mut self, mode: AbrMode) {
        debug!(?mode, "AbrController: mode");
        self.cfg.mode = mode;
    }

    /// Discount the estimate for the next decision.
    pub fn notify_seek(&mut self) {
        self.after_seek = true;
    }

    /// Bandwidth the next decision would use.
    pub fn effective_bandwidth(&self) -> Option<f64> {
        #[expect(clippy::cast_precision_loss, reason = "bitrates stay far below 2^52")]
        let bps = self.estimator.estimate_bps()? as f64;
        Some(if self.after_seek {
            bps * self.cfg.post_seek_discount
        } else {
            bps
        })
    }

    /// Decide the variant for the next segment.
    ///
    /// Returns `None` only when `variants` declares no bitrate at all.
    pub fn decide<S: VariantSource + ?Sized>(
        &mut self,
        variants: &S,
        buffer_level: Duration,
    ) -> Option<AbrDecision> {
        let bandwidth = self.effective_bandwidth();
        let selection = select_variant(variants, bandwidth, buffer_level, &self.cfg)?;
        if self.after_seek {
            debug!(bandwidth, "AbrController: post-seek decision");
            self.after_seek = false;
        }
        let changed = self.current_variant != Some(selection.index);
        debug!(
            current = ?self.current_variant,
            target = selection.index,
            reason = ?selection.reason,
            bandwidth,
            buffer_secs = buffer_level.as_secs_f64(),
            "AbrController: decision"
        );
        Some(AbrDecision {
            target_variant_index: selection.index,
            reason: selection.reason,
            changed,
        })
    }

    pub fn apply(&mut self, decision: &AbrDecision) {
        self.current_variant = Some(decision.target_variant_index);
    }
}

impl AbrController<BandwidthHistory> {
    /// Controller over a [`BandwidthHistory`] seeded with
    /// [`AbrOptions::initial_bandwidth_bps`].
    #[must_use]
    pub fn new(cfg: AbrOptions) -> Self {
        let history = BandwidthHistory::new(cfg.history_buckets).with_initial(cfg.initial_bandwidth_bps);
        Self::with_estimator(cfg, history)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{estimator::MockEstimator, types::VariantProfile};

    fn ladder() -> Vec<VariantProfile> {
        let ten = Duration::from_secs(10);
        vec![
            VariantProfile::new(500_000).with_segments(20, ten),
            VariantProfile::new(1_500_000).with_segments(20, ten),
            VariantProfile::new(3_000_000).with_segments(20, ten),
        ]
    }

    #[test]
    fn estimator_consulted_once_per_decision() {
        let mut estimator = MockEstimator::new();
        estimator
            .expect_estimate_bps()
            .times(2)
            .return_const(Some(2_000_000u64));
        let mut controller = AbrController::with_estimator(AbrOptions::default(), estimator);

        let first = controller.decide(&ladder(), Duration::ZERO).unwrap();
        assert_eq!(first.target_variant_index, 1);
        assert!(first.changed);
        controller.apply(&first);

        let second = controller.decide(&ladder(), Duration::ZERO).unwrap();
        assert_eq!(second.target_variant_index, 1);
        assert!(!second.changed);
    }

    #[rstest]
    #[case(false, 2)]
    #[case(true, 1)]
    fn post_seek_discount_applies_once(#[case] seek: bool, #[case] expected: usize) {
        let mut estimator = MockEstimator::new();
        estimator
            .expect_estimate_bps()
            .return_const(Some(4_000_000u64));
        let mut controller = AbrController::with_estimator(AbrOptions::default(), estimator);
        if seek {
            controller.notify_seek();
        }

        // 4 Mbit/s keeps 3000k growing; 2 Mbit/s after the discount does not.
        let decision = controller.decide(&ladder(), Duration::ZERO).unwrap();
        assert_eq!(decision.target_variant_index, expected);

        let next = controller.decide(&ladder(), Duration::ZERO).unwrap();
        assert_eq!(next.target_variant_index, 2);
    }

    #[test]
    fn initial_bandwidth_seeds_first_decision() {
        let options = AbrOptions::default().with_initial_bandwidth(Some(10_000_000));
        let mut controller = AbrController::new(options);
        let decision = controller.decide(&ladder(), Duration::ZERO).unwrap();
        assert_eq!(decision.target_variant_index, 2);
        assert_eq!(decision.reason, SelectionReason::Projected);
    }

    #[test]
    fn measurements_replace_initial_bandwidth() {
        let options = AbrOptions::default().with_initial_bandwidth(Some(10_000_000));
        let mut controller = AbrController::new(options);
        controller.push_throughput_sample(ThroughputSample {
            bytes: 62_500,
            duration: Duration::from_secs(1),
        });
        assert_eq!(controller.average_bps(), Some(500_000));
        let decision = controller.decide(&ladder(), Duration::ZERO).unwrap();
        assert_eq!(decision.reason, SelectionReason::Floor);
        assert_eq!(decision.target_variant_index, 0);
    }

    #[test]
    fn manual_mode_pins_variant_until_auto_restored() {
        let mut estimator = MockEstimator::new();
        estimator
            .expect_estimate_bps()
            .return_const(Some(10_000_000u64));
        let mut controller = AbrController::with_estimator(
            AbrOptions::default().with_mode(AbrMode::Manual(0)),
            estimator,
        );
        assert_eq!(controller.current_variant(), Some(0));

        let pinned = controller.decide(&ladder(), Duration::ZERO).unwrap();
        assert_eq!(pinned.reason, SelectionReason::Manual);
        assert!(!pinned.changed);

        controller.set_mode(AbrMode::Auto);
        let auto = controller.decide(&ladder(), Duration::ZERO).unwrap();
        assert_eq!(auto.target_variant_index, 2);
        assert!(auto.changed);
    }
}
