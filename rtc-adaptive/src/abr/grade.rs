//! Stability-windowed grade bitrate strategy.

use super::{BitrateDecision, BitrateInput, BitrateStrategy};
use crate::sample_window::SampleWindow;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Least number of stable samples before the link may be considered steady.
const STEADY_MIN_SAMPLES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GradeConfig {
    /// Number of loss samples averaged.
    pub loss_window: usize,
    /// Number of safe operating points remembered.
    pub stable_window: usize,
    /// Period between two safe operating point samples.
    #[serde(with = "crate::serde_millis")]
    pub stable_interval: Duration,
    /// Average loss, in percent, under which the link is considered good.
    pub loss_low: f64,
    /// Average loss, in percent, under which a decrease is still worthwhile.
    pub loss_high: f64,
    /// Relative spread around the stable average tolerated for a steady link.
    pub steady_tolerance: f64,
    #[serde(with = "crate::serde_millis")]
    pub min_recovery_timeout: Duration,
    #[serde(with = "crate::serde_millis")]
    pub max_recovery_timeout: Duration,
    /// Relative increase applied on a good recovery tick.
    pub increase: f64,
    /// Relative increase applied instead when `increase` would overshoot the
    /// stable average.
    pub cautious_increase: f64,
    /// Relative decrease applied on a moderate loss recovery tick.
    pub decrease: f64,
}

impl Default for GradeConfig {
    fn default() -> Self {
        Self {
            loss_window: 5,
            stable_window: 15,
            stable_interval: Duration::from_secs(4),
            loss_low: 20.0,
            loss_high: 500.0,
            steady_tolerance: 0.2,
            min_recovery_timeout: Duration::from_millis(2500),
            max_recovery_timeout: Duration::from_secs(60),
            increase: 0.05,
            cautious_increase: 0.005,
            decrease: 0.01,
        }
    }
}

impl GradeConfig {
    pub fn with_loss_window(mut self, loss_window: usize) -> Self {
        self.loss_window = loss_window;
        self
    }

    pub fn with_stable_window(mut self, stable_window: usize) -> Self {
        self.stable_window = stable_window;
        self
    }

    pub fn with_stable_interval(mut self, stable_interval: Duration) -> Self {
        self.stable_interval = stable_interval;
        self
    }

    pub fn with_recovery_timeout(mut self, min: Duration, max: Duration) -> Self {
        self.min_recovery_timeout = min;
        self.max_recovery_timeout = max.max(min);
        self
    }
}

#[derive(Debug, Clone)]
struct GradeVars {
    losses: SampleWindow,
    stable_bitrates: SampleWindow,
    next_stable_sample: Option<Instant>,
    /// Constraint of the previous computation.
    constraint: Option<u64>,
    constraint_seen: bool,
    recovery_timeout: Duration,
    /// Next recovery tick, `None` when no recovery is in progress.
    recovery_at: Option<Instant>,
}

impl GradeVars {
    fn new(config: &GradeConfig) -> Self {
        Self {
            losses: SampleWindow::new(config.loss_window),
            stable_bitrates: SampleWindow::new(config.stable_window),
            next_stable_sample: None,
            constraint: None,
            constraint_seen: false,
            recovery_timeout: config.min_recovery_timeout,
            recovery_at: None,
        }
    }
}

/// Grade strategy.
///
/// Every `stable_interval` with a good average loss, the bitrate capped by
/// constraint and maximum is remembered as a safe operating point. The very
/// first constraint hit halves the bitrate, later hits during a recovery
/// double the recovery timeout instead. Once the timeout elapses the bitrate
/// is graded up (good loss) or down (moderate loss), and the timeout shrinks
/// or grows accordingly within `[min_recovery_timeout, max_recovery_timeout]`.
#[derive(Debug, Clone)]
pub struct GradeStrategy {
    config: GradeConfig,
    vars: GradeVars,
}

impl Default for GradeStrategy {
    fn default() -> Self {
        Self::new(GradeConfig::default())
    }
}

impl GradeStrategy {
    pub fn new(config: GradeConfig) -> Self {
        Self {
            vars: GradeVars::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &GradeConfig {
        &self.config
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.vars.recovery_timeout
    }

    pub fn is_recovering(&self) -> bool {
        self.vars.recovery_at.is_some()
    }

    /// Average of the remembered safe operating points.
    pub fn stable_bitrate(&self) -> Option<u64> {
        self.vars
            .stable_bitrates
            .average()
            .map(|average| average.round() as u64)
    }

    /// Stable average when every remembered point is within the tolerance.
    pub fn steady_bitrate(&self) -> Option<u64> {
        let window = &self.vars.stable_bitrates;
        if window.len() < STEADY_MIN_SAMPLES {
            return None;
        }
        let (min, max, average) = (window.minimum()?, window.maximum()?, window.average()?);
        let tolerance = average * self.config.steady_tolerance;
        if min >= average - tolerance && max <= average + tolerance {
            Some(average.round() as u64)
        } else {
            None
        }
    }

    fn grow_timeout(&mut self) {
        self.vars.recovery_timeout =
            (self.vars.recovery_timeout * 2).min(self.config.max_recovery_timeout);
    }

    fn shrink_timeout(&mut self) {
        self.vars.recovery_timeout = self
            .vars
            .recovery_timeout
            .mul_f64(0.75)
            .max(self.config.min_recovery_timeout);
    }
}

impl BitrateStrategy for GradeStrategy {
    fn compute(&mut self, input: &BitrateInput<'_>, now: Instant) -> BitrateDecision {
        let mut bitrate = input.bitrate;

        self.vars.losses.push(input.report.loss());
        let loss = self.vars.losses.average().unwrap_or(0.0);

        if self
            .vars
            .next_stable_sample
            .is_none_or(|deadline| now >= deadline)
        {
            self.vars.next_stable_sample = Some(now + self.config.stable_interval);
            if loss < self.config.loss_low {
                let safe = input
                    .constraint
                    .map_or(bitrate, |c| c.min(bitrate))
                    .min(input.bounds.maximum());
                self.vars.stable_bitrates.push(safe as f64);
            }
        }

        match input.constraint {
            None => {
                if self.vars.recovery_at.take().is_some() {
                    log::debug!("abr grade: constraint released, recovery over");
                }
                self.vars.constraint = None;
            }
            Some(constraint) => {
                let decreased = self.vars.constraint.is_none_or(|prev| constraint < prev);
                if decreased {
                    if self.vars.recovery_at.is_some() {
                        self.grow_timeout();
                        log::debug!(
                            "abr grade: constraint {constraint} during recovery, timeout {:?}",
                            self.vars.recovery_timeout
                        );
                    } else if !self.vars.constraint_seen {
                        bitrate = (bitrate / 2).min(constraint);
                        log::debug!(
                            "abr grade: first constraint {constraint}, halved to {bitrate}"
                        );
                    }
                    self.vars.constraint_seen = true;
                    self.vars.recovery_at = Some(now + self.vars.recovery_timeout);
                } else if self.vars.recovery_at.is_some_and(|at| now >= at) {
                    if loss < self.config.loss_low {
                        let mut proposed = bitrate as f64 * (1.0 + self.config.increase);
                        if let Some(anchor) = self.stable_bitrate()
                            && proposed > anchor as f64
                        {
                            proposed = bitrate as f64 * (1.0 + self.config.cautious_increase);
                        }
                        bitrate = proposed.round() as u64;
                        self.shrink_timeout();
                        self.vars.recovery_at = Some(now + self.vars.recovery_timeout);
                        log::debug!("abr grade: recovering up to {bitrate}");
                    } else if loss < self.config.loss_high {
                        bitrate = (bitrate as f64 * (1.0 - self.config.decrease)).round() as u64;
                        self.grow_timeout();
                        self.vars.recovery_at = Some(now + self.vars.recovery_timeout);
                        log::debug!("abr grade: loss {loss:.1}%, recovering down to {bitrate}");
                    }
                }
                // the constraint is a ceiling whatever the grade
                bitrate = bitrate.min(constraint);
                self.vars.constraint = Some(constraint);
            }
        }

        BitrateDecision::new(bitrate).with_stable_bitrate(self.steady_bitrate())
    }

    fn reset(&mut self) {
        self.vars = GradeVars::new(&self.config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abr::BitrateBounds;
    use crate::report::NetworkReport;

    fn compute(
        strategy: &mut GradeStrategy,
        bitrate: u64,
        constraint: Option<u64>,
        loss: f64,
        now: Instant,
    ) -> BitrateDecision {
        let bounds = BitrateBounds::default();
        let report = NetworkReport::default().with_loss_perc(loss);
        strategy.compute(
            &BitrateInput {
                bitrate,
                constraint,
                report: &report,
                bounds: &bounds,
            },
            now,
        )
    }

    #[test]
    fn test_grade_first_constraint_halves() {
        let mut s = GradeStrategy::default();
        let now = Instant::now();
        let d = compute(&mut s, 2_000_000, Some(1_500_000), 0.0, now);
        assert_eq!(d.bitrate, 1_000_000);
        assert!(s.is_recovering());
        assert_eq!(s.recovery_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_grade_constraint_during_recovery_grows_timeout() {
        let mut s = GradeStrategy::default();
        let now = Instant::now();
        compute(&mut s, 2_000_000, Some(1_500_000), 0.0, now);
        let d = compute(&mut s, 1_000_000, Some(1_200_000), 0.0, now);
        // no second halving
        assert_eq!(d.bitrate, 1_000_000);
        assert_eq!(s.recovery_timeout(), Duration::from_secs(5));

        for _ in 0..10 {
            let c = s.vars.constraint.unwrap() - 1;
            compute(&mut s, 1_000_000, Some(c), 0.0, now);
        }
        assert_eq!(s.recovery_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_grade_later_constraint_clamps() {
        let mut s = GradeStrategy::default();
        let t0 = Instant::now();
        compute(&mut s, 2_000_000, Some(1_500_000), 0.0, t0);
        compute(&mut s, 1_000_000, None, 0.0, t0);
        assert!(!s.is_recovering());
        let d = compute(&mut s, 1_000_000, Some(800_000), 0.0, t0);
        assert_eq!(d.bitrate, 800_000);
        assert!(s.is_recovering());
    }

    #[test]
    fn test_grade_recovery_up_and_timeout_shrink() {
        let mut s = GradeStrategy::default();
        let t0 = Instant::now();
        compute(&mut s, 1_000_000, Some(1_500_000), 0.0, t0);
        compute(&mut s, 1_000_000, Some(1_200_000), 0.0, t0);
        assert_eq!(s.recovery_timeout(), Duration::from_secs(5));

        // before the timeout nothing moves
        let d = compute(&mut s, 1_000_000, Some(1_200_000), 0.0, t0 + Duration::from_secs(4));
        assert_eq!(d.bitrate, 1_000_000);
        assert_eq!(s.stable_bitrate(), Some(1_000_000));

        // +5% would overshoot the stable average
        let d = compute(&mut s, 1_000_000, Some(1_200_000), 0.0, t0 + Duration::from_secs(5));
        assert_eq!(d.bitrate, 1_005_000);
        assert_eq!(s.recovery_timeout(), Duration::from_millis(3750));
    }

    #[test]
    fn test_grade_recovery_up_below_anchor() {
        let mut s = GradeStrategy::default();
        let t0 = Instant::now();
        // stable point at 2_000_000 without constraint
        compute(&mut s, 2_000_000, None, 0.0, t0);
        compute(&mut s, 2_000_000, Some(1_500_000), 0.0, t0);
        let d = compute(
            &mut s,
            1_000_000,
            Some(1_500_000),
            0.0,
            t0 + Duration::from_millis(2500),
        );
        assert_eq!(d.bitrate, 1_050_000);
        assert_eq!(s.recovery_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_grade_never_above_constraint() {
        let mut s = GradeStrategy::default();
        let t0 = Instant::now();
        // halving alone would leave 1_500_000
        let d = compute(&mut s, 3_000_000, Some(500_000), 0.0, t0);
        assert_eq!(d.bitrate, 500_000);

        // during recovery a tighter constraint still caps
        let d = compute(&mut s, 500_000, Some(400_000), 0.0, t0);
        assert_eq!(d.bitrate, 400_000);

        // the graded increase stops at the ceiling
        let d = compute(&mut s, 400_000, Some(400_000), 0.0, t0 + Duration::from_secs(5));
        assert_eq!(d.bitrate, 400_000);
        assert_eq!(s.recovery_timeout(), Duration::from_millis(3750));
    }

    #[test]
    fn test_grade_recovery_moderate_loss_decreases() {
        let mut s = GradeStrategy::default();
        let t0 = Instant::now();
        compute(&mut s, 2_000_000, Some(1_500_000), 30.0, t0);
        let d = compute(
            &mut s,
            1_000_000,
            Some(1_500_000),
            30.0,
            t0 + Duration::from_millis(2500),
        );
        assert_eq!(d.bitrate, 990_000);
        assert_eq!(s.recovery_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_grade_recovery_extreme_loss_waits() {
        let mut s = GradeStrategy::default();
        let t0 = Instant::now();
        compute(&mut s, 2_000_000, Some(1_500_000), 900.0, t0);
        let d = compute(
            &mut s,
            1_000_000,
            Some(1_500_000),
            900.0,
            t0 + Duration::from_millis(2500),
        );
        assert_eq!(d.bitrate, 1_000_000);
        assert_eq!(s.recovery_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_grade_stable_window_and_steady() {
        let mut s = GradeStrategy::default();
        let t0 = Instant::now();
        let interval = Duration::from_secs(4);

        let d = compute(&mut s, 1_000_000, None, 0.0, t0);
        assert_eq!(d.stable_bitrate, None);
        // not sampled again within the interval
        compute(&mut s, 5_000_000, None, 0.0, t0 + interval / 2);
        assert_eq!(s.vars.stable_bitrates.len(), 1);

        compute(&mut s, 1_100_000, Some(1_050_000), 0.0, t0 + interval);
        let d = compute(&mut s, 950_000, None, 0.0, t0 + interval * 2);
        assert_eq!(s.vars.stable_bitrates.len(), 3);
        assert_eq!(d.stable_bitrate, Some(1_000_000));

        // an outlier far from the average breaks steadiness
        let d = compute(&mut s, 2_800_000, None, 0.0, t0 + interval * 3);
        assert_eq!(d.stable_bitrate, None);
    }

    #[test]
    fn test_grade_lossy_samples_not_stable() {
        let mut s = GradeStrategy::default();
        let t0 = Instant::now();
        compute(&mut s, 1_000_000, None, 50.0, t0);
        assert!(s.vars.stable_bitrates.is_empty());
        assert_eq!(s.stable_bitrate(), None);
    }

    #[test]
    fn test_grade_reset() {
        let mut s = GradeStrategy::default();
        let t0 = Instant::now();
        compute(&mut s, 2_000_000, Some(1_500_000), 0.0, t0);
        compute(&mut s, 1_000_000, Some(1_200_000), 0.0, t0);
        s.reset();
        assert!(!s.is_recovering());
        assert_eq!(s.recovery_timeout(), Duration::from_millis(2500));
        assert_eq!(s.stable_bitrate(), None);
        // first constraint again after reset
        let d = compute(&mut s, 2_000_000, Some(1_500_000), 0.0, t0);
        assert_eq!(d.bitrate, 1_000_000);
    }
}
