//! Loss-gradient bitrate strategy.

use super::{BitrateDecision, BitrateInput, BitrateStrategy};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Default number of steps needed to recover from the stable bitrate to the maximum.
pub const DEFAULT_RECOVERY_STEPS: u32 = 2;
/// Default loss-free duration required before probing upward.
pub const DEFAULT_APPRECIATION_DURATION: Duration = Duration::from_millis(4000);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinearConfig {
    /// Least number of probes splitting the way back to the maximum.
    pub recovery_steps: u32,
    /// Loss-free duration before each upward probe.
    #[serde(with = "crate::serde_millis")]
    pub appreciation_duration: Duration,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            recovery_steps: DEFAULT_RECOVERY_STEPS,
            appreciation_duration: DEFAULT_APPRECIATION_DURATION,
        }
    }
}

impl LinearConfig {
    pub fn with_recovery_steps(mut self, recovery_steps: u32) -> Self {
        self.recovery_steps = recovery_steps;
        self
    }

    pub fn with_appreciation_duration(mut self, appreciation_duration: Duration) -> Self {
        self.appreciation_duration = appreciation_duration;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LinearVars {
    /// Last loss seen, +inf once a loss-free report breaks the streak.
    loss: f64,
    /// Deadline of the running appreciation window, `None` when not stable.
    stable_since: Option<Instant>,
    /// Bitrate when the link became stable, base of the recovery steps.
    stable_bitrate: u64,
    recovery_steps: u32,
}

impl LinearVars {
    fn new(config: &LinearConfig) -> Self {
        Self {
            loss: f64::INFINITY,
            stable_since: None,
            stable_bitrate: 0,
            recovery_steps: config.recovery_steps,
        }
    }
}

/// Loss-gradient strategy.
///
/// A non-improving loss decreases the bitrate by the loss fraction, and each
/// appreciation window without any loss probes back toward the maximum by
/// `ceil((maximum - stable_bitrate) / steps)`. Every new stable period adds a
/// step, every successful probe removes one down to the configured
/// `recovery_steps`, so recovery after repeated congestion gets more cautious.
#[derive(Debug, Clone)]
pub struct LinearStrategy {
    config: LinearConfig,
    vars: LinearVars,
}

impl Default for LinearStrategy {
    fn default() -> Self {
        Self::new(LinearConfig::default())
    }
}

impl LinearStrategy {
    pub fn new(mut config: LinearConfig) -> Self {
        config.recovery_steps = config.recovery_steps.max(1);
        Self {
            vars: LinearVars::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// Current number of steps splitting the next probe.
    pub fn recovery_steps(&self) -> u32 {
        self.vars.recovery_steps
    }

    pub fn is_stable(&self) -> bool {
        self.vars.stable_since.is_some()
    }
}

impl BitrateStrategy for LinearStrategy {
    fn compute(&mut self, input: &BitrateInput<'_>, now: Instant) -> BitrateDecision {
        let vars = &mut self.vars;
        let mut bitrate = input.bitrate;

        if let Some(constraint) = input.constraint
            && bitrate > constraint
        {
            log::debug!("abr linear: {bitrate} above constraint {constraint}");
            vars.stable_since = None;
            return BitrateDecision::new(constraint);
        }

        let loss = input.report.loss();
        if loss > 0.0 {
            // any loss voids the running appreciation window
            vars.stable_since = None;
            if loss >= vars.loss {
                let fraction = (loss / 100.0).min(1.0);
                bitrate = (bitrate as f64 * (1.0 - fraction)).round() as u64;
                log::debug!("abr linear: loss {loss}% not improving, bitrate {bitrate}");
            }
            vars.loss = loss;
            return BitrateDecision::new(bitrate);
        }

        vars.loss = f64::INFINITY;
        match vars.stable_since {
            None => {
                vars.stable_since = Some(now + self.config.appreciation_duration);
                vars.stable_bitrate = bitrate;
                vars.recovery_steps = vars.recovery_steps.saturating_add(1);
                BitrateDecision::new(bitrate)
            }
            Some(since) if now >= since => {
                let headroom = input.bounds.maximum().saturating_sub(vars.stable_bitrate);
                let step = headroom.div_ceil(u64::from(vars.recovery_steps));
                log::debug!(
                    "abr linear: stable since {:?}, +{step} in {} steps",
                    self.config.appreciation_duration,
                    vars.recovery_steps
                );
                bitrate = bitrate.saturating_add(step);
                vars.recovery_steps = vars
                    .recovery_steps
                    .saturating_sub(1)
                    .max(self.config.recovery_steps);
                vars.stable_since = Some(now + self.config.appreciation_duration);
                BitrateDecision::new(bitrate).with_stable_bitrate(Some(vars.stable_bitrate))
            }
            Some(_) => BitrateDecision::new(bitrate),
        }
    }

    fn reset(&mut self) {
        self.vars = LinearVars::new(&self.config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abr::BitrateBounds;
    use crate::report::NetworkReport;

    fn compute(
        strategy: &mut LinearStrategy,
        bitrate: u64,
        constraint: Option<u64>,
        loss: f64,
        now: Instant,
    ) -> u64 {
        let bounds = BitrateBounds::default();
        let report = NetworkReport::default().with_loss_perc(loss);
        strategy
            .compute(
                &BitrateInput {
                    bitrate,
                    constraint,
                    report: &report,
                    bounds: &bounds,
                },
                now,
            )
            .bitrate
    }

    #[test]
    fn test_linear_constraint_first() {
        let mut s = LinearStrategy::default();
        let now = Instant::now();
        // loss is ignored while above the constraint
        assert_eq!(compute(&mut s, 2_000_000, Some(1_200_000), 50.0, now), 1_200_000);
        assert!(!s.is_stable());
        // at or below the constraint the loss is evaluated
        assert_eq!(compute(&mut s, 1_000_000, Some(1_200_000), 0.0, now), 1_000_000);
        assert!(s.is_stable());
    }

    #[test]
    fn test_linear_first_loss_is_remembered_only() {
        let mut s = LinearStrategy::default();
        let now = Instant::now();
        assert_eq!(compute(&mut s, 1_000_000, None, 5.0, now), 1_000_000);
        assert_eq!(compute(&mut s, 1_000_000, None, 10.0, now), 900_000);
        // equal loss still degrades
        assert_eq!(compute(&mut s, 900_000, None, 10.0, now), 810_000);
        // improving loss holds
        assert_eq!(compute(&mut s, 810_000, None, 4.0, now), 810_000);
    }

    #[test]
    fn test_linear_loss_free_breaks_streak() {
        let mut s = LinearStrategy::default();
        let now = Instant::now();
        compute(&mut s, 1_000_000, None, 5.0, now);
        compute(&mut s, 1_000_000, None, 0.0, now);
        // the streak restarted, 6% is a first loss again
        assert_eq!(compute(&mut s, 1_000_000, None, 6.0, now), 1_000_000);
    }

    #[test]
    fn test_linear_recovery_steps_decay() {
        let mut s = LinearStrategy::default();
        let window = DEFAULT_APPRECIATION_DURATION;
        let t0 = Instant::now();

        // stable start: 3 steps for the first probe
        assert_eq!(compute(&mut s, 1_200_000, None, 0.0, t0), 1_200_000);
        assert_eq!(s.recovery_steps(), 3);

        // not yet elapsed
        assert_eq!(
            compute(&mut s, 1_200_000, None, 0.0, t0 + window / 2),
            1_200_000
        );

        // (3_000_000 - 1_200_000) / 3
        assert_eq!(compute(&mut s, 1_200_000, None, 0.0, t0 + window), 1_800_000);
        assert_eq!(s.recovery_steps(), 2);

        // next probe splits in 2 from the same anchor
        assert_eq!(
            compute(&mut s, 1_800_000, None, 0.0, t0 + window * 2),
            2_700_000
        );
        // never below the configured floor
        assert_eq!(s.recovery_steps(), 2);
    }

    #[test]
    fn test_linear_congestion_restarts_stability() {
        let mut s = LinearStrategy::default();
        let window = DEFAULT_APPRECIATION_DURATION;
        let t0 = Instant::now();

        compute(&mut s, 1_000_000, None, 0.0, t0);
        compute(&mut s, 1_000_000, None, 3.0, t0 + window / 2);
        compute(&mut s, 1_000_000, None, 3.0, t0 + window / 2);
        assert!(!s.is_stable());

        // stability starts over, the deadline is not the old one
        assert_eq!(compute(&mut s, 970_000, None, 0.0, t0 + window), 970_000);
        assert_eq!(s.recovery_steps(), 4);
        assert_eq!(compute(&mut s, 970_000, None, 0.0, t0 + window), 970_000);
    }

    #[test]
    fn test_linear_lossy_window_holds() {
        let mut s = LinearStrategy::default();
        let t0 = Instant::now();

        assert_eq!(compute(&mut s, 1_000_000, None, 0.0, t0), 1_000_000);
        // first loss after a clean report only holds the bitrate
        assert_eq!(
            compute(&mut s, 1_000_000, None, 30.0, t0 + Duration::from_secs(2)),
            1_000_000
        );
        assert!(!s.is_stable());
        // the window that contained loss is not rewarded
        assert_eq!(
            compute(&mut s, 1_000_000, None, 0.0, t0 + Duration::from_secs(4)),
            1_000_000
        );
        assert!(s.is_stable());
        // a clean window from here on is
        assert!(compute(&mut s, 1_000_000, None, 0.0, t0 + Duration::from_secs(8)) > 1_000_000);
    }

    #[test]
    fn test_linear_full_loss() {
        let mut s = LinearStrategy::default();
        let now = Instant::now();
        compute(&mut s, 1_000_000, None, 100.0, now);
        assert_eq!(compute(&mut s, 1_000_000, None, 250.0, now), 0);
    }

    #[test]
    fn test_linear_reset() {
        let mut s = LinearStrategy::new(LinearConfig::default().with_recovery_steps(0));
        assert_eq!(s.config().recovery_steps, 1);
        let now = Instant::now();
        compute(&mut s, 1_000_000, None, 0.0, now);
        assert!(s.is_stable());
        s.reset();
        assert!(!s.is_stable());
        assert_eq!(s.recovery_steps(), 1);
    }

    #[test]
    fn test_linear_config_deserialize() {
        let config: LinearConfig =
            serde_json::from_str(r#"{"recoverySteps": 4, "appreciationDuration": 2500}"#).unwrap();
        assert_eq!(config.recovery_steps, 4);
        assert_eq!(config.appreciation_duration, Duration::from_millis(2500));
    }
}
