//! Adaptive Bitrate (ABR) - sender side target bitrate control.
//!
//! A [`BitrateController`] is fed periodically (typically every second) with
//! the bitrate currently pushed by the sender, an optional ceiling imposed by a
//! downstream element (the *constraint*) and a [`NetworkReport`]. It returns
//! the new target bitrate, always clamped to the configured
//! `[minimum, maximum]` bounds.
//!
//! The congestion algorithm itself is a [`BitrateStrategy`] selected at
//! construction time:
//!
//! | Strategy | Description |
//! |----------|-------------|
//! | [`LinearStrategy`] | Loss-gradient: decrease proportionally to a non-improving loss, probe back up in decaying steps after each loss-free appreciation window |
//! | [`GradeStrategy`] | Stability-windowed: track a rolling window of safe operating points and recover from constraint hits with an exponential back-off |
//!
//! # Resolution adaptation
//!
//! When a [`MediaSource`] is attached, the controller forwards every steady
//! bitrate reported by the strategy to a [`ResolutionAdapter`], which may ask
//! the source to halve or double its captured resolution. Such requests are
//! advisory: failures are logged and never surface to the caller.
//!
//! # Example
//!
//! ```
//! use rtc_adaptive::{BitrateControllerBuilder, LinearStrategy, NetworkReport};
//! use std::time::{Duration, Instant};
//!
//! let mut abr = BitrateControllerBuilder::new(LinearStrategy::default())
//!     .with_startup(1_000_000)
//!     .with_maximum(2_500_000)
//!     .build();
//!
//! let now = Instant::now();
//! // First call after (re)connection always yields the startup bitrate
//! let bitrate = abr.compute(None, None, None, now);
//! assert_eq!(bitrate, 1_000_000);
//!
//! let report = NetworkReport::default().with_loss_perc(0.0);
//! let bitrate = abr.compute(Some(bitrate), None, Some(&report), now + Duration::from_secs(1));
//! assert!(bitrate >= abr.minimum() && bitrate <= abr.maximum());
//! ```

pub(crate) mod grade;
pub(crate) mod linear;
pub(crate) mod resolution;

use crate::report::NetworkReport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

pub use grade::{GradeConfig, GradeStrategy};
pub use linear::{LinearConfig, LinearStrategy};
pub use resolution::{MediaSource, ResolutionAdapter, ResolutionConfig};

/// Default startup bitrate, 2 Mbps.
pub const DEFAULT_STARTUP_BITRATE: u64 = 2_000_000;
/// Default minimum bitrate, 200 kbps.
pub const DEFAULT_MINIMUM_BITRATE: u64 = 200_000;
/// Default maximum bitrate, 3 Mbps.
pub const DEFAULT_MAXIMUM_BITRATE: u64 = 3_000_000;

/// Serializable bitrate bounds configuration, in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BitrateConfig {
    pub startup: u64,
    pub minimum: u64,
    pub maximum: u64,
}

impl Default for BitrateConfig {
    fn default() -> Self {
        Self {
            startup: DEFAULT_STARTUP_BITRATE,
            minimum: DEFAULT_MINIMUM_BITRATE,
            maximum: DEFAULT_MAXIMUM_BITRATE,
        }
    }
}

/// Startup, minimum and maximum bitrate keeping `minimum <= startup <= maximum`.
///
/// Each setter lets the bound it sets win: the other bounds are moved to
/// restore the ordering instead of rejecting the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateBounds {
    startup: u64,
    minimum: u64,
    maximum: u64,
}

impl Default for BitrateBounds {
    fn default() -> Self {
        BitrateConfig::default().into()
    }
}

impl From<BitrateConfig> for BitrateBounds {
    /// Normalize a configuration: `maximum` wins over `minimum`, and
    /// `startup` is clamped between both.
    fn from(config: BitrateConfig) -> Self {
        let maximum = config.maximum;
        let minimum = config.minimum.min(maximum);
        Self {
            startup: config.startup.clamp(minimum, maximum),
            minimum,
            maximum,
        }
    }
}

impl BitrateBounds {
    pub fn startup(&self) -> u64 {
        self.startup
    }

    pub fn minimum(&self) -> u64 {
        self.minimum
    }

    pub fn maximum(&self) -> u64 {
        self.maximum
    }

    pub fn set_startup(&mut self, startup: u64) {
        self.startup = startup;
        self.minimum = self.minimum.min(startup);
        self.maximum = self.maximum.max(startup);
    }

    pub fn set_minimum(&mut self, minimum: u64) {
        self.minimum = minimum;
        self.maximum = self.maximum.max(minimum);
        self.startup = self.startup.max(minimum);
    }

    pub fn set_maximum(&mut self, maximum: u64) {
        self.maximum = maximum;
        self.minimum = self.minimum.min(maximum);
        self.startup = self.startup.min(maximum);
    }

    pub fn clamp(&self, bitrate: u64) -> u64 {
        bitrate.clamp(self.minimum, self.maximum)
    }
}

impl fmt::Display for BitrateBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{}] startup {}",
            self.minimum, self.maximum, self.startup
        )
    }
}

/// Inputs handed to a [`BitrateStrategy`] on every computation.
#[derive(Debug, Clone, Copy)]
pub struct BitrateInput<'a> {
    /// Bitrate currently pushed by the sender.
    pub bitrate: u64,
    /// Ceiling imposed by a downstream element, if any.
    pub constraint: Option<u64>,
    pub report: &'a NetworkReport,
    pub bounds: &'a BitrateBounds,
}

/// Outcome of a [`BitrateStrategy`] computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateDecision {
    /// New target bitrate, clamped to the bounds by the controller.
    pub bitrate: u64,
    /// Set when the strategy considers the link steady at this bitrate,
    /// which allows resolution adaptation.
    pub stable_bitrate: Option<u64>,
}

impl BitrateDecision {
    pub fn new(bitrate: u64) -> Self {
        Self {
            bitrate,
            stable_bitrate: None,
        }
    }

    pub fn with_stable_bitrate(mut self, stable_bitrate: Option<u64>) -> Self {
        self.stable_bitrate = stable_bitrate;
        self
    }
}

/// Congestion algorithm plugged into a [`BitrateController`].
///
/// Implementations own their learned state and must restore it wholesale in
/// [`reset`](BitrateStrategy::reset).
pub trait BitrateStrategy {
    fn compute(&mut self, input: &BitrateInput<'_>, now: Instant) -> BitrateDecision;

    fn reset(&mut self);
}

impl<S: BitrateStrategy + ?Sized> BitrateStrategy for Box<S> {
    fn compute(&mut self, input: &BitrateInput<'_>, now: Instant) -> BitrateDecision {
        (**self).compute(input, now)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Builder for the [`BitrateController`].
///
/// # Example
///
/// ```
/// use rtc_adaptive::{BitrateControllerBuilder, GradeConfig, GradeStrategy};
///
/// let abr = BitrateControllerBuilder::new(GradeStrategy::new(GradeConfig::default()))
///     .with_minimum(300_000)
///     .with_maximum(4_000_000)
///     .build();
/// assert_eq!(abr.startup(), 2_000_000);
/// ```
pub struct BitrateControllerBuilder<S> {
    strategy: S,
    bounds: BitrateBounds,
    resolution: ResolutionConfig,
    source: Option<Box<dyn MediaSource + Send>>,
}

impl<S: BitrateStrategy> BitrateControllerBuilder<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            bounds: BitrateBounds::default(),
            resolution: ResolutionConfig::default(),
            source: None,
        }
    }

    /// Replace all bounds at once.
    pub fn with_config(mut self, config: BitrateConfig) -> Self {
        self.bounds = config.into();
        self
    }

    pub fn with_startup(mut self, startup: u64) -> Self {
        self.bounds.set_startup(startup);
        self
    }

    pub fn with_minimum(mut self, minimum: u64) -> Self {
        self.bounds.set_minimum(minimum);
        self
    }

    pub fn with_maximum(mut self, maximum: u64) -> Self {
        self.bounds.set_maximum(maximum);
        self
    }

    pub fn with_resolution(mut self, resolution: ResolutionConfig) -> Self {
        self.resolution = resolution;
        self
    }

    /// Attach the media source whose resolution follows the stable bitrate.
    pub fn with_source(mut self, source: Box<dyn MediaSource + Send>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn build(self) -> BitrateController<S> {
        BitrateController {
            bounds: self.bounds,
            constraint: None,
            bitrate: None,
            strategy: self.strategy,
            resolution: ResolutionAdapter::new(self.resolution),
            source: self.source,
        }
    }
}

/// Sender side adaptive bitrate engine, keeping the target bitrate of a
/// [`BitrateStrategy`] within [`BitrateBounds`].
pub struct BitrateController<S> {
    bounds: BitrateBounds,
    constraint: Option<u64>,
    bitrate: Option<u64>,
    strategy: S,
    resolution: ResolutionAdapter,
    source: Option<Box<dyn MediaSource + Send>>,
}

impl<S: BitrateStrategy> BitrateController<S> {
    /// Create a controller with the given bounds and strategy.
    pub fn new(config: BitrateConfig, strategy: S) -> Self {
        BitrateControllerBuilder::new(strategy)
            .with_config(config)
            .build()
    }

    /// Compute the next target bitrate.
    ///
    /// * `current` - bitrate currently pushed, `None` right after (re)connection
    ///   in which case the startup bitrate is returned as is.
    /// * `constraint` - downstream ceiling, remembered as [`constraint`](Self::constraint).
    /// * `report` - latest network report, without it the bitrate is only
    ///   capped to the constraint.
    ///
    /// The result is always within `[minimum, maximum]` and never above the
    /// constraint of this call, unless that constraint is below the minimum.
    pub fn compute(
        &mut self,
        current: Option<u64>,
        constraint: Option<u64>,
        report: Option<&NetworkReport>,
        now: Instant,
    ) -> u64 {
        if constraint.is_some() {
            self.constraint = constraint;
        }

        let Some(current) = current else {
            log::debug!("abr: no current bitrate, using startup {}", self.bounds.startup);
            self.bitrate = Some(self.bounds.startup);
            return self.bounds.startup;
        };

        let decision = match report {
            Some(report) => self.strategy.compute(
                &BitrateInput {
                    bitrate: current,
                    constraint,
                    report,
                    bounds: &self.bounds,
                },
                now,
            ),
            None => BitrateDecision::new(current),
        };

        if let Some(stable_bitrate) = decision.stable_bitrate
            && let Some(source) = self.source.as_mut()
        {
            self.resolution.adapt(source.as_mut(), stable_bitrate);
        }

        // the constraint caps every strategy, the minimum still wins over it
        let bitrate = self
            .bounds
            .clamp(constraint.map_or(decision.bitrate, |c| decision.bitrate.min(c)));
        if bitrate != current {
            log::debug!(
                "abr: bitrate {current} -> {bitrate} (constraint {constraint:?}, bounds {})",
                self.bounds
            );
        }
        self.bitrate = Some(bitrate);
        bitrate
    }

    /// Forget every learned state, as if the controller was just built.
    pub fn reset(&mut self) {
        log::debug!("abr: reset");
        self.constraint = None;
        self.bitrate = None;
        self.strategy.reset();
    }

    pub fn bounds(&self) -> &BitrateBounds {
        &self.bounds
    }

    pub fn startup(&self) -> u64 {
        self.bounds.startup()
    }

    pub fn set_startup(&mut self, startup: u64) {
        self.bounds.set_startup(startup);
    }

    pub fn minimum(&self) -> u64 {
        self.bounds.minimum()
    }

    pub fn set_minimum(&mut self, minimum: u64) {
        self.bounds.set_minimum(minimum);
    }

    pub fn maximum(&self) -> u64 {
        self.bounds.maximum()
    }

    pub fn set_maximum(&mut self, maximum: u64) {
        self.bounds.set_maximum(maximum);
    }

    /// Last constraint observed by [`compute`](Self::compute).
    pub fn constraint(&self) -> Option<u64> {
        self.constraint
    }

    /// Last bitrate returned by [`compute`](Self::compute).
    pub fn bitrate(&self) -> Option<u64> {
        self.bitrate
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn attach_source(&mut self, source: Box<dyn MediaSource + Send>) {
        self.source = Some(source);
    }

    pub fn detach_source(&mut self) -> Option<Box<dyn MediaSource + Send>> {
        self.source.take()
    }
}
