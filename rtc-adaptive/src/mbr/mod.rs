//! Multi-Bitrate (MBR) - receiver side rendition selection.
//!
//! A [`TrackSelector`] walks a [`Ladder`] of pre-encoded renditions one step
//! at a time: down when the reference track shows congestion, up when it has
//! recovered for longer than the current back-off (`up_delay`).
//!
//! # Algorithm
//!
//! 1. The reference is the selected video track, or the audio one without
//!    video. Without either, the selector resets and does nothing.
//! 2. A new reference restarts the elapsed time accounting.
//! 3. Congestion is asked to the [`TrackStrategy`] with the time elapsed since
//!    the reference was selected, recovery with the time elapsed since the
//!    last congestion.
//! 4. Audio is switched before video, being the cheaper change.
//! 5. Every down switch grows `up_delay` by `learning_up_step`, up to
//!    `maximum_up_delay`, which prevents oscillating between two renditions.
//!
//! # Example
//!
//! ```
//! use rtc_adaptive::{Ladder, MediaKind, MediaTracks, NetworkReport, Track, TrackSelector};
//! use std::collections::HashMap;
//! use std::time::{Duration, Instant};
//!
//! let ladder = Ladder::new(vec![
//!     Track::new(0, MediaKind::Video, "H264", 1_000_000),
//!     Track::new(1, MediaKind::Video, "H264", 2_000_000),
//! ])
//! .unwrap();
//! let mut selected = MediaTracks { video: Some(1), ..Default::default() };
//! let mut mbr: TrackSelector = TrackSelector::default();
//!
//! let t0 = Instant::now();
//! let mut stats = HashMap::new();
//! stats.insert(1, NetworkReport { packets_lost: Some(0), nack_count: Some(0), ..Default::default() });
//! assert!(!mbr.compute(&ladder, &mut selected, &stats, t0));
//!
//! stats.insert(1, NetworkReport { packets_lost: Some(40), nack_count: Some(6), ..Default::default() });
//! assert!(mbr.compute(&ladder, &mut selected, &stats, t0 + Duration::from_secs(1)));
//! assert_eq!(selected.video, Some(0));
//! ```

pub(crate) mod ladder;
pub(crate) mod linear;

use crate::error::{Error, Result};
use crate::report::{MediaKind, NetworkReport};
use ladder::{Ladder, Step, Track};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub use linear::{LinearTrackConfig, LinearTrackStrategy};

/// Default growth of the up-switch back-off on every down switch.
pub const DEFAULT_LEARNING_UP_STEP: Duration = Duration::from_millis(1400);
/// Default ceiling of the up-switch back-off.
pub const DEFAULT_MAXIMUM_UP_DELAY: Duration = Duration::from_millis(28000);

/// Renditions currently subscribed, by kind.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaTracks {
    pub audio: Option<u32>,
    pub video: Option<u32>,
    pub data: Option<u32>,
}

impl MediaTracks {
    pub fn get(&self, kind: MediaKind) -> Option<u32> {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
            MediaKind::Data => self.data,
            MediaKind::Unspecified => None,
        }
    }

    fn slot(&mut self, kind: MediaKind) -> Option<&mut Option<u32>> {
        match kind {
            MediaKind::Audio => Some(&mut self.audio),
            MediaKind::Video => Some(&mut self.video),
            MediaKind::Data => Some(&mut self.data),
            MediaKind::Unspecified => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackSelectorConfig {
    #[serde(with = "crate::serde_millis")]
    pub learning_up_step: Duration,
    #[serde(with = "crate::serde_millis")]
    pub maximum_up_delay: Duration,
}

impl Default for TrackSelectorConfig {
    fn default() -> Self {
        Self {
            learning_up_step: DEFAULT_LEARNING_UP_STEP,
            maximum_up_delay: DEFAULT_MAXIMUM_UP_DELAY,
        }
    }
}

impl TrackSelectorConfig {
    pub fn with_learning_up_step(mut self, learning_up_step: Duration) -> Self {
        self.learning_up_step = learning_up_step;
        self
    }

    pub fn with_maximum_up_delay(mut self, maximum_up_delay: Duration) -> Self {
        self.maximum_up_delay = maximum_up_delay;
        self
    }
}

/// Congestion and recovery predicates plugged into a [`TrackSelector`].
pub trait TrackStrategy {
    /// Whether `track` is congested, `elapsed` being the time since it was selected.
    fn down_bitrate(&mut self, elapsed: Duration, track: &Track, stats: &NetworkReport) -> bool;

    /// Whether `track` has recovered, `elapsed` being the time since the
    /// last congestion.
    fn up_bitrate(&mut self, elapsed: Duration, track: &Track, stats: &NetworkReport) -> bool;

    fn reset(&mut self);
}

impl<S: TrackStrategy + ?Sized> TrackStrategy for Box<S> {
    fn down_bitrate(&mut self, elapsed: Duration, track: &Track, stats: &NetworkReport) -> bool {
        (**self).down_bitrate(elapsed, track, stats)
    }

    fn up_bitrate(&mut self, elapsed: Duration, track: &Track, stats: &NetworkReport) -> bool {
        (**self).up_bitrate(elapsed, track, stats)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Builder for the [`TrackSelector`].
///
/// # Example
///
/// ```
/// use rtc_adaptive::{LinearTrackConfig, LinearTrackStrategy, TrackSelectorBuilder};
/// use std::time::Duration;
///
/// let mbr = TrackSelectorBuilder::new(LinearTrackStrategy::new(LinearTrackConfig::default()))
///     .with_learning_up_step(Duration::from_secs(2))
///     .build();
/// assert_eq!(mbr.config().learning_up_step, Duration::from_secs(2));
/// ```
pub struct TrackSelectorBuilder<S> {
    config: TrackSelectorConfig,
    strategy: S,
}

impl<S: TrackStrategy> TrackSelectorBuilder<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            config: TrackSelectorConfig::default(),
            strategy,
        }
    }

    pub fn with_config(mut self, config: TrackSelectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_learning_up_step(mut self, learning_up_step: Duration) -> Self {
        self.config.learning_up_step = learning_up_step;
        self
    }

    pub fn with_maximum_up_delay(mut self, maximum_up_delay: Duration) -> Self {
        self.config.maximum_up_delay = maximum_up_delay;
        self
    }

    pub fn build(self) -> TrackSelector<S> {
        TrackSelector::new(self.config, self.strategy)
    }
}

/// Reference track bookkeeping.
#[derive(Debug, Clone, Copy)]
struct Reference {
    index: u32,
    selected_at: Instant,
    congested_at: Instant,
    /// Start of the current congestion-free streak.
    good_since: Option<Instant>,
}

/// Receiver side rendition selector, stepping the selected [`MediaTracks`]
/// along a [`Ladder`] on congestion and recovery.
pub struct TrackSelector<S = LinearTrackStrategy> {
    config: TrackSelectorConfig,
    strategy: S,
    reference: Option<Reference>,
    up_delay: Duration,
}

impl Default for TrackSelector<LinearTrackStrategy> {
    fn default() -> Self {
        Self::new(TrackSelectorConfig::default(), LinearTrackStrategy::default())
    }
}

impl<S: TrackStrategy> TrackSelector<S> {
    pub fn new(config: TrackSelectorConfig, strategy: S) -> Self {
        Self {
            config,
            strategy,
            reference: None,
            up_delay: Duration::ZERO,
        }
    }

    /// Decide whether to switch rendition, updating `selected` in place.
    ///
    /// Returns `true` when a switch occurred. Missing ladder entries or
    /// statistics are logged and yield no decision.
    pub fn compute(
        &mut self,
        ladder: &Ladder,
        selected: &mut MediaTracks,
        stats: &HashMap<u32, NetworkReport>,
        now: Instant,
    ) -> bool {
        match self.try_compute(ladder, selected, stats, now) {
            Ok(switched) => switched,
            Err(err) => {
                log::error!("mbr: {err}");
                false
            }
        }
    }

    fn try_compute(
        &mut self,
        ladder: &Ladder,
        selected: &mut MediaTracks,
        stats: &HashMap<u32, NetworkReport>,
        now: Instant,
    ) -> Result<bool> {
        let Some(index) = selected.video.or(selected.audio) else {
            self.reset();
            return Ok(false);
        };

        let mut reference = match self.reference {
            Some(reference) if reference.index == index => reference,
            _ => {
                log::debug!("mbr: reference track {index}");
                self.strategy.reset();
                Reference {
                    index,
                    selected_at: now,
                    congested_at: now,
                    good_since: None,
                }
            }
        };
        self.reference = Some(reference);

        let track = ladder.get(index).ok_or(Error::ErrTrackNotFound(index))?;
        let report = stats.get(&index).ok_or(Error::ErrMissingStats(index))?;

        let switched = if self.strategy.down_bitrate(
            now.saturating_duration_since(reference.selected_at),
            track,
            report,
        ) {
            reference.good_since = None;
            reference.congested_at = now;
            let switched = self.switch(ladder, selected, Step::Down);
            if switched {
                self.up_delay = (self.up_delay + self.config.learning_up_step)
                    .min(self.config.maximum_up_delay);
                log::debug!("mbr: up delay {:?}", self.up_delay);
            }
            switched
        } else {
            let good_since = *reference.good_since.get_or_insert(now);
            let switched = self.strategy.up_bitrate(
                now.saturating_duration_since(reference.congested_at),
                track,
                report,
            ) && now.saturating_duration_since(good_since) > self.up_delay
                && self.switch(ladder, selected, Step::Up);
            if switched {
                // one step per streak
                reference.good_since = Some(now);
            }
            switched
        };

        self.reference = Some(reference);
        Ok(switched)
    }

    /// Move the audio track, or else the video track, one step along the ladder.
    fn switch(&self, ladder: &Ladder, selected: &mut MediaTracks, step: Step) -> bool {
        for kind in [MediaKind::Audio, MediaKind::Video] {
            let Some(current) = selected.get(kind) else {
                continue;
            };
            let Some(next) = ladder.step(current, step).map(|track| track.index) else {
                continue;
            };
            if let Some(slot) = selected.slot(kind) {
                log::info!("mbr: {kind} {step:?} switch {current} -> {next}");
                *slot = Some(next);
                return true;
            }
        }
        log::debug!("mbr: no rendition {step:?} from {selected:?}");
        false
    }

    /// Forget the reference track, its timers and the learned `up_delay`.
    pub fn reset(&mut self) {
        self.reference = None;
        self.up_delay = Duration::ZERO;
        self.strategy.reset();
    }

    /// Current back-off before an up switch is allowed.
    pub fn up_delay(&self) -> Duration {
        self.up_delay
    }

    /// Index of the current reference track.
    pub fn reference(&self) -> Option<u32> {
        self.reference.map(|reference| reference.index)
    }

    pub fn config(&self) -> &TrackSelectorConfig {
        &self.config
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }
}
