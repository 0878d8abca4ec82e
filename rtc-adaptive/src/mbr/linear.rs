//! Default rendition switching predicates.

use super::TrackStrategy;
use crate::mbr::ladder::Track;
use crate::report::{MediaKind, NetworkReport};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest plausible interval between two video key frames.
pub const DEFAULT_MAXIMUM_GOP_DURATION: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinearTrackConfig {
    /// Elapsed time after which a video recovery is attempted without any
    /// key frame evidence.
    #[serde(with = "crate::serde_millis")]
    pub maximum_gop_duration: Duration,
}

impl Default for LinearTrackConfig {
    fn default() -> Self {
        Self {
            maximum_gop_duration: DEFAULT_MAXIMUM_GOP_DURATION,
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
struct LinearTrackVars {
    packets_lost: Option<u64>,
    nack_count: Option<u64>,
    /// Key frame counter when the current recovery window started.
    key_frames: Option<u64>,
    /// Elapsed time of the previous recovery check, to detect a new window.
    elapsed: Option<Duration>,
}

/// Congestion from loss corroborated by NACKs, recovery after a full GOP.
///
/// Congestion requires `packets_lost` to have strictly increased since the
/// previous report and, when the transport reports it, `nack_count` too: a
/// track switch shows packet count discontinuities without NACKs, which
/// must not trigger a second switch.
///
/// Audio may always recover. Video waits for a new key frame to be decoded
/// within the current recovery window, or for `maximum_gop_duration` to
/// elapse.
#[derive(Debug, Clone, Default)]
pub struct LinearTrackStrategy {
    config: LinearTrackConfig,
    vars: LinearTrackVars,
}

impl LinearTrackStrategy {
    pub fn new(config: LinearTrackConfig) -> Self {
        Self {
            config,
            vars: LinearTrackVars::default(),
        }
    }

    pub fn config(&self) -> &LinearTrackConfig {
        &self.config
    }
}

impl TrackStrategy for LinearTrackStrategy {
    fn down_bitrate(&mut self, _elapsed: Duration, _track: &Track, stats: &NetworkReport) -> bool {
        let Some(packets_lost) = stats.packets_lost else {
            return false;
        };

        let lost_more = self.vars.packets_lost.is_some_and(|prev| packets_lost > prev);
        self.vars.packets_lost = Some(packets_lost);

        let nacked_more = match stats.nack_count {
            Some(nack_count) => {
                let nacked_more = self.vars.nack_count.is_some_and(|prev| nack_count > prev);
                self.vars.nack_count = Some(nack_count);
                nacked_more
            }
            None => true,
        };

        lost_more && nacked_more
    }

    fn up_bitrate(&mut self, elapsed: Duration, track: &Track, stats: &NetworkReport) -> bool {
        if track.kind != MediaKind::Video {
            return true;
        }

        if self.vars.elapsed.is_some_and(|prev| elapsed < prev) {
            // congestion or switch since the previous check, new window
            self.vars.key_frames = None;
        }
        self.vars.elapsed = Some(elapsed);

        if elapsed > self.config.maximum_gop_duration {
            log::debug!("mbr: no decision for {elapsed:?}, forcing recovery attempt");
            return true;
        }

        let Some(key_frames) = stats.key_frames_decoded else {
            return false;
        };
        match self.vars.key_frames {
            None => {
                self.vars.key_frames = Some(key_frames);
                false
            }
            Some(snapshot) => key_frames > snapshot,
        }
    }

    fn reset(&mut self) {
        self.vars = LinearTrackVars::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video() -> Track {
        Track::new(1, MediaKind::Video, "H264", 1_000_000)
    }

    fn lost(packets_lost: u64, nack_count: Option<u64>) -> NetworkReport {
        NetworkReport {
            packets_lost: Some(packets_lost),
            nack_count,
            ..Default::default()
        }
    }

    #[test]
    fn test_down_requires_increase() {
        let mut s = LinearTrackStrategy::default();
        let track = video();
        assert!(!s.down_bitrate(Duration::ZERO, &track, &lost(5, None)));
        assert!(s.down_bitrate(Duration::ZERO, &track, &lost(6, None)));
        assert!(!s.down_bitrate(Duration::ZERO, &track, &lost(6, None)));
        assert!(!s.down_bitrate(Duration::ZERO, &track, &NetworkReport::default()));
    }

    #[test]
    fn test_down_requires_nack_corroboration() {
        let mut s = LinearTrackStrategy::default();
        let track = video();
        assert!(!s.down_bitrate(Duration::ZERO, &track, &lost(5, Some(2))));
        // loss discontinuity without NACK, e.g. after a switch
        assert!(!s.down_bitrate(Duration::ZERO, &track, &lost(9, Some(2))));
        assert!(s.down_bitrate(Duration::ZERO, &track, &lost(12, Some(3))));
    }

    #[test]
    fn test_up_audio_always() {
        let mut s = LinearTrackStrategy::default();
        let audio = Track::new(2, MediaKind::Audio, "opus", 64_000);
        assert!(s.up_bitrate(Duration::ZERO, &audio, &NetworkReport::default()));
    }

    #[test]
    fn test_up_video_waits_for_key_frame() {
        let mut s = LinearTrackStrategy::default();
        let track = video();
        let kf = |n| NetworkReport::default().with_key_frames_decoded(n);

        assert!(!s.up_bitrate(Duration::from_secs(1), &track, &kf(3)));
        assert!(!s.up_bitrate(Duration::from_secs(2), &track, &kf(3)));
        assert!(s.up_bitrate(Duration::from_secs(3), &track, &kf(4)));

        // a new window needs a new snapshot
        assert!(!s.up_bitrate(Duration::from_secs(1), &track, &kf(5)));
        assert!(s.up_bitrate(Duration::from_secs(2), &track, &kf(6)));
    }

    #[test]
    fn test_up_video_forced_after_gop() {
        let mut s = LinearTrackStrategy::default();
        let track = video();
        assert!(!s.up_bitrate(Duration::from_secs(10), &track, &NetworkReport::default()));
        assert!(s.up_bitrate(
            Duration::from_millis(10_001),
            &track,
            &NetworkReport::default()
        ));
    }

    #[test]
    fn test_reset() {
        let mut s = LinearTrackStrategy::default();
        let track = video();
        s.down_bitrate(Duration::ZERO, &track, &lost(5, Some(1)));
        s.reset();
        // previous counters are forgotten
        assert!(!s.down_bitrate(Duration::ZERO, &track, &lost(6, Some(2))));
    }
}
