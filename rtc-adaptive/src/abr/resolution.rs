//! Advisory capture resolution adaptation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Media source whose captured resolution can be adjusted, e.g. a camera
/// or screen capture track.
pub trait MediaSource {
    /// Current captured `(width, height)`, `None` if unknown.
    fn resolution(&self) -> Option<(u32, u32)>;

    /// Request a new captured resolution.
    fn apply_resolution(&mut self, width: u32, height: u32) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolutionConfig {
    /// Stable bitrate separating low and high resolution capture.
    pub threshold: u64,
    pub reference_width: u32,
    pub reference_height: u32,
    /// Fraction of the reference pixel count above which a source counts as
    /// high resolution.
    pub low_band: f64,
    /// Fraction of the reference pixel count a doubled resolution may reach.
    pub high_band: f64,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            threshold: 1_200_000,
            reference_width: 1280,
            reference_height: 720,
            low_band: 0.7,
            high_band: 1.3,
        }
    }
}

/// Picks a halved or doubled capture resolution from a stable bitrate.
///
/// Below `threshold`, a source near or above the reference pixel count is
/// asked for half its width and height. At or above `threshold`, a source
/// whose doubled resolution stays near the reference is asked for twice its
/// width and height.
#[derive(Debug, Clone, Default)]
pub struct ResolutionAdapter {
    config: ResolutionConfig,
}

impl ResolutionAdapter {
    pub fn new(config: ResolutionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    /// Resolution to request for a source at `width`x`height`, if any.
    pub fn target(&self, width: u32, height: u32, stable_bitrate: u64) -> Option<(u32, u32)> {
        let pixels = f64::from(width) * f64::from(height);
        let reference =
            f64::from(self.config.reference_width) * f64::from(self.config.reference_height);

        if stable_bitrate < self.config.threshold {
            if pixels > reference * self.config.low_band && width >= 2 && height >= 2 {
                return Some((width / 2, height / 2));
            }
        } else if pixels > 0.0 && pixels * 4.0 <= reference * self.config.high_band {
            return Some((width.saturating_mul(2), height.saturating_mul(2)));
        }
        None
    }

    /// Apply the target resolution to `source`, returning what was applied.
    ///
    /// Failures are logged and swallowed.
    pub fn adapt(&self, source: &mut dyn MediaSource, stable_bitrate: u64) -> Option<(u32, u32)> {
        let (width, height) = match source.resolution() {
            Some(resolution) => resolution,
            None => {
                log::trace!("resolution: {}", Error::ErrResolutionUnavailable);
                return None;
            }
        };

        let (target_width, target_height) = self.target(width, height, stable_bitrate)?;
        log::info!(
            "resolution: stable bitrate {stable_bitrate}, {width}x{height} -> {target_width}x{target_height}"
        );
        match source.apply_resolution(target_width, target_height) {
            Ok(()) => Some((target_width, target_height)),
            Err(err) => {
                log::warn!("resolution: {target_width}x{target_height} not applied: {err}");
                None
            }
        }
    }
}
