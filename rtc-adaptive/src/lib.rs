//! RTC Adaptive - Sans-IO congestion-adaptive quality control for real-time media.
//!
//! This crate decides, from periodic network statistics, how much bandwidth a
//! media session should use. It performs no I/O and reads no clock: every
//! decision takes the current [`Instant`](std::time::Instant) from the caller,
//! so the same inputs always yield the same outputs.
//!
//! # Controllers
//!
//! ## Sender side
//!
//! | Type | Description |
//! |------|-------------|
//! | [`BitrateController`] | Adaptive Bitrate (ABR): picks the encoder target bitrate within `[minimum, maximum]` |
//! | [`LinearStrategy`] | Loss-gradient congestion algorithm |
//! | [`GradeStrategy`] | Stability-windowed congestion algorithm with recovery back-off |
//! | [`ResolutionAdapter`] | Advisory capture resolution halving/doubling from the stable bitrate |
//!
//! ## Receiver side
//!
//! | Type | Description |
//! |------|-------------|
//! | [`TrackSelector`] | Multi-Bitrate (MBR): walks a [`Ladder`] of renditions one step at a time |
//! | [`LinearTrackStrategy`] | Loss and NACK based congestion, key frame based recovery |
//!
//! ## Utility
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SampleWindow`] | Rolling window with O(1) average, minimum and maximum |
//! | [`NetworkReport`] | Network statistics snapshot, deserializable from WebRTC stats |
//!
//! # Design
//!
//! Congestion algorithms are pluggable through the [`BitrateStrategy`] and
//! [`TrackStrategy`] traits. The controllers own their strategy and route every
//! bound, constraint and ladder rule around it, so a strategy only has to
//! answer one question per call.
//!
//! Configuration types implement `serde` traits with camelCase field names
//! and durations in milliseconds, matching the JSON usually exchanged with
//! signaling servers.

#![warn(rust_2018_idioms)]

mod error;
mod report;
mod sample_window;
mod serde_millis;

pub(crate) mod abr;
pub(crate) mod mbr;

pub use abr::{
    BitrateBounds, BitrateConfig, BitrateController, BitrateControllerBuilder, BitrateDecision,
    BitrateInput, BitrateStrategy, DEFAULT_MAXIMUM_BITRATE, DEFAULT_MINIMUM_BITRATE,
    DEFAULT_STARTUP_BITRATE, GradeConfig, GradeStrategy, LinearConfig, LinearStrategy,
    MediaSource, ResolutionAdapter, ResolutionConfig,
};
pub use error::{Error, Result};
pub use mbr::{
    DEFAULT_LEARNING_UP_STEP, DEFAULT_MAXIMUM_UP_DELAY, LinearTrackConfig, LinearTrackStrategy,
    MediaTracks, TrackSelector, TrackSelectorBuilder, TrackSelectorConfig, TrackStrategy,
    ladder::{Ladder, Step, Track},
};
pub use report::{MediaKind, NetworkReport};
pub use sample_window::SampleWindow;
