//! Quality ladder of renditions.

use crate::error::{Error, Result};
use crate::report::MediaKind;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// One pre-encoded rendition of a media source.
///
/// `up` and `down` are the indexes of the next higher and lower
/// `max_bitrate` renditions of the same kind, maintained by [`Ladder`].
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Track {
    pub index: u32,
    pub kind: MediaKind,
    pub codec: String,
    /// Nominal bitrate, in bits per second.
    pub bitrate: u64,
    /// Maximum observed bitrate, in bits per second.
    pub max_bitrate: u64,
    #[serde(skip)]
    up: Option<u32>,
    #[serde(skip)]
    down: Option<u32>,
}

impl Track {
    pub fn new(index: u32, kind: MediaKind, codec: &str, max_bitrate: u64) -> Self {
        Self {
            index,
            kind,
            codec: codec.to_owned(),
            bitrate: max_bitrate,
            max_bitrate,
            up: None,
            down: None,
        }
    }

    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Index of the next higher rendition.
    pub fn up(&self) -> Option<u32> {
        self.up
    }

    /// Index of the next lower rendition.
    pub fn down(&self) -> Option<u32> {
        self.down
    }
}

/// Ladder direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    Up,
    Down,
}

/// Renditions sorted by descending maximum bitrate and linked per kind.
///
/// Tracks live in an arena addressed by their index. Neighbors are stored as
/// indexes, so filtering a ladder only has to relink the kept tracks.
///
/// # Example
///
/// ```
/// use rtc_adaptive::{Ladder, MediaKind, Track};
///
/// let ladder = Ladder::new(vec![
///     Track::new(1, MediaKind::Video, "H264", 1_000_000),
///     Track::new(2, MediaKind::Video, "H264", 3_000_000),
///     Track::new(3, MediaKind::Video, "H264", 2_000_000),
/// ])
/// .unwrap();
///
/// assert_eq!(ladder.up(3).map(|t| t.index), Some(2));
/// assert_eq!(ladder.down(3).map(|t| t.index), Some(1));
///
/// let ladder = ladder.filter(|track| track.index != 3);
/// assert_eq!(ladder.down(2).map(|t| t.index), Some(1));
/// ```
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Ladder {
    tracks: Vec<Track>,
    positions: HashMap<u32, usize>,
}

impl Ladder {
    /// Build a ladder, sorting and linking `tracks`.
    ///
    /// Fails with [`Error::ErrDuplicateTrack`] if two tracks share an index.
    pub fn new(mut tracks: Vec<Track>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(tracks.len());
        for track in &tracks {
            if !seen.insert(track.index) {
                return Err(Error::ErrDuplicateTrack(track.index));
            }
        }

        tracks.sort_by(compare);
        let mut ladder = Self {
            tracks,
            positions: HashMap::new(),
        };
        ladder.link();
        Ok(ladder)
    }

    fn link(&mut self) {
        self.positions = self
            .tracks
            .iter()
            .enumerate()
            .map(|(position, track)| (track.index, position))
            .collect();

        let mut previous: HashMap<MediaKind, usize> = HashMap::new();
        for position in 0..self.tracks.len() {
            let kind = self.tracks[position].kind;
            let index = self.tracks[position].index;
            let up = previous.insert(kind, position).map(|higher| {
                self.tracks[higher].down = Some(index);
                self.tracks[higher].index
            });
            self.tracks[position].up = up;
            self.tracks[position].down = None;
        }
    }

    /// New ladder holding the tracks matching `predicate`, relinked so that
    /// neighbors skip the removed ones.
    pub fn filter<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(&Track) -> bool,
    {
        let mut ladder = Self {
            tracks: self
                .tracks
                .iter()
                .filter(|&track| predicate(track))
                .cloned()
                .collect(),
            positions: HashMap::new(),
        };
        ladder.link();
        ladder
    }

    /// New ladder keeping audio and video tracks of the given codecs only.
    ///
    /// Codecs compare case-insensitively; data tracks are always kept.
    pub fn retain_codecs(&self, codecs: &[&str]) -> Self {
        self.filter(|track| {
            !matches!(track.kind, MediaKind::Audio | MediaKind::Video)
                || codecs.iter().any(|c| c.eq_ignore_ascii_case(&track.codec))
        })
    }

    pub fn get(&self, index: u32) -> Option<&Track> {
        self.positions.get(&index).map(|&p| &self.tracks[p])
    }

    pub fn up(&self, index: u32) -> Option<&Track> {
        self.get(index)?.up.and_then(|up| self.get(up))
    }

    pub fn down(&self, index: u32) -> Option<&Track> {
        self.get(index)?.down.and_then(|down| self.get(down))
    }

    /// Neighbor of `index` in the given direction.
    pub fn step(&self, index: u32, step: Step) -> Option<&Track> {
        match step {
            Step::Up => self.up(index),
            Step::Down => self.down(index),
        }
    }

    /// Tracks by descending maximum bitrate.
    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn iter_kind(&self, kind: MediaKind) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(move |track| track.kind == kind)
    }

    /// Highest rendition of `kind`.
    pub fn top(&self, kind: MediaKind) -> Option<&Track> {
        self.iter_kind(kind).next()
    }

    /// Lowest rendition of `kind`.
    pub fn bottom(&self, kind: MediaKind) -> Option<&Track> {
        self.iter_kind(kind).last()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

fn compare(a: &Track, b: &Track) -> Ordering {
    b.max_bitrate
        .cmp(&a.max_bitrate)
        .then(b.bitrate.cmp(&a.bitrate))
        .then(a.index.cmp(&b.index))
}
