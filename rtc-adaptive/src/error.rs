use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("track {0} not found in ladder")]
    ErrTrackNotFound(u32),
    #[error("no statistics for track {0}")]
    ErrMissingStats(u32),
    #[error("duplicate track index {0} in ladder")]
    ErrDuplicateTrack(u32),
    #[error("media source has no resolution")]
    ErrResolutionUnavailable,
    #[error("media source rejected resolution: {0}")]
    ErrResolutionRejected(String),
}
