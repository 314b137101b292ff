//! Error types shared across the tracker, integration and session layers.

use thiserror::Error;

use crate::session::SessionId;

/// Configuration could not be loaded or failed validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid region {0:?}: expected \"x,y,width,height\"")]
    Region(String),

    #[error("invalid config for line {line_id}: {reason}")]
    Invalid { line_id: u32, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid<S: Into<String>>(line_id: u32, reason: S) -> Self {
        Self::Invalid {
            line_id,
            reason: reason.into(),
        }
    }
}

/// Failure reported by a [`Detector`](crate::integration::Detector).
#[derive(Error, Debug, Clone)]
pub enum DetectorError {
    #[error("frame has invalid dimensions {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },

    #[error("inference failed: {0}")]
    Inference(String),
}

/// A frame source or detector could not be opened by the capture backend.
#[derive(Error, Debug, Clone)]
pub enum OpenError {
    #[error("cannot open frame source {source_ref:?}: {reason}")]
    Source { source_ref: String, reason: String },

    #[error("cannot load model {model:?}: {reason}")]
    Model { model: String, reason: String },
}

/// Failure of the external session store.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("session {0} is no longer operating")]
    Closed(SessionId),
}

/// A session's delta log breaks the running-total chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("entry {index} belongs to session {found}, expected {expected}")]
    MixedSession {
        index: usize,
        expected: SessionId,
        found: SessionId,
    },

    #[error("entry {index} carries running total {found}, expected {expected}")]
    Gap { index: usize, expected: u64, found: u64 },

    #[error("entry {index} decrements below zero")]
    BelowZero { index: usize },

    #[error("entry {index} is older than its predecessor")]
    OutOfOrder { index: usize },
}

/// Uncounted-object snapshot could not be written.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("track {track_id} box lies outside the frame")]
    EmptyCrop { track_id: u64 },
}

/// Failure confined to one iteration of the capture loop.
///
/// The loop logs these and backs off; none of them ends the loop.
#[derive(Error, Debug)]
pub enum IterationError {
    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error("frame processing panicked: {0}")]
    Panicked(String),
}

/// Error surfaced to the command layer by capture point operations.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to spawn capture worker: {0}")]
    Spawn(std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unknown line {0}")]
    UnknownLine(u32),

    #[error("line {0}: previous capture worker has not exited yet")]
    WorkerBusy(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ConfigError::invalid(3, "match radius must be positive");
        assert_eq!(
            err.to_string(),
            "invalid config for line 3: match radius must be positive"
        );

        let err: IterationError = DetectorError::Inference("cuda oom".into()).into();
        assert_eq!(err.to_string(), "inference failed: cuda oom");

        let err: CaptureError = StoreError::NotFound(7).into();
        assert_eq!(err.to_string(), "session 7 not found");

        let err = CaptureError::WorkerBusy(2);
        assert_eq!(err.to_string(), "line 2: previous capture worker has not exited yet");
    }
}
