//! Integration module for connecting frame sources and detection backends
//! with the tracker.
//!
//! This module provides the traits a deployment implements (frame
//! acquisition, inference, backend factory) and the per-frame
//! [`CountingPipeline`] that a capture point drives.

pub mod annotate;
mod backend;
mod builder;
mod detector;
mod frame_source;
mod pipeline;
mod snapshot;

pub use backend::CaptureBackend;
pub use builder::DetectionBuilder;
pub use detector::{Detector, IntoDetections};
pub use frame_source::{FrameGrabber, FrameSource, LatestFrame, ThreadedSource};
pub use pipeline::{CountingPipeline, FrameOutcome};
pub use snapshot::{SnapshotWriter, sanitize_lot};
