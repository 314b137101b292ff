//! Factory for the external collaborators a capture point opens lazily.

use crate::error::OpenError;
use crate::integration::{Detector, FrameSource};

/// Opens frame sources and detectors by reference.
///
/// A capture point calls this when its worker is cold (first start, or after
/// a stop released everything) and when its source is switched.
pub trait CaptureBackend: Send + Sync {
    /// Open a frame source, e.g. an RTSP url or a recorded file path.
    fn open_source(&self, source_ref: &str) -> Result<Box<dyn FrameSource>, OpenError>;

    /// Load a detection model.
    fn open_detector(&self, model: &str) -> Result<Box<dyn Detector>, OpenError>;
}
