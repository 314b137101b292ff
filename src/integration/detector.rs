//! Trait for object detection inference backends.

use image::RgbImage;

use crate::error::DetectorError;
use crate::integration::DetectionBuilder;
use crate::tracker::Detection;

/// Trait for object detection inference backends.
///
/// Implement this trait to connect any detection model to the counter.
/// Detections are returned unfiltered; confidence, class and region
/// filtering happen in the tracker.
///
/// # Example
///
/// ```ignore
/// use gatecount_rs::integration::Detector;
/// use gatecount_rs::{Detection, DetectorError};
///
/// struct MyDetector {
///     // Your model here
/// }
///
/// impl Detector for MyDetector {
///     fn infer(&mut self, frame: &image::RgbImage) -> Result<Vec<Detection>, DetectorError> {
///         // Run inference and return detections
///         Ok(vec![])
///     }
/// }
/// ```
pub trait Detector: Send {
    /// Run inference on one frame.
    fn infer(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

/// Helper trait for converting model-specific outputs to `Detection`.
pub trait IntoDetections {
    /// Convert the output into a vector of detections.
    fn into_detections(self) -> Vec<Detection>;
}

impl IntoDetections for Vec<Detection> {
    fn into_detections(self) -> Vec<Detection> {
        self
    }
}

/// Rows of `[x1, y1, x2, y2, confidence, class]`, the usual YOLO prediction layout.
impl IntoDetections for Vec<[f32; 6]> {
    fn into_detections(self) -> Vec<Detection> {
        self.into_iter().map(|row| DetectionBuilder::from_row(row).build()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_rows_into_detections() {
        let rows = vec![[10.0, 20.0, 50.0, 80.0, 0.91, 0.0], [0.0, 0.0, 4.0, 4.0, 0.3, 2.0]];
        let dets = rows.into_detections();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].bbox.to_tlwh(), [10.0, 20.0, 40.0, 60.0]);
        assert_eq!(dets[1].class_id, 2);
    }
}
