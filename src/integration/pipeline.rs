//! CountingPipeline: detector, tracker and counter run on one frame.

use image::RgbImage;
use tracing::warn;

use crate::counter::CountEvent;
use crate::error::DetectorError;
use crate::integration::{Detector, SnapshotWriter, annotate};
use crate::tracker::{ObjectTracker, Track, TrackerConfig};

/// Everything one processed frame produced.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    /// Annotated copy of the input frame for live preview
    pub annotated: RgbImage,
    /// Absolute counter after this frame
    pub absolute: u64,
    pub events: Vec<CountEvent>,
    pub tracks: Vec<Track>,
}

/// Bundles a [`Detector`] with an [`ObjectTracker`].
///
/// This struct provides the per-frame step of a capture point: run
/// detection, update tracks and the crossing counter, render the preview and
/// snapshot any object that left without being counted.
pub struct CountingPipeline {
    detector: Box<dyn Detector>,
    tracker: ObjectTracker,
    snapshots: Option<SnapshotWriter>,
}

impl CountingPipeline {
    /// Create a new pipeline with the given detector and tracker config.
    pub fn new(detector: Box<dyn Detector>, config: TrackerConfig) -> Self {
        Self {
            detector,
            tracker: ObjectTracker::new(config),
            snapshots: None,
        }
    }

    /// Save uncounted departures through `writer`.
    pub fn with_snapshots(mut self, writer: SnapshotWriter) -> Self {
        self.snapshots = Some(writer);
        self
    }

    /// Process a single frame.
    ///
    /// Empty frames and detector failures are returned; the tracker is left
    /// untouched for that frame. Snapshot failures are only logged.
    pub fn process_frame(&mut self, frame: &RgbImage) -> Result<FrameOutcome, DetectorError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectorError::InvalidFrame { width, height });
        }
        let detections = self.detector.infer(frame)?;
        let update = self.tracker.update(&detections, frame.width());

        if let Some(writer) = &self.snapshots {
            for track in &update.departed {
                if let Err(err) = writer.save(frame, track) {
                    warn!(track_id = track.track_id, error = %err, "snapshot not saved");
                }
            }
        }

        Ok(FrameOutcome {
            annotated: annotate::render(frame, &self.tracker, &update.tracks),
            absolute: update.absolute,
            events: update.events,
            tracks: update.tracks,
        })
    }

    /// Point uncounted snapshots at the directory of the running lot.
    pub fn set_lot(&mut self, lot: Option<&str>) {
        if let Some(writer) = self.snapshots.as_mut() {
            writer.set_lot(lot);
        }
    }

    pub fn absolute_count(&self) -> u64 {
        self.tracker.absolute_count()
    }

    /// Get a reference to the underlying tracker.
    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }

    /// Get a mutable reference to the underlying tracker.
    pub fn tracker_mut(&mut self) -> &mut ObjectTracker {
        &mut self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{Detection, Rect};

    struct MockDetector {
        frames: Vec<Vec<Detection>>,
    }

    impl Detector for MockDetector {
        fn infer(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            if self.frames.is_empty() {
                return Err(DetectorError::Inference("script exhausted".into()));
            }
            Ok(self.frames.remove(0))
        }
    }

    fn det_at(cy: f32) -> Detection {
        Detection::new(180.0, cy - 15.0, 220.0, cy + 15.0, 0.95)
    }

    #[test]
    fn test_counting_pipeline() {
        let detector = MockDetector {
            frames: vec![vec![det_at(220.0)], vec![det_at(150.0)], vec![det_at(95.0)]],
        };
        let config = TrackerConfig {
            region: Rect::new(0.0, 0.0, 400.0, 300.0),
            far_gate_offset: 0.0,
            near_gate_offset: -40.0,
            ..TrackerConfig::default()
        };
        let mut pipeline = CountingPipeline::new(Box::new(detector), config);
        let frame = RgbImage::new(400, 300);

        let mut last = None;
        for _ in 0..3 {
            last = Some(pipeline.process_frame(&frame).unwrap());
        }
        let outcome = last.unwrap();
        assert_eq!(outcome.absolute, 1);
        assert_eq!(outcome.tracks.len(), 1);
        assert_eq!(outcome.annotated.dimensions(), (400, 300));

        // Detector errors surface without touching the tracker.
        assert!(pipeline.process_frame(&frame).is_err());
        assert_eq!(pipeline.tracker().frame_id(), 3);
        assert_eq!(pipeline.absolute_count(), 1);
    }

    #[test]
    fn test_empty_frame_is_rejected_before_inference() {
        let detector = MockDetector {
            frames: vec![vec![det_at(220.0)]],
        };
        let mut pipeline = CountingPipeline::new(Box::new(detector), TrackerConfig::default());

        let err = pipeline.process_frame(&RgbImage::new(0, 300)).unwrap_err();
        assert!(matches!(err, DetectorError::InvalidFrame { width: 0, height: 300 }));
        assert_eq!(pipeline.tracker().frame_id(), 0);

        // The scripted detections were not consumed.
        let outcome = pipeline.process_frame(&RgbImage::new(400, 300)).unwrap();
        assert_eq!(outcome.tracks.len(), 1);
    }
}
