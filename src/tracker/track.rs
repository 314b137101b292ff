//! Single tracked object candidate.

use nalgebra::Point2;

use crate::counter::{FlowMode, ReferencePoint};
use crate::tracker::matching::Detection;
use crate::tracker::rect::Rect;
use crate::tracker::track_state::{CountedState, CrossingState};

/// One object candidate followed across frames.
#[derive(Debug, Clone)]
pub struct Track {
    /// Unique track identifier, increasing per tracker
    pub track_id: u64,
    /// Latest matched bounding box
    pub bbox: Rect,
    /// Confidence of the latest matched detection
    pub score: f32,
    pub class_id: u32,
    /// Reference point used for gate comparisons this frame
    pub reference: Point2<f32>,
    /// Reference point at the previous evaluation
    pub prev_reference: Point2<f32>,
    /// Consecutive frames without a matching detection
    pub lost_frames: u32,
    pub crossing: CrossingState,
    pub counted: CountedState,
    /// Total frames this track was matched, including its first
    pub hits: u32,
    /// Whether the track matched a detection in the latest frame
    pub matched: bool,
}

impl Track {
    pub(crate) fn new(track_id: u64, det: &Detection, point: ReferencePoint, flow: FlowMode) -> Self {
        let reference = point.locate(&det.bbox, flow);
        Self {
            track_id,
            bbox: det.bbox,
            score: det.score,
            class_id: det.class_id,
            reference,
            prev_reference: reference,
            lost_frames: 0,
            crossing: CrossingState::Neutral,
            counted: CountedState::NotCounted,
            hits: 1,
            matched: true,
        }
    }

    /// Box centre, used for association.
    #[inline]
    pub fn center(&self) -> Point2<f32> {
        self.bbox.center()
    }

    pub(crate) fn update(&mut self, det: &Detection, point: ReferencePoint, flow: FlowMode) {
        self.prev_reference = self.reference;
        self.reference = point.locate(&det.bbox, flow);
        self.bbox = det.bbox;
        self.score = det.score;
        self.class_id = det.class_id;
        self.lost_frames = 0;
        self.hits += 1;
        self.matched = true;
    }

    pub(crate) fn mark_missed(&mut self) {
        self.lost_frames += 1;
        self.matched = false;
    }

    /// Settle the previous reference so a later miss cannot replay this move.
    pub(crate) fn settle(&mut self) {
        self.prev_reference = self.reference;
    }

    pub fn is_counted(&self) -> bool {
        self.counted == CountedState::Counted
    }
}
