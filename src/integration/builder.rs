//! Builder turning raw detector output into frame-space detections.

use crate::tracker::{Detection, Rect};

/// Builds a [`Detection`] from one model prediction.
///
/// Models usually predict in their own input resolution; [`Self::rescale`]
/// maps the box back onto the camera frame and [`Self::clip`] trims it to
/// the frame bounds before it reaches the tracker.
#[derive(Debug, Clone, Default)]
pub struct DetectionBuilder {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    class_id: u32,
}

impl DetectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a YOLO row `[x1, y1, x2, y2, confidence, class]`.
    ///
    /// Negative or fractional class values are floored at zero.
    pub fn from_row(row: [f32; 6]) -> Self {
        let [x1, y1, x2, y2, score, class] = row;
        Self::new().tlbr(x1, y1, x2, y2).score(score).class_id(class.max(0.0) as u32)
    }

    /// Corners, in any order.
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.x1 = x1.min(x2);
        self.y1 = y1.min(y2);
        self.x2 = x1.max(x2);
        self.y2 = y1.max(y2);
        self
    }

    /// Centre and size, the layout of raw YOLO heads.
    pub fn xywh(self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        let (hw, hh) = (w.abs() / 2.0, h.abs() / 2.0);
        self.tlbr(cx - hw, cy - hh, cx + hw, cy + hh)
    }

    /// Map a box predicted at `input` resolution onto a `frame` sized image.
    pub fn rescale(mut self, input: (u32, u32), frame: (u32, u32)) -> Self {
        if input.0 == 0 || input.1 == 0 {
            return self;
        }
        let sx = frame.0 as f32 / input.0 as f32;
        let sy = frame.1 as f32 / input.1 as f32;
        self.x1 *= sx;
        self.x2 *= sx;
        self.y1 *= sy;
        self.y2 *= sy;
        self
    }

    /// Trim the box to a `width` x `height` frame.
    pub fn clip(mut self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        self.x1 = self.x1.clamp(0.0, w);
        self.x2 = self.x2.clamp(0.0, w);
        self.y1 = self.y1.clamp(0.0, h);
        self.y2 = self.y2.clamp(0.0, h);
        self
    }

    /// Confidence, clamped to `[0, 1]`. NaN reads as zero.
    pub fn score(mut self, score: f32) -> Self {
        self.score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        self
    }

    pub fn class_id(mut self, class_id: u32) -> Self {
        self.class_id = class_id;
        self
    }

    pub fn build(self) -> Detection {
        Detection::from_rect(Rect::from_tlbr(self.x1, self.y1, self.x2, self.y2), self.score, self.class_id)
    }
}
