//! Gate geometry: where the two lines sit and how crossings are detected.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::tracker::Rect;

/// Vertical movement direction in image coordinates (y grows downwards).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    /// True when moving from `prev` to `curr` crosses `line` in this direction.
    ///
    /// Landing exactly on the line counts as crossed; starting on it does not.
    #[inline]
    pub fn crossed(self, prev: f32, curr: f32, line: f32) -> bool {
        match self {
            Self::Up => prev > line && line >= curr,
            Self::Down => prev < line && line <= curr,
        }
    }

    /// True when a point that passed `line` in this direction moved back
    /// beyond it by at least `margin`.
    #[inline]
    pub fn retreated(self, prev: f32, curr: f32, line: f32, margin: f32) -> bool {
        match self {
            Self::Up => prev < line && curr >= line + margin,
            Self::Down => prev > line && curr <= line - margin,
        }
    }
}

/// Direction in which counted objects travel through the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowMode {
    #[default]
    Up,
    Down,
    /// Gates are ignored; every track is counted once.
    None,
}

impl FlowMode {
    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::Up => Some(Direction::Up),
            Self::Down => Some(Direction::Down),
            Self::None => None,
        }
    }
}

/// Which point of the bounding box is compared against the gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePoint {
    /// Edge that reaches a gate first when moving with the flow
    Leading,
    #[default]
    Center,
    /// Edge that reaches a gate last when moving with the flow
    Trailing,
}

impl ReferencePoint {
    pub fn locate(self, bbox: &Rect, flow: FlowMode) -> Point2<f32> {
        let center = bbox.center();
        let edge = match (self, flow.direction()) {
            (Self::Center, _) | (_, None) => return center,
            (Self::Leading, Some(Direction::Up)) | (Self::Trailing, Some(Direction::Down)) => bbox.y,
            (Self::Leading, Some(Direction::Down)) | (Self::Trailing, Some(Direction::Up)) => {
                bbox.bottom()
            }
        };
        Point2::new(center.x, edge)
    }
}

/// Absolute y positions of the two gate lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateLayout {
    /// Upper line, a third of the way down the region plus its offset
    pub far: f32,
    /// Lower line, two thirds of the way down the region plus its offset
    pub near: f32,
}

impl GateLayout {
    /// Returns `None` for an inactive region.
    pub fn new(region: &Rect, far_offset: f32, near_offset: f32) -> Option<Self> {
        if !region.is_active() {
            return None;
        }
        let third = (region.height / 3.0).floor();
        let two_thirds = (2.0 * region.height / 3.0).floor();
        Some(Self {
            far: region.y + third + far_offset,
            near: region.y + two_thirds + near_offset,
        })
    }

    pub fn plan(&self, flow: FlowMode) -> Option<GatePlan> {
        match flow.direction()? {
            Direction::Up => Some(GatePlan {
                entry: self.near,
                exit: self.far,
                flow: Direction::Up,
            }),
            Direction::Down => Some(GatePlan {
                entry: self.far,
                exit: self.near,
                flow: Direction::Down,
            }),
        }
    }
}

/// Gate roles resolved for one flow direction.
///
/// Objects moving with the flow cross `entry` first and `exit` second; a
/// reversal crosses them in the opposite order against the flow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatePlan {
    pub entry: f32,
    pub exit: f32,
    pub flow: Direction,
}
