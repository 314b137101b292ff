use nalgebra::Point2;

/// Axis-aligned box used for detections, tracks and the counting region.
///
/// Supports two formats:
/// - TLWH: Top-Left X, Top-Left Y, Width, Height
/// - TLBR: Top-Left X, Top-Left Y, Bottom-Right X, Bottom-Right Y
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    /// Top-left x coordinate
    pub x: f32,
    /// Top-left y coordinate
    pub y: f32,
    /// Width of the bounding box
    pub width: f32,
    /// Height of the bounding box
    pub height: f32,
}

impl Rect {
    /// Create a new Rect from top-left coordinates and dimensions (TLWH format).
    #[inline]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a Rect from TLBR format (top-left x, top-left y, bottom-right x, bottom-right y).
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    /// Convert to TLBR format: (x1, y1, x2, y2).
    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [self.x, self.y, self.right(), self.bottom()]
    }

    /// Convert to TLWH format: (x, y, width, height).
    #[inline]
    pub fn to_tlwh(&self) -> [f32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    #[inline]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Get the center point of the bounding box.
    #[inline]
    pub fn center(&self) -> Point2<f32> {
        Point2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Get the area of the bounding box.
    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// A region with no area disables region filtering and gate counting.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    /// Inclusive containment test, edges count as inside.
    #[inline]
    pub fn contains(&self, point: &Point2<f32>) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    /// Clamp to a `width` x `height` pixel grid, returning integer TLBR bounds.
    ///
    /// Returns `None` when nothing of the box remains inside the grid.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let clamp = |v: f32, max: u32| v.max(0.0).min(max as f32) as u32;
        let [x1, y1, x2, y2] = self.to_tlbr();
        let (x1, x2) = (clamp(x1, width), clamp(x2, width));
        let (y1, y2) = (clamp(y1, height), clamp(y2, height));
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2, y2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_conversions() {
        let rect = Rect::new(10.0, 20.0, 30.0, 40.0);

        assert_eq!(rect.to_tlwh(), [10.0, 20.0, 30.0, 40.0]);
        assert_eq!(rect.to_tlbr(), [10.0, 20.0, 40.0, 60.0]);

        let center = rect.center();
        assert_eq!(center.x, 25.0);
        assert_eq!(center.y, 40.0);
    }

    #[test]
    fn test_from_tlbr() {
        let rect = Rect::from_tlbr(10.0, 20.0, 40.0, 60.0);
        assert_eq!(rect.to_tlwh(), [10.0, 20.0, 30.0, 40.0]);
        assert_eq!(rect.area(), 1200.0);
    }

    #[test]
    fn test_contains_is_inclusive() {
        let region = Rect::new(0.0, 0.0, 100.0, 50.0);
        assert!(region.contains(&Point2::new(0.0, 0.0)));
        assert!(region.contains(&Point2::new(100.0, 50.0)));
        assert!(!region.contains(&Point2::new(100.5, 10.0)));
        assert!(!region.contains(&Point2::new(10.0, -0.1)));
    }

    #[test]
    fn test_inactive_region() {
        assert!(!Rect::default().is_active());
        assert!(!Rect::new(5.0, 5.0, 0.0, 30.0).is_active());
        assert!(Rect::new(5.0, 5.0, 1.0, 1.0).is_active());
    }

    #[test]
    fn test_clamp_to() {
        let rect = Rect::from_tlbr(-10.0, 5.0, 30.0, 500.0);
        assert_eq!(rect.clamp_to(20, 100), Some((0, 5, 20, 100)));

        let outside = Rect::from_tlbr(50.0, 50.0, 60.0, 60.0);
        assert_eq!(outside.clamp_to(20, 20), None);
    }
}
