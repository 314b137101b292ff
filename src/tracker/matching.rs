//! Detection input and nearest-neighbour association.

use nalgebra::{Point2, distance};
use ndarray::Array2;

use crate::tracker::rect::Rect;

/// Detection input for the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Bounding box
    pub bbox: Rect,
    /// Detection confidence score
    pub score: f32,
    /// Model class index
    pub class_id: u32,
}

impl Detection {
    /// Create a class-0 detection from TLBR coordinates.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
        Self {
            bbox: Rect::from_tlbr(x1, y1, x2, y2),
            score,
            class_id: 0,
        }
    }

    pub fn from_rect(bbox: Rect, score: f32, class_id: u32) -> Self {
        Self {
            bbox,
            score,
            class_id,
        }
    }

    pub fn with_class(mut self, class_id: u32) -> Self {
        self.class_id = class_id;
        self
    }

    #[inline]
    pub fn center(&self) -> Point2<f32> {
        self.bbox.center()
    }
}

/// Compute Euclidean distance matrix between track and detection centres.
pub fn center_distance(track_centers: &[Point2<f32>], det_centers: &[Point2<f32>]) -> Array2<f32> {
    let mut dists = Array2::zeros((track_centers.len(), det_centers.len()));
    for (i, t) in track_centers.iter().enumerate() {
        for (j, d) in det_centers.iter().enumerate() {
            dists[[i, j]] = distance(t, d);
        }
    }
    dists
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentResult {
    /// (track row, detection column) pairs
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Greedy nearest-neighbour assignment.
///
/// Candidate pairs strictly closer than `radius` are taken in ascending
/// distance; a pair is kept only if neither its track nor its detection is
/// already taken. Equal distances go to the lower row (rows are ordered by
/// track id), then to the lower column.
pub fn greedy_assignment(dists: &Array2<f32>, radius: f32) -> AssignmentResult {
    let (num_rows, num_cols) = dists.dim();

    let mut candidates: Vec<(f32, usize, usize)> = dists
        .indexed_iter()
        .filter(|&(_, &d)| d < radius)
        .map(|((i, j), &d)| (d, i, j))
        .collect();
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut row_taken = vec![false; num_rows];
    let mut col_taken = vec![false; num_cols];
    let mut matches = Vec::new();

    for (_, row, col) in candidates {
        if row_taken[row] || col_taken[col] {
            continue;
        }
        row_taken[row] = true;
        col_taken[col] = true;
        matches.push((row, col));
    }

    let unmatched_tracks = (0..num_rows).filter(|&i| !row_taken[i]).collect();
    let unmatched_detections = (0..num_cols).filter(|&j| !col_taken[j]).collect();

    AssignmentResult {
        matches,
        unmatched_tracks,
        unmatched_detections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f32, y: f32) -> Point2<f32> {
        Point2::new(x, y)
    }

    #[test]
    fn test_center_distance() {
        let dists = center_distance(&[p(0.0, 0.0)], &[p(3.0, 4.0), p(0.0, 10.0)]);
        assert_eq!(dists.dim(), (1, 2));
        assert!((dists[[0, 0]] - 5.0).abs() < 1e-6);
        assert!((dists[[0, 1]] - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_nearer_detection_wins_shared_track() {
        // One track within radius of two detections 5px apart.
        let dists = center_distance(&[p(100.0, 100.0)], &[p(100.0, 130.0), p(100.0, 125.0)]);
        let result = greedy_assignment(&dists, 150.0);
        assert_eq!(result.matches, vec![(0, 1)]);
        assert!(result.unmatched_tracks.is_empty());
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_equidistant_tracks_resolve_to_lowest_row() {
        let dists = center_distance(&[p(0.0, 0.0), p(20.0, 0.0)], &[p(10.0, 0.0)]);
        let result = greedy_assignment(&dists, 150.0);
        assert_eq!(result.matches, vec![(0, 0)]);
        assert_eq!(result.unmatched_tracks, vec![1]);
    }

    #[test]
    fn test_radius_is_exclusive() {
        let dists = center_distance(&[p(0.0, 0.0)], &[p(150.0, 0.0)]);
        let result = greedy_assignment(&dists, 150.0);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_tracks, vec![0]);
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_empty_inputs() {
        let result = greedy_assignment(&center_distance(&[], &[p(1.0, 1.0)]), 10.0);
        assert_eq!(result.unmatched_detections, vec![0]);

        let result = greedy_assignment(&center_distance(&[p(1.0, 1.0)], &[]), 10.0);
        assert_eq!(result.unmatched_tracks, vec![0]);
    }
}
