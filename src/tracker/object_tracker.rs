//! Nearest-neighbour multi-object tracker with gate counting.

use std::collections::BTreeMap;

use nalgebra::Point2;
use tracing::debug;

use crate::counter::{CountEvent, CrossingCounter, FlowMode, GateLayout, ReferencePoint};
use crate::tracker::matching::{self, AssignmentResult, Detection};
use crate::tracker::rect::Rect;
use crate::tracker::track::Track;
use crate::tracker::track_state::CountedState;

/// Configuration for the ObjectTracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Counting region; an inactive (empty) region disables region filtering
    pub region: Rect,
    /// Maximum centre distance, exclusive, for a detection to continue a track
    pub match_radius: f32,
    /// Frames a track may go unmatched before it is dropped
    pub max_lost_frames: u32,
    pub min_confidence: f32,
    /// Accepted class ids; empty accepts every class
    pub target_classes: Vec<u32>,
    pub reference_point: ReferencePoint,
    pub flow: FlowMode,
    pub far_gate_offset: f32,
    pub near_gate_offset: f32,
    pub reset_margin: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            region: Rect::default(),
            match_radius: 150.0,
            max_lost_frames: 2,
            min_confidence: 0.8,
            target_classes: vec![0],
            reference_point: ReferencePoint::Center,
            flow: FlowMode::Up,
            far_gate_offset: 40.0,
            near_gate_offset: -40.0,
            reset_margin: 20.0,
        }
    }
}

/// Result of one [`ObjectTracker::update`].
#[derive(Debug, Clone, Default)]
pub struct TrackerUpdate {
    /// Tracks alive after this frame, by ascending id
    pub tracks: Vec<Track>,
    /// Absolute counter after this frame
    pub absolute: u64,
    /// Crossing events raised this frame
    pub events: Vec<CountEvent>,
    /// Tracks destroyed this frame without ever being counted
    pub departed: Vec<Track>,
}

pub struct ObjectTracker {
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
    frame_id: u64,
    config: TrackerConfig,
    counter: CrossingCounter,
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let counter = CrossingCounter::new(
            &config.region,
            config.flow,
            config.far_gate_offset,
            config.near_gate_offset,
            config.reset_margin,
        );
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            frame_id: 0,
            config,
            counter,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn absolute_count(&self) -> u64 {
        self.counter.absolute()
    }

    pub fn gates(&self) -> Option<GateLayout> {
        self.counter.gates()
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// Whether a raw detection passes the confidence, class and region filters.
    ///
    /// A detection touches the region when its centre or its reference point
    /// lies inside. Such a detection may continue a track, but only one whose
    /// reference point is inside may start one (see [`Self::may_spawn`]).
    pub fn admits(&self, det: &Detection) -> bool {
        if det.score < self.config.min_confidence {
            return false;
        }
        if !self.config.target_classes.is_empty() && !self.config.target_classes.contains(&det.class_id) {
            return false;
        }
        self.in_region(&det.center()) || self.in_region(&self.reference_of(det))
    }

    /// Whether an unmatched detection may start a new track.
    ///
    /// Tracks retire once their reference point is outside the region, so a
    /// track must not start there.
    pub fn may_spawn(&self, det: &Detection) -> bool {
        self.in_region(&self.reference_of(det))
    }

    fn reference_of(&self, det: &Detection) -> Point2<f32> {
        self.config.reference_point.locate(&det.bbox, self.config.flow)
    }

    fn in_region(&self, point: &Point2<f32>) -> bool {
        !self.config.region.is_active() || self.config.region.contains(point)
    }

    /// Advance one frame.
    ///
    /// `frame_width` only matters when the region is inactive and counting
    /// falls back to the frame's vertical mid-line.
    pub fn update(&mut self, detections: &[Detection], frame_width: u32) -> TrackerUpdate {
        self.frame_id += 1;

        // Step 1: Filter detections
        let detections: Vec<&Detection> = detections.iter().filter(|d| self.admits(d)).collect();

        // Step 2: Associate by nearest centre, rows ordered by track id
        let track_ids: Vec<u64> = self.tracks.keys().copied().collect();
        let track_centers: Vec<Point2<f32>> = self.tracks.values().map(Track::center).collect();
        let det_centers: Vec<Point2<f32>> = detections.iter().map(|d| d.center()).collect();
        let dists = matching::center_distance(&track_centers, &det_centers);

        let AssignmentResult {
            matches,
            unmatched_tracks,
            unmatched_detections,
        } = matching::greedy_assignment(&dists, self.config.match_radius);

        let (point, flow) = (self.config.reference_point, self.config.flow);
        for (row, col) in matches {
            if let Some(track) = self.tracks.get_mut(&track_ids[row]) {
                track.update(detections[col], point, flow);
            }
        }
        for row in unmatched_tracks {
            if let Some(track) = self.tracks.get_mut(&track_ids[row]) {
                track.mark_missed();
            }
        }

        // Step 3: Spawn tracks for what is left, in detection order
        for col in unmatched_detections {
            if !self.may_spawn(detections[col]) {
                continue;
            }
            let track_id = self.next_id;
            self.next_id += 1;
            debug!(track_id, frame_id = self.frame_id, "new track");
            self.tracks
                .insert(track_id, Track::new(track_id, detections[col], point, flow));
        }

        // Step 4: Retire tracks, then count the survivors
        let region = self.config.region;
        let mut events = Vec::new();
        let mut departed = Vec::new();
        let mut removed = Vec::new();

        for (&track_id, track) in self.tracks.iter_mut() {
            let left_region = region.is_active() && !region.contains(&track.reference);
            if left_region || track.lost_frames > self.config.max_lost_frames {
                debug!(track_id, left_region, lost_frames = track.lost_frames, "track dropped");
                removed.push(track_id);
                continue;
            }
            self.counter.observe(track, frame_width, &mut events);
            track.settle();
        }

        for track_id in removed {
            if let Some(track) = self.tracks.remove(&track_id) {
                if track.counted == CountedState::NotCounted {
                    departed.push(track);
                }
            }
        }

        TrackerUpdate {
            tracks: self.tracks.values().cloned().collect(),
            absolute: self.counter.absolute(),
            events,
            departed,
        }
    }
}
