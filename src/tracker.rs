mod matching;
mod object_tracker;
mod rect;
mod track;
mod track_state;

pub use matching::{AssignmentResult, Detection, center_distance, greedy_assignment};
pub use object_tracker::{ObjectTracker, TrackerConfig, TrackerUpdate};
pub use rect::Rect;
pub use track::Track;
pub use track_state::{CountedState, CrossingState};
