//! Dual-gate object counting on a video feed.
//!
//! Detections from an external [`Detector`] are associated into tracks by
//! nearest-neighbour matching ([`ObjectTracker`]); a [`CrossingCounter`]
//! counts tracks whose reference point crosses two gate lines in the flow
//! direction. A [`CapturePoint`] runs this on a worker thread per line and
//! records every change of a session's total as a ±1 delta log entry in a
//! [`SessionStore`].

pub mod config;
pub mod counter;
pub mod error;
pub mod integration;
pub mod session;
pub mod tracker;

mod sync;

pub use config::{CapturePointConfig, FleetConfig, LoopTiming, RegionConfig};
pub use counter::{CountEvent, CountEventKind, CrossingCounter, FlowMode, ReferencePoint};
pub use error::{AuditError, CaptureError, ConfigError, DetectorError, OpenError, StoreError};
pub use integration::{CaptureBackend, CountingPipeline, Detector, FrameSource};
pub use session::{
    CapturePoint, Delta, LineRegistry, LineStatus, LogEntry, MemorySessionStore, SessionStatus, SessionStore,
    StartOutcome, StopOutcome, audit_log,
};
pub use tracker::{Detection, ObjectTracker, Rect, Track, TrackerConfig};
