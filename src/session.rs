//! Work sessions: the capture point state machine, the delta log it writes
//! and the storage contract behind it.

mod capture_point;
mod delta_log;
mod registry;
mod store;

pub use capture_point::{CapturePoint, LineState, LineStatus, SessionInfo, StartOutcome, StopOutcome};
pub use delta_log::{DeltaLedger, audit_log};
pub use registry::LineRegistry;
pub use store::{Delta, LineId, LogEntry, MemorySessionStore, Session, SessionId, SessionStatus, SessionStore};
