//! Dual-gate crossing counter.
//!
//! Two horizontal gate lines split the counting region. A track is counted
//! when its reference point crosses the entry gate and then the exit gate
//! in the flow direction, and un-counted when it crosses them in the
//! opposite order against the flow. A reset margin around each gate keeps
//! detector jitter from arming and disarming tracks.

mod crossing;
mod gates;

pub use crossing::{CountEvent, CountEventKind, CrossingCounter};
pub use gates::{Direction, FlowMode, GateLayout, GatePlan, ReferencePoint};
