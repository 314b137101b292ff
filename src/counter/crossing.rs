//! Per-track crossing state machine and the absolute counter it drives.

use tracing::{debug, info};

use crate::counter::gates::{FlowMode, GateLayout, GatePlan};
use crate::tracker::{CountedState, CrossingState, Rect, Track};

/// What happened to a track in one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountEventKind {
    ArmedForward,
    ArmedReverse,
    /// Absolute counter went up by one
    Increment,
    /// Absolute counter went down by one
    Decrement,
    /// A reversal completed while the counter was already zero
    Floor,
    /// An armed track retreated past its gate by the reset margin
    Disarmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountEvent {
    pub track_id: u64,
    pub kind: CountEventKind,
    /// Absolute counter after the event
    pub absolute: u64,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Gated(GatePlan),
    /// Flow disabled: every track counts once
    Unconditional,
    /// No active region: count at the vertical mid-line of the frame
    MidLine,
}

/// Counts tracks through the configured gates.
#[derive(Debug, Clone)]
pub struct CrossingCounter {
    mode: Mode,
    gates: Option<GateLayout>,
    reset_margin: f32,
    absolute: u64,
}

impl CrossingCounter {
    pub fn new(region: &Rect, flow: FlowMode, far_offset: f32, near_offset: f32, reset_margin: f32) -> Self {
        let gates = GateLayout::new(region, far_offset, near_offset);
        let mode = match (flow, gates.and_then(|g| g.plan(flow))) {
            (FlowMode::None, _) => Mode::Unconditional,
            (_, Some(plan)) => Mode::Gated(plan),
            (_, None) => Mode::MidLine,
        };
        Self {
            mode,
            gates,
            reset_margin,
            absolute: 0,
        }
    }

    pub fn absolute(&self) -> u64 {
        self.absolute
    }

    pub fn gates(&self) -> Option<GateLayout> {
        self.gates
    }

    /// Evaluate one track after association, appending any events to `events`.
    pub fn observe(&mut self, track: &mut Track, frame_width: u32, events: &mut Vec<CountEvent>) {
        match self.mode {
            Mode::Unconditional => {
                if track.counted == CountedState::NotCounted {
                    self.increment(track, events);
                }
            }
            Mode::MidLine => {
                if track.counted == CountedState::NotCounted
                    && track.center().x >= (frame_width as f32 * 0.5).floor()
                {
                    self.increment(track, events);
                }
            }
            Mode::Gated(plan) => self.step(plan, track, events),
        }
    }

    fn step(&mut self, plan: GatePlan, track: &mut Track, events: &mut Vec<CountEvent>) {
        let prev = track.prev_reference.y;
        let curr = track.reference.y;
        let against = plan.flow.reverse();

        if track.crossing == CrossingState::Neutral && plan.flow.crossed(prev, curr, plan.entry) {
            track.crossing = CrossingState::ArmedForward;
            self.emit(track, CountEventKind::ArmedForward, events);
        }

        if track.crossing == CrossingState::ArmedForward
            && track.counted == CountedState::NotCounted
            && plan.flow.crossed(prev, curr, plan.exit)
        {
            track.crossing = CrossingState::Neutral;
            self.increment(track, events);
        }

        if track.crossing == CrossingState::Neutral && against.crossed(prev, curr, plan.exit) {
            track.crossing = CrossingState::ArmedReverse;
            self.emit(track, CountEventKind::ArmedReverse, events);
        }

        if track.crossing == CrossingState::ArmedReverse && against.crossed(prev, curr, plan.entry) {
            track.crossing = CrossingState::Neutral;
            track.counted = CountedState::Nullified;
            if self.absolute > 0 {
                self.absolute -= 1;
                info!(track_id = track.track_id, absolute = self.absolute, "reversal -1");
                self.emit(track, CountEventKind::Decrement, events);
            } else {
                info!(track_id = track.track_id, "reversal at zero, counter unchanged");
                self.emit(track, CountEventKind::Floor, events);
            }
        }

        if track.crossing == CrossingState::ArmedForward
            && plan.flow.retreated(prev, curr, plan.entry, self.reset_margin)
        {
            track.crossing = CrossingState::Neutral;
            self.emit(track, CountEventKind::Disarmed, events);
        }

        if track.crossing == CrossingState::ArmedReverse
            && against.retreated(prev, curr, plan.exit, self.reset_margin)
        {
            track.crossing = CrossingState::Neutral;
            self.emit(track, CountEventKind::Disarmed, events);
        }
    }

    fn increment(&mut self, track: &mut Track, events: &mut Vec<CountEvent>) {
        self.absolute += 1;
        track.counted = CountedState::Counted;
        info!(track_id = track.track_id, absolute = self.absolute, "crossing +1");
        self.emit(track, CountEventKind::Increment, events);
    }

    fn emit(&self, track: &Track, kind: CountEventKind, events: &mut Vec<CountEvent>) {
        if matches!(
            kind,
            CountEventKind::ArmedForward | CountEventKind::ArmedReverse | CountEventKind::Disarmed
        ) {
            debug!(track_id = track.track_id, ?kind, y = track.reference.y, "crossing state");
        }
        events.push(CountEvent {
            track_id: track.track_id,
            kind,
            absolute: self.absolute,
        });
    }
}
