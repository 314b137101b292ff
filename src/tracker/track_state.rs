/// Progress of a track through the gate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrossingState {
    /// Not between gates in a meaningful way
    #[default]
    Neutral,
    /// Crossed the entry gate with the flow, waiting for the exit gate
    ArmedForward,
    /// Crossed the exit gate against the flow, waiting for the entry gate
    ArmedReverse,
}

/// Whether a track has contributed to the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountedState {
    #[default]
    NotCounted,
    /// Added exactly one unit
    Counted,
    /// Walked back out through both gates; never counts again
    Nullified,
}
