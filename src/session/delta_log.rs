//! Unrolling session total changes into single-step log entries.

use std::collections::VecDeque;

use tracing::{error, info, warn};

use crate::error::{AuditError, StoreError};
use crate::session::{Delta, LineId, LogEntry, SessionId, SessionStore};

/// Entries kept for retry while the store is unreachable.
const MAX_PENDING: usize = 4096;

/// Turns a session's relative total into an ordered stream of ±1 entries.
///
/// `sync` queues one entry per unit of change, then appends them in order.
/// An entry leaves the queue only once the store accepted it, so a store
/// outage delays entries instead of losing them. Past [`MAX_PENDING`] the
/// oldest entry is dropped.
#[derive(Debug)]
pub struct DeltaLedger {
    session_id: SessionId,
    line_id: LineId,
    planned: u64,
    pending: VecDeque<(Delta, u64)>,
    outage: bool,
    dropped: u64,
}

impl DeltaLedger {
    pub fn new(session_id: SessionId, line_id: LineId) -> Self {
        Self {
            session_id,
            line_id,
            planned: 0,
            pending: VecDeque::new(),
            outage: false,
            dropped: 0,
        }
    }

    /// Running total of the last queued entry.
    pub fn planned_total(&self) -> u64 {
        self.planned
    }

    /// Entries waiting for the store.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Entries given up on after the queue overflowed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Bring the log up to `total` and flush what is pending.
    pub fn sync(&mut self, store: &dyn SessionStore, total: u64) -> Result<(), StoreError> {
        while self.planned < total {
            self.planned += 1;
            self.enqueue(Delta::Increment, self.planned);
        }
        while self.planned > total {
            self.planned -= 1;
            self.enqueue(Delta::Decrement, self.planned);
        }
        self.flush(store)
    }

    fn enqueue(&mut self, delta: Delta, running_total: u64) {
        if self.pending.len() >= MAX_PENDING {
            self.pending.pop_front();
            self.dropped += 1;
            error!(
                session_id = self.session_id,
                line_id = self.line_id,
                dropped = self.dropped,
                "delta log backlog full, oldest entry dropped"
            );
        }
        self.pending.push_back((delta, running_total));
    }

    fn flush(&mut self, store: &dyn SessionStore) -> Result<(), StoreError> {
        while let Some(&(delta, running_total)) = self.pending.front() {
            if let Err(err) = store.append_log(self.session_id, self.line_id, delta, running_total) {
                if !self.outage {
                    warn!(
                        session_id = self.session_id,
                        line_id = self.line_id,
                        pending = self.pending.len(),
                        error = %err,
                        "delta log append failed, will retry"
                    );
                }
                self.outage = true;
                return Err(err);
            }
            self.pending.pop_front();
        }
        if self.outage {
            info!(session_id = self.session_id, line_id = self.line_id, "delta log caught up");
            self.outage = false;
        }
        Ok(())
    }
}

/// Check one session's entries: a single session, ±1 steps chained from a
/// zero baseline, never below zero, timestamps non-decreasing.
pub fn audit_log(entries: &[LogEntry]) -> Result<(), AuditError> {
    let Some(first) = entries.first() else {
        return Ok(());
    };

    let mut total = 0u64;
    let mut last_seen = first.timestamp;
    for (index, entry) in entries.iter().enumerate() {
        if entry.session_id != first.session_id {
            return Err(AuditError::MixedSession {
                index,
                expected: first.session_id,
                found: entry.session_id,
            });
        }
        if entry.timestamp < last_seen {
            return Err(AuditError::OutOfOrder { index });
        }
        let expected = entry.delta.apply(total).ok_or(AuditError::BelowZero { index })?;
        if entry.running_total != expected {
            return Err(AuditError::Gap {
                index,
                expected,
                found: entry.running_total,
            });
        }
        total = expected;
        last_seen = entry.timestamp;
    }
    Ok(())
}
