//! Per-turn latency bookkeeping.
//!
//! Pure timestamp arithmetic; the status machine feeds it transition events
//! and is the only writer.

use std::time::{Duration, Instant};

/// The four monotonic timestamps recorded over one turn. All reset together
/// when the next turn begins.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnTiming {
    input_start: Option<Instant>,
    input_sent: Option<Instant>,
    response_start: Option<Instant>,
    response_end: Option<Instant>,
}

/// Derived per-turn durations. Any metric whose source timestamp is missing
/// floors at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnLatency {
    /// First input event until the outbound dispatch completed.
    pub input: Duration,
    /// Dispatch completion until the first response content arrived.
    pub processing: Duration,
    /// First response content until the turn completed.
    pub response: Duration,
    /// First input event until the turn completed.
    pub total: Duration,
}

impl TurnTiming {
    /// Clears all four timestamps at the start of a new turn.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Records the first user-input event of the turn. Later calls keep the
    /// original timestamp.
    pub fn record_input_start(&mut self, now: Instant) {
        self.input_start.get_or_insert(now);
    }

    /// Records completion of the outbound dispatch for the turn.
    pub fn record_input_sent(&mut self, now: Instant) {
        self.input_sent.get_or_insert(now);
    }

    /// Records the first inbound content of the turn.
    pub fn record_response_start(&mut self, now: Instant) {
        self.response_start.get_or_insert(now);
    }

    /// Records turn completion.
    pub fn record_response_end(&mut self, now: Instant) {
        self.response_end.get_or_insert(now);
    }

    pub fn latency(&self) -> TurnLatency {
        TurnLatency {
            input: span(self.input_start, self.input_sent),
            processing: span(self.input_sent, self.response_start),
            response: span(self.response_start, self.response_end),
            total: span(self.input_start, self.response_end),
        }
    }
}

fn span(from: Option<Instant>, to: Option<Instant>) -> Duration {
    match (from, to) {
        (Some(from), Some(to)) => to.saturating_duration_since(from),
        _ => Duration::ZERO,
    }
}
