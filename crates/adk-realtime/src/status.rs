//! The five-state turn-status machine.
//!
//! Every external source — socket frames, capture callbacks, speech hints,
//! timers — is funneled into the unified [`SessionEvent`] type, so transition
//! logic lives in exactly one place. Unmatched (state, event) pairs are
//! no-ops. The machine embeds the turn's [`TurnTiming`] record and is its only
//! writer.

use crate::timing::{TurnLatency, TurnTiming};
use std::time::{Duration, Instant};

/// The externally observable turn lifecycle. `Idle` is both the initial state
/// and the terminal state of every turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusState {
    #[default]
    Idle,
    Listening,
    Sending,
    Processing,
    Responding,
}

/// The unified inbound event type the machine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Voice capture started (audio adapter).
    CaptureStarted,
    /// The transcription engine heard something (speech adapter).
    ListeningHint,
    /// A text message was written to the socket.
    TextDispatched,
    /// An audio chunk was written to the socket.
    AudioDispatched,
    /// The audio send window elapsed with no end-of-utterance signal.
    SendWindowElapsed,
    /// The first (or a further) inbound content envelope arrived.
    ResponseContent,
    /// Inbound `turn_complete` marker.
    TurnCompleted,
    /// Inbound `interrupted` marker.
    Interrupted,
}

/// One observable state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: StatusState,
    pub to: StatusState,
}

#[derive(Debug)]
pub struct StatusMachine {
    state: StatusState,
    timing: TurnTiming,
    /// Set while `Sending` was entered by audio input and is waiting on the
    /// send window to settle.
    sending_since: Option<Instant>,
    send_window: Duration,
}

impl StatusMachine {
    pub fn new(send_window: Duration) -> Self {
        Self {
            state: StatusState::Idle,
            timing: TurnTiming::default(),
            sending_since: None,
            send_window,
        }
    }

    pub fn state(&self) -> StatusState {
        self.state
    }

    pub fn latency(&self) -> TurnLatency {
        self.timing.latency()
    }

    /// When the machine is waiting out the audio send window, the instant at
    /// which the session task should feed it [`SessionEvent::SendWindowElapsed`].
    pub fn send_window_deadline(&self) -> Option<Instant> {
        self.sending_since.map(|since| since + self.send_window)
    }

    /// Applies one event and returns the transitions it produced, in order.
    /// A text dispatch from `Idle` yields two (through `Sending` into
    /// `Processing`); most events yield one or none.
    pub fn apply(&mut self, event: SessionEvent, now: Instant) -> Vec<Transition> {
        // First input after the previous turn reached Idle starts a new turn:
        // all four timing fields reset together.
        if self.state == StatusState::Idle
            && matches!(
                event,
                SessionEvent::CaptureStarted
                    | SessionEvent::ListeningHint
                    | SessionEvent::TextDispatched
                    | SessionEvent::AudioDispatched
            )
        {
            self.timing.reset();
        }

        let mut transitions = Vec::new();
        match (self.state, event) {
            (StatusState::Idle, SessionEvent::CaptureStarted | SessionEvent::ListeningHint) => {
                self.timing.record_input_start(now);
                self.shift(StatusState::Listening, &mut transitions);
            }
            (
                StatusState::Idle | StatusState::Listening,
                SessionEvent::TextDispatched,
            ) => {
                // Form submit: input starts (if voice never did) and the
                // dispatch completes immediately.
                self.timing.record_input_start(now);
                self.shift(StatusState::Sending, &mut transitions);
                self.timing.record_input_sent(now);
                self.shift(StatusState::Processing, &mut transitions);
            }
            (
                StatusState::Idle | StatusState::Listening,
                SessionEvent::AudioDispatched,
            ) => {
                self.shift(StatusState::Sending, &mut transitions);
                self.sending_since = Some(now);
            }
            (StatusState::Sending, SessionEvent::SendWindowElapsed) => {
                self.timing.record_input_sent(now);
                self.shift(StatusState::Processing, &mut transitions);
            }
            (StatusState::Processing, SessionEvent::ResponseContent) => {
                self.timing.record_response_start(now);
                self.shift(StatusState::Responding, &mut transitions);
            }
            (StatusState::Responding, SessionEvent::TurnCompleted) => {
                self.timing.record_response_end(now);
                self.shift(StatusState::Idle, &mut transitions);
            }
            (from, SessionEvent::Interrupted) if from != StatusState::Idle => {
                // Cancels the in-flight turn unconditionally.
                self.shift(StatusState::Idle, &mut transitions);
            }
            _ => {}
        }
        transitions
    }

    fn shift(&mut self, to: StatusState, transitions: &mut Vec<Transition>) {
        self.sending_since = None;
        transitions.push(Transition {
            from: self.state,
            to,
        });
        self.state = to;
    }
}
