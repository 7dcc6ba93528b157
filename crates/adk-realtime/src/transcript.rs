//! Assembles streamed text chunks into per-turn messages.
//!
//! Owned by whichever presentation consumer renders a turn; the session's
//! event stream tells it when to append, complete, or abandon.

/// A growing buffer for the turn currently being streamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAccumulator {
    turn_id: u64,
    text: String,
}

/// A completed turn's text. Immutable once sealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub turn_id: u64,
    pub text: String,
}

impl MessageAccumulator {
    fn new(turn_id: u64) -> Self {
        Self {
            turn_id,
            text: String::new(),
        }
    }

    pub fn append(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    fn seal(self) -> SealedMessage {
        SealedMessage {
            turn_id: self.turn_id,
            text: self.text,
        }
    }
}

/// Tracks the open accumulator across turns for one consumer.
#[derive(Debug, Default)]
pub struct Transcript {
    next_turn_id: u64,
    open: Option<MessageAccumulator>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a text chunk, opening an accumulator if the turn has none yet.
    pub fn push_chunk(&mut self, chunk: &str) {
        let open = self.open.get_or_insert_with(|| {
            let turn_id = self.next_turn_id;
            self.next_turn_id += 1;
            MessageAccumulator::new(turn_id)
        });
        open.append(chunk);
    }

    /// Seals the open accumulator on turn completion. A completion with no
    /// open accumulator yields `None`.
    pub fn complete(&mut self) -> Option<SealedMessage> {
        self.open.take().map(MessageAccumulator::seal)
    }

    /// Discards the in-progress accumulator on interruption. This is not a
    /// normal completion; the partial text is dropped.
    pub fn abandon(&mut self) {
        self.open = None;
    }

    pub fn in_progress(&self) -> Option<&MessageAccumulator> {
        self.open.as_ref()
    }
}
