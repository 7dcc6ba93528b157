//! Client-side streaming session layer for ADK-style bidi agent backends.
//!
//! One duplex WebSocket per session carries interleaved text and audio
//! envelopes. This crate owns the connection lifecycle (including the fixed
//! 5-second reconnect policy), the wire codec, the five-state turn-status
//! machine with per-turn latency instrumentation, and the adapter contracts
//! to audio capture/playback and optional speech transcription. Presentation
//! is external: consumers render the [`LiveEvent`] stream however they like.
//!
//! - `protocol`: the wire envelope codec.
//! - `session`: the transport session task and its handle.
//! - `status`: the turn-status state machine.
//! - `timing`: per-turn latency bookkeeping.
//! - `audio`: capture/playback adapter.
//! - `speech`: supervised optional transcription.
//! - `transcript`: per-turn message assembly for consumers.

pub mod audio;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod speech;
pub mod status;
pub mod timing;
pub mod transcript;

pub use audio::{CaptureBridge, PlaybackCommand};
pub use config::LiveConfig;
pub use error::{AudioDeviceError, ProtocolError, SpeechError, TransportError};
pub use protocol::Envelope;
pub use session::{LiveClient, LiveEvent, LiveHandle, SocketState};
pub use speech::{SpeechEngine, SpeechEvent, SpeechSupervisor};
pub use status::{SessionEvent, StatusState};
pub use timing::TurnLatency;
pub use transcript::{SealedMessage, Transcript};
