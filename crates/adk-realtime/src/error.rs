//! Error taxonomy for the streaming session layer.
//!
//! None of these are fatal to the running process: transport failures feed
//! the reconnect path, protocol failures drop a single envelope, and the
//! audio/speech variants degrade their own feature only.

use tokio_tungstenite::tungstenite;

/// Failures of the underlying duplex socket.
///
/// Always handled by the automatic reconnect path; never surfaced as fatal.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket connect failed: {0}")]
    Connect(#[source] tungstenite::Error),
    #[error("websocket error: {0}")]
    Socket(#[from] tungstenite::Error),
    #[error("connection closed by peer")]
    Closed,
}

/// Failures to decode a single inbound envelope.
///
/// The offending message is logged and dropped; the socket stays open.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("envelope missing `mime_type`")]
    MissingMimeType,
    #[error("envelope missing `data` payload")]
    MissingPayload,
    #[error("unsupported mime type `{0}`")]
    UnsupportedMime(String),
    #[error("invalid base64 audio payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Failures of the capture/playback workers.
///
/// Disables audio features for the session; text and transport stay usable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AudioDeviceError {
    #[error("audio capture failed: {0}")]
    Capture(String),
    #[error("audio playback failed: {0}")]
    Playback(String),
    #[error("playback worker is gone")]
    PlaybackWorkerGone,
}

/// Failures of the optional speech-transcription engine.
///
/// Degrades captioning only; never touches transport or audio.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpeechError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("speech recognition is not supported on this client")]
    Unsupported,
    #[error("speech recognition network failure: {0}")]
    Network(String),
    #[error("no speech detected")]
    NoResult,
}

impl SpeechError {
    /// `NoResult` is benign and self-healing; everything else is terminal
    /// for transcription.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SpeechError::NoResult)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_result_is_benign() {
        assert!(!SpeechError::NoResult.is_fatal());
        assert!(SpeechError::PermissionDenied.is_fatal());
        assert!(SpeechError::Unsupported.is_fatal());
        assert!(SpeechError::Network("dns".into()).is_fatal());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            ProtocolError::UnsupportedMime("image/png".into()).to_string(),
            "unsupported mime type `image/png`"
        );
        assert_eq!(
            ProtocolError::MissingMimeType.to_string(),
            "envelope missing `mime_type`"
        );
        assert_eq!(
            AudioDeviceError::Capture("no input device".into()).to_string(),
            "audio capture failed: no input device"
        );
    }
}
