use std::time::Duration;

/// Tunables for a live session, created once and handed to
/// [`LiveClient::spawn`](crate::session::LiveClient::spawn).
#[derive(Clone, Debug)]
pub struct LiveConfig {
    /// Base URL of the agent backend, e.g. `ws://127.0.0.1:8000`. The
    /// session appends `/ws/<session_id>?is_audio=<bool>`.
    pub endpoint: String,
    /// Initial audio mode requested for the first connect.
    pub audio_mode: bool,
    /// Fixed delay before the single reconnect attempt scheduled after any
    /// socket close. Retries are unbounded and there is no backoff.
    pub reconnect_delay: Duration,
    /// How long the machine stays in `Sending` on audio input before the
    /// dispatch is considered complete. Approximates end-of-utterance; there
    /// is no voice-activity signal upstream.
    pub send_window: Duration,
    /// Delay before the speech supervisor restarts its engine after a benign
    /// no-result end.
    pub speech_restart_delay: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8000".to_string(),
            audio_mode: false,
            reconnect_delay: Duration::from_secs(5),
            send_window: Duration::from_millis(2000),
            speech_restart_delay: Duration::from_millis(500),
        }
    }
}
