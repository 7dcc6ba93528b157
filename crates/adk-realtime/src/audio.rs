//! Bridges external capture/playback workers to the transport session.
//!
//! The workers themselves (device handling, resampling) live in the frontend;
//! this adapter only moves envelopes. Every capture callback becomes exactly
//! one `audio/pcm` envelope, every inbound `audio/pcm` payload is pushed to
//! the playback worker unmodified, and an interruption flushes playback
//! immediately.

use crate::error::AudioDeviceError;
use crate::session::LiveHandle;
use tokio::sync::mpsc;
use tracing::warn;

/// Commands accepted by a playback worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackCommand {
    /// Decoded PCM to play.
    Pcm(Vec<u8>),
    /// Stop output immediately, discarding anything buffered.
    EndOfAudio,
}

/// Capture-side half of the adapter, held by the capture worker. The first
/// chunk also reports capture start to the status machine.
#[derive(Debug)]
pub struct CaptureBridge {
    handle: LiveHandle,
    started: bool,
}

impl CaptureBridge {
    pub fn new(handle: LiveHandle) -> Self {
        Self {
            handle,
            started: false,
        }
    }

    /// Forwards one capture callback's chunk as one envelope, no batching.
    pub async fn push(&mut self, pcm: Vec<u8>) {
        if !self.started {
            self.started = true;
            self.handle.capture_started().await;
        }
        self.handle.send_audio_chunk(pcm).await;
    }
}

/// Playback-side half, owned by the session task.
#[derive(Debug, Default)]
pub(crate) struct AudioPipeline {
    playback: Option<mpsc::Sender<PlaybackCommand>>,
}

impl AudioPipeline {
    pub(crate) fn register(&mut self, playback: mpsc::Sender<PlaybackCommand>) {
        self.playback = Some(playback);
    }

    /// Pushes one inbound PCM payload to the playback worker. A slow worker
    /// loses the chunk; a gone worker disables playback for the session.
    pub(crate) fn play(&mut self, pcm: Vec<u8>) -> Result<(), AudioDeviceError> {
        let Some(playback) = &self.playback else {
            return Ok(());
        };
        match playback.try_send(PlaybackCommand::Pcm(pcm)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("playback worker is behind, dropping audio chunk");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.playback = None;
                Err(AudioDeviceError::PlaybackWorkerGone)
            }
        }
    }

    /// Tells the playback worker to stop output immediately, regardless of
    /// buffered content.
    pub(crate) fn flush(&mut self) {
        if let Some(playback) = &self.playback {
            if playback.try_send(PlaybackCommand::EndOfAudio).is_err() {
                self.playback = None;
            }
        }
    }
}
