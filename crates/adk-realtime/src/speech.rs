//! Optional local speech transcription, supervised.
//!
//! The engine itself is external and may be absent on a given client. Its
//! only contract with the core is status hints: transcript events request a
//! `Listening` hint, benign no-result ends restart the engine while the
//! session stays in audio mode, and fatal errors disable transcription with a
//! non-blocking capability-loss signal. It never touches the wire protocol.

use crate::{error::SpeechError, session::LiveHandle};
use async_trait::async_trait;
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

/// Events a transcription engine delivers to its supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// A partial transcript.
    Interim(String),
    /// A finalized transcript.
    Final(String),
    /// The engine stopped without a result.
    Ended,
    /// The engine failed.
    Error(SpeechError),
}

/// Start/stop surface of a transcription engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechEngine: Send {
    async fn start(&mut self) -> Result<(), SpeechError>;
    async fn stop(&mut self);
}

/// Drives a [`SpeechEngine`] for the lifetime of a session.
pub struct SpeechSupervisor;

impl SpeechSupervisor {
    pub fn spawn(
        engine: Box<dyn SpeechEngine>,
        events: mpsc::Receiver<SpeechEvent>,
        handle: LiveHandle,
        restart_delay: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(Self::run(engine, events, handle, restart_delay))
    }

    async fn run(
        mut engine: Box<dyn SpeechEngine>,
        mut events: mpsc::Receiver<SpeechEvent>,
        handle: LiveHandle,
        restart_delay: Duration,
    ) {
        let audio_mode = handle.audio_mode_watch();
        if let Err(e) = engine.start().await {
            Self::disable(engine.as_mut(), &handle, e).await;
            return;
        }
        while let Some(event) = events.recv().await {
            match event {
                SpeechEvent::Interim(_) | SpeechEvent::Final(_) => {
                    handle.listening_hint().await;
                }
                SpeechEvent::Ended | SpeechEvent::Error(SpeechError::NoResult) => {
                    if *audio_mode.borrow() {
                        tokio::time::sleep(restart_delay).await;
                        match engine.start().await {
                            Ok(()) => debug!("speech engine restarted"),
                            Err(e) => {
                                Self::disable(engine.as_mut(), &handle, e).await;
                                return;
                            }
                        }
                    } else {
                        debug!("audio mode off, leaving speech engine stopped");
                    }
                }
                SpeechEvent::Error(e) => {
                    warn!(error = %e, "speech engine failed, disabling transcription");
                    Self::disable(engine.as_mut(), &handle, e).await;
                    return;
                }
            }
        }
        engine.stop().await;
    }

    async fn disable(engine: &mut dyn SpeechEngine, handle: &LiveHandle, error: SpeechError) {
        engine.stop().await;
        handle.speech_unavailable(error).await;
    }
}
