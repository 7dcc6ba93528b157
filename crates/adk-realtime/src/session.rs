//! Owns the single duplex connection and its lifecycle.
//!
//! One tokio task per session: commands come in over an mpsc channel, the
//! observable [`LiveEvent`] stream goes out over another, and the requested
//! audio mode is published on a watch channel. The task is the only writer of
//! the socket handle, the [`StatusMachine`], and the timing record, so the
//! single-writer discipline is structural rather than conventional.

use crate::{
    audio::{AudioPipeline, PlaybackCommand},
    config::LiveConfig,
    error::{AudioDeviceError, SpeechError, TransportError},
    protocol::{self, Envelope},
    status::{SessionEvent, StatusMachine, StatusState},
    timing::TurnLatency,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::time::Instant;
use tokio::{net::TcpStream, sync::mpsc, sync::watch};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of the session's socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closed,
}

/// Everything the core reports to the presentation layer.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// The socket changed state.
    Connection(SocketState),
    /// The turn status changed.
    Status { from: StatusState, to: StatusState },
    /// A timing field recorded; snapshot of the current turn's latency.
    Latency(TurnLatency),
    /// An inbound text content chunk.
    Text(String),
    /// The agent finished its turn.
    TurnComplete,
    /// The agent interrupted the in-flight turn.
    Interrupted,
    /// Playback failed and audio output is disabled for this session.
    AudioUnavailable(AudioDeviceError),
    /// The transcription engine hit a terminal error; captioning is gone but
    /// nothing else is affected.
    SpeechUnavailable(SpeechError),
}

enum Command {
    SendText(String),
    SendAudio(Vec<u8>),
    SetAudioMode(bool),
    CaptureStarted,
    ListeningHint,
    RegisterPlayback(mpsc::Sender<PlaybackCommand>),
    SpeechUnavailable(SpeechError),
}

/// Cheap, clonable handle to a running session task. The task shuts down and
/// closes its socket once every handle is dropped.
#[derive(Debug, Clone)]
pub struct LiveHandle {
    session_id: String,
    commands: mpsc::Sender<Command>,
    audio_mode: watch::Receiver<bool>,
}

impl LiveHandle {
    /// The opaque token identifying this client instance; stable across
    /// reconnects.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Sends one text message. Silently dropped while the socket is not open;
    /// there is no outbound queue.
    pub async fn send_text(&self, text: impl Into<String>) {
        let _ = self.commands.send(Command::SendText(text.into())).await;
    }

    /// Sends one raw PCM chunk as one `audio/pcm` envelope. Same drop
    /// semantics as [`send_text`](Self::send_text).
    pub async fn send_audio_chunk(&self, pcm: Vec<u8>) {
        let _ = self.commands.send(Command::SendAudio(pcm)).await;
    }

    /// Requests a different audio mode. A change cycles the connection
    /// through the regular reconnect machinery.
    pub async fn set_audio_mode(&self, enabled: bool) {
        let _ = self.commands.send(Command::SetAudioMode(enabled)).await;
    }

    /// Reports that voice capture started.
    pub async fn capture_started(&self) {
        let _ = self.commands.send(Command::CaptureStarted).await;
    }

    /// Requests a `Listening` status hint (speech transcription adapter).
    pub async fn listening_hint(&self) {
        let _ = self.commands.send(Command::ListeningHint).await;
    }

    /// Registers the playback worker that inbound audio fans out to.
    pub async fn register_playback(&self, playback: mpsc::Sender<PlaybackCommand>) {
        let _ = self
            .commands
            .send(Command::RegisterPlayback(playback))
            .await;
    }

    pub(crate) async fn speech_unavailable(&self, error: SpeechError) {
        let _ = self.commands.send(Command::SpeechUnavailable(error)).await;
    }

    /// The currently requested audio mode, updated before each reconnect.
    pub fn audio_mode_watch(&self) -> watch::Receiver<bool> {
        self.audio_mode.clone()
    }
}

/// Entry point for the streaming session layer.
pub struct LiveClient;

impl LiveClient {
    /// Spawns the session task and returns its handle plus the event stream.
    pub fn spawn(config: LiveConfig) -> (LiveHandle, mpsc::Receiver<LiveEvent>) {
        let session_id = Uuid::new_v4().simple().to_string();
        let (command_tx, command_rx) = mpsc::channel(128);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (mode_tx, mode_rx) = watch::channel(config.audio_mode);

        let task = SessionTask {
            machine: StatusMachine::new(config.send_window),
            context: SessionContext {
                session_id: session_id.clone(),
                audio_mode: config.audio_mode,
                socket_state: SocketState::Closed,
            },
            config,
            audio: AudioPipeline::default(),
            commands: command_rx,
            events: event_tx,
            mode_tx,
        };
        tokio::spawn(task.run());

        let handle = LiveHandle {
            session_id,
            commands: command_tx,
            audio_mode: mode_rx,
        };
        (handle, event_rx)
    }
}

/// Session record owned exclusively by the session task.
struct SessionContext {
    session_id: String,
    audio_mode: bool,
    socket_state: SocketState,
}

impl SessionContext {
    fn target(&self, endpoint: &str) -> String {
        format!(
            "{}/ws/{}?is_audio={}",
            endpoint.trim_end_matches('/'),
            self.session_id,
            self.audio_mode
        )
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

enum Drive {
    Reconnect,
    Teardown,
}

enum ConnectOutcome {
    Open(WebSocketStream<MaybeTlsStream<TcpStream>>),
    Failed,
    Teardown,
}

enum CommandOutcome {
    Continue,
    Cycle,
}

struct SessionTask {
    config: LiveConfig,
    context: SessionContext,
    machine: StatusMachine,
    audio: AudioPipeline,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<LiveEvent>,
    mode_tx: watch::Sender<bool>,
}

impl SessionTask {
    async fn run(mut self) {
        loop {
            let target = self.context.target(&self.config.endpoint);
            let connect_mode = self.context.audio_mode;
            self.set_socket_state(SocketState::Connecting).await;
            info!(session_id = %self.context.session_id, %target, "connecting");
            match self.connect(&target).await {
                ConnectOutcome::Open(mut stream) => {
                    if self.context.audio_mode != connect_mode {
                        // The requested mode changed mid-handshake; cycle
                        // straight into a fresh connect at the new target.
                        let _ = stream.close(None).await;
                        self.set_socket_state(SocketState::Closed).await;
                        continue;
                    }
                    self.set_socket_state(SocketState::Open).await;
                    info!(session_id = %self.context.session_id, "connected");
                    let outcome = self.drive(stream).await;
                    self.set_socket_state(SocketState::Closed).await;
                    if matches!(outcome, Drive::Teardown) {
                        info!(session_id = %self.context.session_id, "session torn down");
                        return;
                    }
                }
                ConnectOutcome::Failed => {
                    self.set_socket_state(SocketState::Closed).await;
                }
                ConnectOutcome::Teardown => return,
            }
            // Exactly one reconnect attempt per close, after a fixed delay.
            // Unbounded retries, no backoff.
            if !self.wait_for_reconnect().await {
                return;
            }
        }
    }

    /// Opens the socket while still servicing commands, so a send issued
    /// mid-handshake is dropped rather than queued behind the connect.
    async fn connect(&mut self, target: &str) -> ConnectOutcome {
        let mut attempt = std::pin::pin!(connect_async(target));
        loop {
            tokio::select! {
                result = &mut attempt => return match result {
                    Ok((stream, _)) => ConnectOutcome::Open(stream),
                    Err(e) => {
                        warn!(error = %TransportError::Connect(e), "connect failed");
                        ConnectOutcome::Failed
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_offline_command(command).await,
                    None => return ConnectOutcome::Teardown,
                },
            }
        }
    }

    /// Sleeps out the reconnect delay while still servicing commands, so a
    /// send against a closed socket is dropped rather than queued. Returns
    /// `false` on teardown.
    async fn wait_for_reconnect(&mut self) -> bool {
        debug!(delay = ?self.config.reconnect_delay, "reconnect scheduled");
        let deadline = tokio::time::Instant::now() + self.config.reconnect_delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_offline_command(command).await,
                    None => return false,
                },
            }
        }
    }

    /// Pumps one open socket until it closes or the session ends.
    async fn drive(&mut self, stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Drive {
        let (mut sink, mut source) = stream.split();
        loop {
            let deadline = self.machine.send_window_deadline();
            let settle = async move {
                match deadline {
                    Some(at) => {
                        tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await
                    }
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.handle_frame(&text).await,
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(?frame, "server closed the connection");
                        return Drive::Reconnect;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %TransportError::Socket(e), "socket error");
                        return Drive::Reconnect;
                    }
                    None => {
                        info!(reason = %TransportError::Closed, "socket stream ended");
                        return Drive::Reconnect;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => match self.handle_command(command, &mut sink).await {
                        CommandOutcome::Continue => {}
                        CommandOutcome::Cycle => {
                            let _ = sink.close().await;
                            return Drive::Reconnect;
                        }
                    },
                    None => {
                        let _ = sink.close().await;
                        return Drive::Teardown;
                    }
                },
                _ = settle => self.dispatch(SessionEvent::SendWindowElapsed).await,
            }
        }
    }

    async fn handle_command(&mut self, command: Command, sink: &mut WsSink) -> CommandOutcome {
        match command {
            Command::SendText(text) => {
                if self.send(sink, &Envelope::Text(text)).await {
                    self.dispatch(SessionEvent::TextDispatched).await;
                    CommandOutcome::Continue
                } else {
                    CommandOutcome::Cycle
                }
            }
            Command::SendAudio(pcm) => {
                if self.send(sink, &Envelope::Audio(pcm)).await {
                    self.dispatch(SessionEvent::AudioDispatched).await;
                    CommandOutcome::Continue
                } else {
                    CommandOutcome::Cycle
                }
            }
            Command::SetAudioMode(enabled) => {
                if enabled == self.context.audio_mode {
                    return CommandOutcome::Continue;
                }
                self.context.audio_mode = enabled;
                self.mode_tx.send_replace(enabled);
                info!(audio_mode = enabled, "audio mode changed, cycling the connection");
                CommandOutcome::Cycle
            }
            Command::CaptureStarted => {
                self.dispatch(SessionEvent::CaptureStarted).await;
                CommandOutcome::Continue
            }
            Command::ListeningHint => {
                self.dispatch(SessionEvent::ListeningHint).await;
                CommandOutcome::Continue
            }
            Command::RegisterPlayback(playback) => {
                self.audio.register(playback);
                CommandOutcome::Continue
            }
            Command::SpeechUnavailable(error) => {
                self.emit(LiveEvent::SpeechUnavailable(error)).await;
                CommandOutcome::Continue
            }
        }
    }

    /// Commands arriving while no socket is open. Outbound messages are
    /// silently dropped; everything else behaves as usual.
    async fn handle_offline_command(&mut self, command: Command) {
        match command {
            Command::SendText(_) | Command::SendAudio(_) => {
                debug!("socket not open, dropping outbound message");
            }
            Command::SetAudioMode(enabled) => {
                if enabled != self.context.audio_mode {
                    self.context.audio_mode = enabled;
                    self.mode_tx.send_replace(enabled);
                    debug!(audio_mode = enabled, "audio mode updated for next connect");
                }
            }
            Command::CaptureStarted => self.dispatch(SessionEvent::CaptureStarted).await,
            Command::ListeningHint => self.dispatch(SessionEvent::ListeningHint).await,
            Command::RegisterPlayback(playback) => self.audio.register(playback),
            Command::SpeechUnavailable(error) => {
                self.emit(LiveEvent::SpeechUnavailable(error)).await;
            }
        }
    }

    /// Writes one envelope to the socket. Returns `false` when the socket
    /// failed and the connection should cycle.
    async fn send(&mut self, sink: &mut WsSink, envelope: &Envelope) -> bool {
        let frame = match protocol::encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound envelope, dropping");
                return true;
            }
        };
        match sink.send(WsMessage::Text(frame.into())).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "socket send failed");
                false
            }
        }
    }

    async fn handle_frame(&mut self, raw: &str) {
        match protocol::decode(raw) {
            Ok(Envelope::Text(chunk)) => {
                self.dispatch(SessionEvent::ResponseContent).await;
                self.emit(LiveEvent::Text(chunk)).await;
            }
            Ok(Envelope::Audio(pcm)) => {
                self.dispatch(SessionEvent::ResponseContent).await;
                if let Err(e) = self.audio.play(pcm) {
                    warn!(error = %e, "playback unavailable for this session");
                    self.emit(LiveEvent::AudioUnavailable(e)).await;
                }
            }
            Ok(Envelope::TurnComplete) => {
                self.dispatch(SessionEvent::TurnCompleted).await;
                self.emit(LiveEvent::TurnComplete).await;
            }
            Ok(Envelope::Interrupted) => {
                // Playback stops first, before any observer reacts.
                self.audio.flush();
                self.dispatch(SessionEvent::Interrupted).await;
                self.emit(LiveEvent::Interrupted).await;
            }
            // Decode failures never close the socket.
            Err(e) => warn!(error = %e, "dropping undecodable envelope"),
        }
    }

    /// Feeds one event to the status machine and publishes whatever
    /// transitions it produced, each with a latency snapshot.
    async fn dispatch(&mut self, event: SessionEvent) {
        for transition in self.machine.apply(event, Instant::now()) {
            debug!(from = ?transition.from, to = ?transition.to, "status transition");
            self.emit(LiveEvent::Status {
                from: transition.from,
                to: transition.to,
            })
            .await;
            self.emit(LiveEvent::Latency(self.machine.latency())).await;
        }
    }

    async fn set_socket_state(&mut self, state: SocketState) {
        if self.context.socket_state != state {
            self.context.socket_state = state;
            self.emit(LiveEvent::Connection(state)).await;
        }
    }

    async fn emit(&self, event: LiveEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}
