//! Console client for an ADK bidi-streaming agent backend.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command line.
//! 2. Initializing logging.
//! 3. Spawning the streaming session and, in audio mode, the native
//!    capture/playback workers.
//! 4. Rendering the session's status, latency, and transcript events while
//!    forwarding typed lines as text messages.

mod audio;
mod config;

use adk_realtime::{LiveClient, LiveConfig, LiveEvent, LiveHandle, Transcript, TurnLatency};
use anyhow::Context;
use clap::Parser;
use config::ConsoleConfig;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "parley", about = "Talk to a streaming agent backend from the terminal")]
struct Args {
    /// Agent backend base URL, e.g. ws://127.0.0.1:8000
    #[arg(long)]
    server: Option<String>,
    /// Start the session in audio mode (needs the `native-audio` build)
    #[arg(long)]
    audio: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ConsoleConfig::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let server = args.server.unwrap_or_else(|| config.server_url.clone());
    let audio_requested = args.audio || config.audio;

    let (handle, events) = LiveClient::spawn(LiveConfig {
        endpoint: server.clone(),
        audio_mode: audio_requested,
        ..LiveConfig::default()
    });
    info!(
        session_id = %handle.session_id(),
        server = %server,
        audio_mode = audio_requested,
        "session starting"
    );

    let mut audio_started = false;
    if audio_requested {
        audio_started = start_audio(&handle).await;
        if !audio_started {
            handle.set_audio_mode(false).await;
        }
    }

    let renderer = tokio::spawn(render_events(events));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/audio on" => {
                        if !audio_started {
                            audio_started = start_audio(&handle).await;
                        }
                        if audio_started {
                            handle.set_audio_mode(true).await;
                        }
                    }
                    "/audio off" => handle.set_audio_mode(false).await,
                    text => handle.send_text(text).await,
                },
                None => break,
            },
        }
    }

    // Dropping the last handle ends the session task, which closes the socket.
    drop(handle);
    renderer.abort();
    info!("goodbye");
    Ok(())
}

/// Brings up the capture/playback workers. A failure disables audio only;
/// the text channel stays usable.
async fn start_audio(handle: &LiveHandle) -> bool {
    match audio::start(handle.clone()).await {
        Ok(()) => {
            info!("audio workers started");
            true
        }
        Err(e) => {
            warn!(error = %e, "audio unavailable, staying in text mode");
            false
        }
    }
}

/// Renders the session's event stream: streamed text to stdout, everything
/// else as structured logs.
async fn render_events(mut events: mpsc::Receiver<LiveEvent>) {
    let mut transcript = Transcript::new();
    let mut latency = TurnLatency::default();
    while let Some(event) = events.recv().await {
        match event {
            LiveEvent::Connection(state) => info!(?state, "connection"),
            LiveEvent::Status { from, to } => debug!(?from, ?to, "status"),
            LiveEvent::Latency(snapshot) => latency = snapshot,
            LiveEvent::Text(chunk) => {
                print!("{chunk}");
                let _ = std::io::stdout().flush();
                transcript.push_chunk(&chunk);
            }
            LiveEvent::TurnComplete => {
                if let Some(sealed) = transcript.complete() {
                    println!();
                    debug!(turn = sealed.turn_id, chars = sealed.text.len(), "turn sealed");
                }
                info!(
                    input_ms = latency.input.as_millis() as u64,
                    processing_ms = latency.processing.as_millis() as u64,
                    response_ms = latency.response.as_millis() as u64,
                    total_ms = latency.total.as_millis() as u64,
                    "turn complete"
                );
            }
            LiveEvent::Interrupted => {
                transcript.abandon();
                println!();
                info!("agent interrupted the turn");
            }
            LiveEvent::AudioUnavailable(e) => warn!(error = %e, "audio disabled"),
            LiveEvent::SpeechUnavailable(e) => warn!(error = %e, "transcription disabled"),
        }
    }
}
