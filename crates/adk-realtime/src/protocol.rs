//! Wire envelope codec for the agent backend's streaming protocol.
//!
//! One JSON object per text frame. A content envelope carries `mime_type`
//! plus `data` (UTF-8 text, or base64 for PCM audio); a control envelope
//! carries exactly one boolean marker and no payload.

use crate::error::ProtocolError;
use base64::Engine;
use serde::{Deserialize, Serialize};

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_AUDIO: &str = "audio/pcm";

/// The structured unit exchanged over the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// A chunk of UTF-8 text content.
    Text(String),
    /// A chunk of raw PCM audio content.
    Audio(Vec<u8>),
    /// Marks the end of the agent's turn.
    TurnComplete,
    /// Cancels the in-flight turn unconditionally.
    Interrupted,
}

/// The JSON shape shared by both directions of the wire.
#[derive(Serialize, Deserialize, Debug, Default)]
struct WireMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    turn_complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interrupted: Option<bool>,
}

/// Serializes an envelope into one wire frame.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let wire = match envelope {
        Envelope::Text(text) => WireMessage {
            mime_type: Some(MIME_TEXT.to_string()),
            data: Some(text.clone()),
            ..Default::default()
        },
        Envelope::Audio(pcm) => WireMessage {
            mime_type: Some(MIME_AUDIO.to_string()),
            data: Some(base64::engine::general_purpose::STANDARD.encode(pcm)),
            ..Default::default()
        },
        Envelope::TurnComplete => WireMessage {
            turn_complete: Some(true),
            ..Default::default()
        },
        Envelope::Interrupted => WireMessage {
            interrupted: Some(true),
            ..Default::default()
        },
    };
    Ok(serde_json::to_string(&wire)?)
}

/// Parses one wire frame into an envelope.
///
/// Classification order: `turn_complete` wins, then `interrupted`, then
/// dispatch on `mime_type`. Anything else is a [`ProtocolError`] which the
/// caller logs and discards without closing the socket.
pub fn decode(raw: &str) -> Result<Envelope, ProtocolError> {
    let wire: WireMessage = serde_json::from_str(raw)?;
    if wire.turn_complete.is_some() {
        return Ok(Envelope::TurnComplete);
    }
    if wire.interrupted.is_some() {
        return Ok(Envelope::Interrupted);
    }
    let mime_type = wire.mime_type.ok_or(ProtocolError::MissingMimeType)?;
    let data = wire.data.ok_or(ProtocolError::MissingPayload)?;
    match mime_type.as_str() {
        MIME_TEXT => Ok(Envelope::Text(data)),
        MIME_AUDIO => {
            let pcm = base64::engine::general_purpose::STANDARD.decode(data.as_bytes())?;
            Ok(Envelope::Audio(pcm))
        }
        other => Err(ProtocolError::UnsupportedMime(other.to_string())),
    }
}
