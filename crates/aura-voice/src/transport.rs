//! Messages exchanged with the caller.
//!
//! Inbound: ordered binary audio chunks and small JSON control messages.
//! Outbound: tagged JSON events (`{"type": "..."}`), audio base64-encoded.
//! The transport itself (WebSocket, socket, test harness) lives outside the
//! core and talks to a session through a pair of channels.

use crate::error::{VoiceError, VoiceResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message from the caller, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Raw 16-bit PCM bytes, any length.
    Audio(Vec<u8>),
    /// A text frame; expected to hold a JSON [`ControlMessage`].
    Text(String),
}

/// Control messages a caller may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    EndCall,
    Ping,
    /// Typed input, handled as an already-transcribed utterance.
    Text { text: String },
    /// Audio sent inside JSON, base64-encoded.
    AudioChunk { audio: String },
}

impl ControlMessage {
    pub fn parse(raw: &str) -> VoiceResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Decode the payload of an `audio_chunk` message.
    pub fn decode_audio(encoded: &str) -> VoiceResult<Vec<u8>> {
        STANDARD
            .decode(encoded.trim())
            .map_err(|e| VoiceError::MalformedMessage(format!("invalid base64 audio: {}", e)))
    }
}

/// Events sent to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Greeting {
        text: String,
        #[serde(with = "base64_bytes")]
        audio: Vec<u8>,
    },
    UserTranscript {
        text: String,
    },
    /// Generated text as it streams, before synthesis.
    PartialResponse {
        text: String,
    },
    /// Synthesized audio for one unit, with the text it speaks.
    AssistantAudio {
        index: usize,
        text: String,
        #[serde(with = "base64_bytes")]
        audio: Vec<u8>,
        duration_ms: u64,
    },
    Interrupted {
        message: String,
    },
    ResponseComplete {
        full_response: String,
    },
    Error {
        message: String,
    },
    Ping {
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

impl OutboundEvent {
    pub fn ping() -> Self {
        OutboundEvent::Ping {
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        OutboundEvent::Pong {
            timestamp: Utc::now(),
        }
    }

    pub fn interrupted() -> Self {
        OutboundEvent::Interrupted {
            message: "AI stopped speaking".to_string(),
        }
    }

    /// Wire name of the event (`"assistant_audio"` etc.).
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Greeting { .. } => "greeting",
            OutboundEvent::UserTranscript { .. } => "user_transcript",
            OutboundEvent::PartialResponse { .. } => "partial_response",
            OutboundEvent::AssistantAudio { .. } => "assistant_audio",
            OutboundEvent::Interrupted { .. } => "interrupted",
            OutboundEvent::ResponseComplete { .. } => "response_complete",
            OutboundEvent::Error { .. } => "error",
            OutboundEvent::Ping { .. } => "ping",
            OutboundEvent::Pong { .. } => "pong",
        }
    }

    pub fn to_json(&self) -> VoiceResult<String> {
        serde_json::to_string(self).map_err(|e| VoiceError::Transport(e.to_string()))
    }
}

mod base64_bytes {
    use super::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
