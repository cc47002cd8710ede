//! Error types for the AURA voice core

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the conversation core.
///
/// Collaborator outcomes that can legitimately be empty (a silent utterance, a
/// unit the synthesizer skipped) are not errors; see `TranscriptOutcome` and
/// `SynthesisOutcome`.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("VAD initialization failed: {0}")]
    VadInit(String),

    #[error("VAD processing error: {0}")]
    VadProcessing(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed control message: {0}")]
    MalformedMessage(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Channel receive error: {0}")]
    ChannelReceive(String),

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: &'static str, millis: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for VoiceError {
    fn from(err: serde_json::Error) -> Self {
        VoiceError::MalformedMessage(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for VoiceError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        VoiceError::ChannelSend(err.to_string())
    }
}

impl VoiceError {
    /// Build a timeout error for `operation` from a configured duration.
    pub fn timeout(operation: &'static str, after: std::time::Duration) -> Self {
        VoiceError::Timeout {
            operation,
            millis: after.as_millis() as u64,
        }
    }
}
