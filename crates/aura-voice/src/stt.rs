//! **Speech-to-Text** seam.
//!
//! Implement [`Transcriber`] for a local model or a hosted API. An utterance
//! that contains no words is not an error: return [`TranscriptOutcome::Empty`]
//! and the session goes back to listening.

use crate::vad::Utterance;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// What a transcription attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOutcome {
    Text(String),
    /// Nothing intelligible was said.
    Empty,
    /// The backend failed; the utterance is dropped.
    Failed(String),
}

impl TranscriptOutcome {
    /// Normalize raw backend text: whitespace-only becomes `Empty`.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            TranscriptOutcome::Empty
        } else {
            TranscriptOutcome::Text(trimmed.to_string())
        }
    }
}

/// Converts a completed utterance to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, utterance: &Utterance) -> TranscriptOutcome;
}

/// Placeholder STT: returns a fixed transcript, or `Empty` when none is set.
/// Use for running the conversation loop without a real model.
#[derive(Debug, Default)]
pub struct PlaceholderStt {
    pub response: Option<String>,
}

impl PlaceholderStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
        }
    }
}

#[async_trait]
impl Transcriber for PlaceholderStt {
    async fn transcribe(&self, _utterance: &Utterance) -> TranscriptOutcome {
        match &self.response {
            Some(r) => TranscriptOutcome::from_text(r.clone()),
            None => TranscriptOutcome::Empty,
        }
    }
}

/// Returns scripted outcomes in order, then `Empty` once exhausted.
#[derive(Debug, Default)]
pub struct ScriptedStt {
    outcomes: Mutex<Vec<TranscriptOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedStt {
    pub fn new(outcomes: impl IntoIterator<Item = TranscriptOutcome>) -> Self {
        let mut outcomes: Vec<_> = outcomes.into_iter().collect();
        outcomes.reverse();
        Self {
            outcomes: Mutex::new(outcomes),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of utterances transcribed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedStt {
    async fn transcribe(&self, _utterance: &Utterance) -> TranscriptOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop()
            .unwrap_or(TranscriptOutcome::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn utterance(bytes: usize) -> Utterance {
        Utterance {
            audio: vec![0u8; bytes],
            frame_count: bytes / 960,
            duration: Duration::from_millis(30 * (bytes / 960) as u64),
            started_at: Utc::now(),
            sample_rate: 16000,
        }
    }

    #[test]
    fn whitespace_transcript_is_empty() {
        assert_eq!(TranscriptOutcome::from_text("  \n"), TranscriptOutcome::Empty);
        assert_eq!(
            TranscriptOutcome::from_text(" hi there "),
            TranscriptOutcome::Text("hi there".to_string())
        );
    }

    #[tokio::test]
    async fn placeholder_without_response_is_empty() {
        let stt = PlaceholderStt::new();
        assert_eq!(stt.transcribe(&utterance(960)).await, TranscriptOutcome::Empty);
        let stt = PlaceholderStt::with_response("hello");
        assert_eq!(
            stt.transcribe(&utterance(960)).await,
            TranscriptOutcome::Text("hello".to_string())
        );
    }

    #[tokio::test]
    async fn scripted_outcomes_play_in_order() {
        let stt = ScriptedStt::new([
            TranscriptOutcome::Text("one".into()),
            TranscriptOutcome::Failed("down".into()),
        ]);
        let u = utterance(960);
        assert_eq!(stt.transcribe(&u).await, TranscriptOutcome::Text("one".into()));
        assert_eq!(stt.transcribe(&u).await, TranscriptOutcome::Failed("down".into()));
        assert_eq!(stt.transcribe(&u).await, TranscriptOutcome::Empty);
        assert_eq!(stt.calls(), 3);
    }
}
