//! **Incremental speech synthesis** seam.
//!
//! One call per speakable unit. A failed or skipped unit is an outcome, not an
//! error, so the response loop can drop that sentence and keep going.

use crate::audio::samples_to_bytes;
use async_trait::async_trait;
use std::time::Duration;

/// Synthesized audio for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFragment {
    /// Encoded audio (format is between the synthesizer and the client).
    pub bytes: Vec<u8>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Audio(AudioFragment),
    /// Nothing to play for this unit.
    Empty,
    Failed(String),
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> SynthesisOutcome;
}

/// Placeholder TTS: silent 16-bit PCM whose length tracks the text
/// (about 60ms per character at `sample_rate`). Lets clients exercise
/// playback timing without a real voice.
#[derive(Debug, Clone)]
pub struct PlaceholderTts {
    pub sample_rate: u32,
    pub ms_per_char: u64,
}

impl Default for PlaceholderTts {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            ms_per_char: 60,
        }
    }
}

impl PlaceholderTts {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SpeechSynthesizer for PlaceholderTts {
    async fn synthesize(&self, text: &str) -> SynthesisOutcome {
        let chars = text.trim().chars().count() as u64;
        if chars == 0 {
            return SynthesisOutcome::Empty;
        }
        let duration = Duration::from_millis(chars * self.ms_per_char);
        let samples = (self.sample_rate as u64 * duration.as_millis() as u64 / 1000) as usize;
        SynthesisOutcome::Audio(AudioFragment {
            bytes: samples_to_bytes(&vec![0i16; samples]),
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_sizes_audio_to_text() {
        let tts = PlaceholderTts::new();
        match tts.synthesize("Hello.").await {
            SynthesisOutcome::Audio(frag) => {
                assert_eq!(frag.duration, Duration::from_millis(360));
                assert_eq!(frag.bytes.len(), 16000 * 360 / 1000 * 2);
            }
            other => panic!("expected audio, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn blank_text_is_empty() {
        assert_eq!(PlaceholderTts::new().synthesize("  ").await, SynthesisOutcome::Empty);
    }
}
