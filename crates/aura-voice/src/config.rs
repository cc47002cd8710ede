//! Voice configuration loaded from TOML and environment.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | AURA_CONFIG | config/voice | Path to the TOML file (extension optional). |
//! | AURA__VAD__SPEECH_THRESHOLD | 0.6 | Ring-buffer speech ratio needed to start an utterance. |
//! | AURA__VAD__MIN_SPEECH_FRAMES | 8 | Speech frames required before an utterance may start. |
//! | AURA__VAD__MAX_SILENCE_FRAMES | 20 | Trailing silent frames that end an utterance. |
//! | AURA__SEGMENTER__MAX_CHARS | 200 | Buffer size that forces a speakable unit out. |
//! | AURA__SESSION__HISTORY_LIMIT | 10 | Turns retained per session. |
//! | AURA__TIMEOUTS__SYNTHESIS_MS | 10000 | Per-unit synthesis timeout. |

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the conversation core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub vad: VadConfig,
    pub segmenter: SegmenterConfig,
    pub session: SessionConfig,
    pub timeouts: TimeoutConfig,
}

/// Voice activity detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Sample rate in Hz (8000, 16000, 32000 or 48000).
    pub sample_rate: u32,
    /// Frame duration in milliseconds (10, 20 or 30).
    pub frame_ms: u32,
    /// Number of per-frame votes in the smoothing window (50 frames at 30ms = 1.5s).
    pub window_frames: usize,
    /// Fraction of speech votes in the window required to start an utterance.
    pub speech_threshold: f32,
    /// Speech frames that must accumulate before an utterance may start (8 = 240ms).
    pub min_speech_frames: usize,
    /// Consecutive silent frames that end an utterance (20 = 600ms).
    pub max_silence_frames: usize,
    /// Minimum audio duration from start to end of a valid utterance, in ms.
    pub min_speech_ms: u64,
    /// Utterances longer than this many frames are force-completed (30s at 30ms).
    pub max_utterance_frames: usize,
    /// Average RMS (i16 scale) an utterance's speech frames must exceed.
    pub min_rms_energy: f32,
    /// Drop the trailing silence frames from a completed utterance payload.
    pub trim_trailing_silence: bool,
    /// Frame classifier: "energy" or "webrtc".
    pub classifier: ClassifierKind,
    /// RMS threshold for the energy classifier.
    pub energy_threshold: f32,
    /// WebRTC VAD aggressiveness (0-3, where 3 is most aggressive).
    pub webrtc_mode: u8,
    /// Enable false-positive/missed-speech sensitivity adaptation.
    pub adaptive: bool,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_ms: 30,
            window_frames: 50,
            speech_threshold: 0.6,
            min_speech_frames: 8,
            max_silence_frames: 20,
            min_speech_ms: 300,
            max_utterance_frames: 1000,
            min_rms_energy: 100.0,
            trim_trailing_silence: true,
            classifier: ClassifierKind::Energy,
            energy_threshold: 300.0,
            webrtc_mode: 2,
            adaptive: false,
        }
    }
}

impl VadConfig {
    /// Samples in one frame (480 at 16kHz/30ms).
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }

    /// Bytes in one 16-bit mono frame (960 at 16kHz/30ms).
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * 2
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    Energy,
    Webrtc,
}

/// Sentence segmentation limits, in characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Buffer length that forces a unit out when no sentence boundary was seen.
    pub max_chars: usize,
    /// A soft boundary (`,` `;` `:`) is only used for a forced cut past this length.
    pub min_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            max_chars: 200,
            min_chars: 50,
        }
    }
}

/// Per-session turn-taking behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Turns retained in history; older turns are dropped.
    pub history_limit: usize,
    /// Allow the user to barge in while the assistant is speaking.
    pub allow_interruptions: bool,
    /// Inactivity window after which a keepalive ping is sent, in ms.
    pub keepalive_ms: u64,
    /// Greet the caller when the session starts.
    pub greeting_enabled: bool,
    /// Assistant name used in the greeting.
    pub assistant_name: String,
    /// Units synthesized concurrently ahead of delivery (1 = strictly sequential).
    pub synthesis_lookahead: usize,
    /// Consecutive downstream failures before an error event is surfaced.
    pub max_consecutive_failures: u32,
    /// Capacity of the outbound event channel.
    pub outbound_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: 10,
            allow_interruptions: true,
            keepalive_ms: 30_000,
            greeting_enabled: true,
            assistant_name: "AURA".to_string(),
            synthesis_lookahead: 2,
            max_consecutive_failures: 3,
            outbound_capacity: 64,
        }
    }
}

impl SessionConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }
}

/// Bounded timeouts for each external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub context_ms: u64,
    pub transcription_ms: u64,
    /// Time to first token, and between tokens, from the response generator.
    pub generation_ms: u64,
    pub synthesis_ms: u64,
    pub persistence_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            context_ms: 5_000,
            transcription_ms: 15_000,
            generation_ms: 20_000,
            synthesis_ms: 10_000,
            persistence_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn context(&self) -> Duration {
        Duration::from_millis(self.context_ms)
    }
    pub fn transcription(&self) -> Duration {
        Duration::from_millis(self.transcription_ms)
    }
    pub fn generation(&self) -> Duration {
        Duration::from_millis(self.generation_ms)
    }
    pub fn synthesis(&self) -> Duration {
        Duration::from_millis(self.synthesis_ms)
    }
    pub fn persistence(&self) -> Duration {
        Duration::from_millis(self.persistence_ms)
    }
}

impl VoiceConfig {
    /// Load config from file and environment. Precedence: env `AURA__*` > `AURA_CONFIG` path
    /// (or `config/voice.toml`) > defaults.
    pub fn load() -> VoiceResult<Self> {
        let config_path =
            std::env::var("AURA_CONFIG").unwrap_or_else(|_| "config/voice".to_string());
        let defaults = config::Config::try_from(&VoiceConfig::default())?;
        let builder = config::Config::builder().add_source(defaults);

        let path = Path::new(&config_path);
        let with_ext = path.with_extension("toml");
        let builder = if path.is_file() {
            builder.add_source(config::File::from(path))
        } else if with_ext.is_file() {
            builder.add_source(config::File::from(with_ext.as_path()))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("AURA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: VoiceConfig = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the detector or session cannot run with.
    pub fn validate(&self) -> VoiceResult<()> {
        let vad = &self.vad;
        if !matches!(vad.sample_rate, 8000 | 16000 | 32000 | 48000) {
            return Err(VoiceError::Config(format!(
                "sample_rate must be 8000, 16000, 32000 or 48000 Hz, got {}",
                vad.sample_rate
            )));
        }
        if !matches!(vad.frame_ms, 10 | 20 | 30) {
            return Err(VoiceError::Config(format!(
                "frame_ms must be 10, 20 or 30, got {}",
                vad.frame_ms
            )));
        }
        if !(0.0..=1.0).contains(&vad.speech_threshold) {
            return Err(VoiceError::Config(format!(
                "speech_threshold must be within 0..=1, got {}",
                vad.speech_threshold
            )));
        }
        if vad.window_frames == 0 || vad.max_silence_frames == 0 {
            return Err(VoiceError::Config(
                "window_frames and max_silence_frames must be non-zero".to_string(),
            ));
        }
        if vad.webrtc_mode > 3 {
            return Err(VoiceError::Config(format!(
                "webrtc_mode must be 0-3, got {}",
                vad.webrtc_mode
            )));
        }
        if self.segmenter.min_chars >= self.segmenter.max_chars {
            return Err(VoiceError::Config(format!(
                "segmenter.min_chars ({}) must be below max_chars ({})",
                self.segmenter.min_chars, self.segmenter.max_chars
            )));
        }
        if self.session.history_limit == 0 {
            return Err(VoiceError::Config("history_limit must be at least 1".to_string()));
        }
        if self.session.synthesis_lookahead == 0 || self.session.outbound_capacity == 0 {
            return Err(VoiceError::Config(
                "synthesis_lookahead and outbound_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_frame_geometry() {
        let c = VoiceConfig::default();
        assert_eq!(c.vad.frame_samples(), 480);
        assert_eq!(c.vad.frame_bytes(), 960);
        assert_eq!(c.session.history_limit, 10);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_unsupported_sample_rate() {
        let mut c = VoiceConfig::default();
        c.vad.sample_rate = 44100;
        assert!(matches!(c.validate(), Err(VoiceError::Config(_))));
    }

    #[test]
    fn rejects_inverted_segmenter_limits() {
        let mut c = VoiceConfig::default();
        c.segmenter.min_chars = 300;
        assert!(c.validate().is_err());
    }

    #[test]
    fn deserializes_partial_toml() {
        let raw = r#"
            [vad]
            speech_threshold = 0.7
            classifier = "webrtc"

            [session]
            history_limit = 4
        "#;
        let cfg: VoiceConfig = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert!((cfg.vad.speech_threshold - 0.7).abs() < 1e-6);
        assert_eq!(cfg.vad.classifier, ClassifierKind::Webrtc);
        assert_eq!(cfg.vad.min_speech_frames, 8);
        assert_eq!(cfg.session.history_limit, 4);
        assert!(cfg.session.allow_interruptions);
    }
}
