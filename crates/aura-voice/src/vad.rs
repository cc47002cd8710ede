//! Voice Activity Detection with ring-buffer smoothing.
//!
//! Each frame is classified speech/silence by a pluggable [`FrameClassifier`]
//! and the vote is pushed into a fixed window. An utterance starts once the
//! window's speech ratio reaches `speech_threshold` and enough speech frames
//! have accumulated; it ends after `max_silence_frames` consecutive silent
//! frames. Completed utterances pass a frame-count, duration and energy gate
//! before they are emitted; anything that fails is dropped as noise.
//!
//! Durations are measured in audio time (frames x frame duration).

use crate::audio::AudioFrame;
use crate::config::{ClassifierKind, VadConfig};
use crate::error::{VoiceError, VoiceResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Per-frame speech/silence decision.
pub trait FrameClassifier: Send {
    fn is_speech(&mut self, frame: &AudioFrame) -> VoiceResult<bool>;
}

/// Classifies a frame as speech when its RMS reaches a fixed threshold.
#[derive(Debug, Clone)]
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl FrameClassifier for EnergyClassifier {
    fn is_speech(&mut self, frame: &AudioFrame) -> VoiceResult<bool> {
        Ok(frame.rms() >= self.threshold)
    }
}

/// WebRTC VAD classifier (libfvad).
pub struct WebRtcClassifier {
    vad: Vad,
}

// SAFETY: the fvad handle is owned exclusively by this value and only touched
// through `&mut self`; it carries no thread affinity.
unsafe impl Send for WebRtcClassifier {}

impl WebRtcClassifier {
    pub fn new(sample_rate: u32, mode: u8) -> VoiceResult<Self> {
        let rate = match sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            other => {
                return Err(VoiceError::VadInit(format!(
                    "WebRTC VAD only supports 8000, 16000, 32000 or 48000 Hz, got {}",
                    other
                )))
            }
        };
        let mode = match mode {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => {
                return Err(VoiceError::VadInit(format!(
                    "VAD mode must be 0-3, got {}",
                    other
                )))
            }
        };
        Ok(Self {
            vad: Vad::new_with_rate_and_mode(rate, mode),
        })
    }
}

impl FrameClassifier for WebRtcClassifier {
    fn is_speech(&mut self, frame: &AudioFrame) -> VoiceResult<bool> {
        let samples = frame.samples();
        self.vad
            .is_voice_segment(&samples)
            .map_err(|_| VoiceError::VadProcessing("invalid frame length for WebRTC VAD".to_string()))
    }
}

/// Build the classifier named by the config.
pub fn classifier_from_config(config: &VadConfig) -> VoiceResult<Box<dyn FrameClassifier>> {
    match config.classifier {
        ClassifierKind::Energy => Ok(Box::new(EnergyClassifier::new(config.energy_threshold))),
        ClassifierKind::Webrtc => Ok(Box::new(WebRtcClassifier::new(
            config.sample_rate,
            config.webrtc_mode,
        )?)),
    }
}

/// A validated span of user speech, ready for transcription.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Concatenated 16-bit PCM frames.
    pub audio: Vec<u8>,
    pub frame_count: usize,
    /// Speech span, excluding trailing silence.
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub sample_rate: u32,
}

/// Result of feeding one frame to the detector.
#[derive(Debug, Clone)]
pub enum VadEvent {
    /// No utterance in progress (also returned for rejected frames).
    Silence,
    /// An utterance is in progress.
    SpeechContinuing,
    /// An utterance ended and passed validation.
    SpeechCompleted(Utterance),
}

/// Running counters for diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VadStats {
    pub total_frames: u64,
    pub speech_frames: u64,
    pub silence_frames: u64,
    pub rejected_frames: u64,
    pub classifier_errors: u64,
    pub speech_segments: u64,
    /// Candidates abandoned before start plus utterances that failed validation.
    pub false_starts: u64,
}

impl VadStats {
    pub fn speech_ratio(&self) -> f32 {
        let classified = self.speech_frames + self.silence_frames;
        if classified == 0 {
            return 0.0;
        }
        self.speech_frames as f32 / classified as f32
    }
}

/// Thresholds that sensitivity adaptation is allowed to move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sensitivity {
    pub speech_threshold: f32,
    pub min_speech_frames: usize,
}

#[derive(Debug, Clone)]
struct VotedFrame {
    frame: AudioFrame,
    speech: bool,
    rms: f32,
}

const ADAPT_WINDOW_FRAMES: u32 = 100;
const ADAPT_FALSE_POSITIVE_RATE: f32 = 0.1;
const ADAPT_MISSED_SPEECH_LIMIT: u32 = 3;
const SHORT_UTTERANCE: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct Adaptation {
    frames_observed: u32,
    false_positives: u32,
    missed_speech: u32,
}

/// Smoothed, gated voice activity detector. One instance per session.
pub struct VoiceActivityDetector {
    config: VadConfig,
    frame_bytes: usize,
    classifier: Box<dyn FrameClassifier>,
    sensitivity: Sensitivity,

    votes: VecDeque<bool>,
    voted_speech: usize,

    in_speech: bool,
    started_at: Option<DateTime<Utc>>,
    frames: VecDeque<VotedFrame>,
    speech_frames: usize,
    trailing_silence: usize,

    adaptation: Option<Adaptation>,
    stats: VadStats,
}

impl VoiceActivityDetector {
    /// Create a detector using the classifier named in `config`.
    pub fn new(config: VadConfig) -> VoiceResult<Self> {
        let classifier = classifier_from_config(&config)?;
        Ok(Self::with_classifier(config, classifier))
    }

    pub fn with_classifier(config: VadConfig, classifier: Box<dyn FrameClassifier>) -> Self {
        let frame_bytes = config.frame_bytes();
        debug!(
            sample_rate = config.sample_rate,
            frame_ms = config.frame_ms,
            frame_bytes,
            "VAD initialized"
        );
        let sensitivity = Sensitivity {
            speech_threshold: config.speech_threshold,
            min_speech_frames: config.min_speech_frames,
        };
        let adaptation = config.adaptive.then(Adaptation::default);
        Self {
            votes: VecDeque::with_capacity(config.window_frames),
            config,
            frame_bytes,
            classifier,
            sensitivity,
            voted_speech: 0,
            in_speech: false,
            started_at: None,
            frames: VecDeque::new(),
            speech_frames: 0,
            trailing_silence: 0,
            adaptation,
            stats: VadStats::default(),
        }
    }

    /// Feed one frame. Frames of the wrong size are counted and ignored.
    pub fn process_frame(&mut self, frame: &AudioFrame) -> VadEvent {
        self.stats.total_frames += 1;

        if frame.len_bytes() != self.frame_bytes {
            self.stats.rejected_frames += 1;
            debug!(
                got = frame.len_bytes(),
                expected = self.frame_bytes,
                "VAD: dropping frame of wrong size"
            );
            return VadEvent::Silence;
        }

        let speech = match self.classifier.is_speech(frame) {
            Ok(s) => s,
            Err(e) => {
                self.stats.classifier_errors += 1;
                warn!(error = %e, "VAD: classifier failed, treating frame as silence");
                false
            }
        };
        if speech {
            self.stats.speech_frames += 1;
        } else {
            self.stats.silence_frames += 1;
        }
        self.push_vote(speech);

        let voted = VotedFrame {
            rms: if speech { frame.rms() } else { 0.0 },
            frame: frame.clone(),
            speech,
        };
        let event = if self.in_speech {
            self.continue_utterance(voted)
        } else {
            self.track_candidate(voted)
        };

        self.observe_for_adaptation(&event);
        event
    }

    fn push_vote(&mut self, speech: bool) {
        if self.votes.len() == self.config.window_frames {
            if let Some(true) = self.votes.pop_front() {
                self.voted_speech -= 1;
            }
        }
        self.votes.push_back(speech);
        if speech {
            self.voted_speech += 1;
        }
    }

    /// Fraction of speech votes in the current window.
    pub fn speech_ratio(&self) -> f32 {
        if self.votes.is_empty() {
            return 0.0;
        }
        self.voted_speech as f32 / self.votes.len() as f32
    }

    fn track_candidate(&mut self, voted: VotedFrame) -> VadEvent {
        if voted.speech {
            if self.frames.is_empty() {
                self.started_at = Some(Utc::now());
            }
            self.speech_frames += 1;
            self.trailing_silence = 0;
            self.frames.push_back(voted);
        } else if !self.frames.is_empty() {
            self.trailing_silence += 1;
            self.frames.push_back(voted);
            if self.trailing_silence >= self.config.max_silence_frames {
                trace!(speech_frames = self.speech_frames, "VAD: candidate abandoned");
                self.stats.false_starts += 1;
                self.clear_utterance();
                return VadEvent::Silence;
            }
        }

        // Keep the candidate within the vote window.
        while self.frames.len() > self.config.window_frames {
            self.pop_candidate_front();
        }

        if self.speech_ratio() >= self.sensitivity.speech_threshold
            && self.speech_frames >= self.sensitivity.min_speech_frames
        {
            self.in_speech = true;
            debug!(
                speech_ratio = self.speech_ratio(),
                speech_frames = self.speech_frames,
                "VAD: speech started"
            );
            return VadEvent::SpeechContinuing;
        }
        VadEvent::Silence
    }

    fn pop_candidate_front(&mut self) {
        if let Some(old) = self.frames.pop_front() {
            if old.speech {
                self.speech_frames -= 1;
            }
        }
        while matches!(self.frames.front(), Some(f) if !f.speech) {
            self.frames.pop_front();
        }
        if self.frames.is_empty() {
            self.trailing_silence = 0;
            self.started_at = None;
        }
    }

    fn continue_utterance(&mut self, voted: VotedFrame) -> VadEvent {
        if voted.speech {
            self.speech_frames += 1;
            self.trailing_silence = 0;
        } else {
            self.trailing_silence += 1;
        }
        self.frames.push_back(voted);

        if self.trailing_silence >= self.config.max_silence_frames {
            return self.finish_utterance();
        }
        if self.frames.len() >= self.config.max_utterance_frames {
            info!(frames = self.frames.len(), "VAD: max utterance length reached, completing");
            return self.finish_utterance();
        }
        VadEvent::SpeechContinuing
    }

    fn finish_utterance(&mut self) -> VadEvent {
        let span_frames = self.frames.len().saturating_sub(self.trailing_silence);
        let span = self.config.frame_duration() * span_frames as u32;

        if let Err(reason) = self.validate(span) {
            debug!(reason, frames = self.frames.len(), "VAD: utterance rejected as noise");
            self.stats.false_starts += 1;
            self.reset();
            return VadEvent::Silence;
        }

        let keep = if self.config.trim_trailing_silence {
            span_frames
        } else {
            self.frames.len()
        };
        let mut audio = Vec::with_capacity(keep * self.frame_bytes);
        for voted in self.frames.iter().take(keep) {
            audio.extend_from_slice(voted.frame.as_bytes());
        }
        let utterance = Utterance {
            audio,
            frame_count: keep,
            duration: span,
            started_at: self.started_at.unwrap_or_else(Utc::now),
            sample_rate: self.config.sample_rate,
        };

        self.stats.speech_segments += 1;
        debug!(
            duration_ms = span.as_millis() as u64,
            bytes = utterance.audio.len(),
            "VAD: speech completed"
        );
        self.reset();
        VadEvent::SpeechCompleted(utterance)
    }

    fn validate(&self, span: Duration) -> Result<(), &'static str> {
        if self.speech_frames < self.sensitivity.min_speech_frames {
            return Err("too few speech frames");
        }
        if span < Duration::from_millis(self.config.min_speech_ms) {
            return Err("too short");
        }
        if !self.has_sufficient_energy() {
            return Err("insufficient energy");
        }
        Ok(())
    }

    /// Sample about five speech frames and compare their mean RMS to the floor.
    fn has_sufficient_energy(&self) -> bool {
        let energies: Vec<f32> = self
            .frames
            .iter()
            .filter(|f| f.speech)
            .map(|f| f.rms)
            .collect();
        if energies.is_empty() {
            return false;
        }
        let stride = (energies.len() / 5).max(1);
        let sampled: Vec<f32> = energies.iter().step_by(stride).copied().collect();
        let mean = sampled.iter().sum::<f32>() / sampled.len() as f32;
        mean > self.config.min_rms_energy
    }

    fn clear_utterance(&mut self) {
        self.in_speech = false;
        self.started_at = None;
        self.frames.clear();
        self.speech_frames = 0;
        self.trailing_silence = 0;
    }

    /// Clear the vote window and any utterance in progress.
    pub fn reset(&mut self) {
        self.votes.clear();
        self.voted_speech = 0;
        self.clear_utterance();
    }

    /// Clear the vote window and the in-speech flag, keeping the frames of the
    /// utterance in progress. Called on barge-in.
    pub fn reset_window(&mut self) {
        self.votes.clear();
        self.voted_speech = 0;
        self.in_speech = false;
    }

    pub fn is_in_speech(&self) -> bool {
        self.in_speech
    }

    pub fn stats(&self) -> &VadStats {
        &self.stats
    }

    pub fn sensitivity(&self) -> Sensitivity {
        self.sensitivity
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Nudge thresholds toward detecting more speech (`true`) or fewer false positives.
    pub fn adjust_sensitivity(&mut self, more_sensitive: bool) {
        let s = &mut self.sensitivity;
        if more_sensitive {
            s.speech_threshold = (s.speech_threshold - 0.1).max(0.3);
            s.min_speech_frames = s.min_speech_frames.saturating_sub(2).max(5);
        } else {
            s.speech_threshold = (s.speech_threshold + 0.1).min(0.8);
            s.min_speech_frames = (s.min_speech_frames + 2).min(15);
        }
        info!(
            speech_threshold = s.speech_threshold,
            min_speech_frames = s.min_speech_frames,
            "VAD sensitivity adjusted"
        );
    }

    /// Report speech the detector failed to pick up. Only used in adaptive mode.
    pub fn report_missed_speech(&mut self) {
        let Some(adapt) = self.adaptation.as_mut() else {
            return;
        };
        adapt.missed_speech += 1;
        if adapt.missed_speech > ADAPT_MISSED_SPEECH_LIMIT {
            adapt.missed_speech = 0;
            info!("VAD: increasing sensitivity after missed speech");
            self.adjust_sensitivity(true);
        }
    }

    /// Report an utterance that turned out not to be speech. Only used in adaptive mode.
    pub fn report_false_positive(&mut self) {
        if let Some(adapt) = self.adaptation.as_mut() {
            adapt.false_positives += 1;
        }
    }

    fn observe_for_adaptation(&mut self, event: &VadEvent) {
        let Some(adapt) = self.adaptation.as_mut() else {
            return;
        };
        adapt.frames_observed += 1;
        if let VadEvent::SpeechCompleted(u) = event {
            if u.duration < SHORT_UTTERANCE {
                adapt.false_positives += 1;
            }
        }
        if adapt.frames_observed >= ADAPT_WINDOW_FRAMES {
            let rate = adapt.false_positives as f32 / adapt.frames_observed as f32;
            adapt.frames_observed = 0;
            if rate > ADAPT_FALSE_POSITIVE_RATE {
                adapt.false_positives = 0;
                info!(rate, "VAD: reducing sensitivity due to false positives");
                self.adjust_sensitivity(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOUD: i16 = 3000;

    fn config() -> VadConfig {
        VadConfig::default()
    }

    fn speech() -> AudioFrame {
        AudioFrame::from_samples(&[LOUD; 480])
    }

    fn silence() -> AudioFrame {
        AudioFrame::from_samples(&[0; 480])
    }

    fn detector() -> VoiceActivityDetector {
        VoiceActivityDetector::new(config()).unwrap()
    }

    /// Feed silence/speech/silence and collect the completed utterances.
    fn run(det: &mut VoiceActivityDetector, lead: usize, talk: usize, tail: usize) -> Vec<Utterance> {
        let mut out = Vec::new();
        let frames = std::iter::repeat(silence())
            .take(lead)
            .chain(std::iter::repeat(speech()).take(talk))
            .chain(std::iter::repeat(silence()).take(tail));
        for f in frames {
            if let VadEvent::SpeechCompleted(u) = det.process_frame(&f) {
                out.push(u);
            }
        }
        out
    }

    #[test]
    fn wrong_size_frame_is_ignored() {
        let mut det = detector();
        let short = AudioFrame::from_bytes(vec![0u8; 100]);
        assert!(matches!(det.process_frame(&short), VadEvent::Silence));
        assert_eq!(det.stats().rejected_frames, 1);
        assert_eq!(det.speech_ratio(), 0.0);
    }

    #[test]
    fn single_utterance_is_completed_and_state_cleared() {
        let mut det = detector();
        let first = run(&mut det, 10, 40, 25);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].frame_count, 40);
        assert_eq!(first[0].audio.len(), 40 * 960);
        assert_eq!(first[0].duration, Duration::from_millis(1200));
        assert!(!det.is_in_speech());
        assert_eq!(det.speech_ratio(), 0.0);

        let second = run(&mut det, 10, 40, 25);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].audio, first[0].audio);
        assert_eq!(det.stats().speech_segments, 2);
    }

    #[test]
    fn end_follows_silence_count_not_window_ratio() {
        let mut det = detector();
        assert!(run(&mut det, 0, 40, 0).is_empty());
        for n in 1..=20 {
            let event = det.process_frame(&silence());
            if n < 20 {
                assert!(!matches!(event, VadEvent::SpeechCompleted(_)), "ended after {} frames", n);
            } else {
                assert!(matches!(event, VadEvent::SpeechCompleted(_)));
            }
        }
    }

    #[test]
    fn window_reset_keeps_utterance_frames() {
        let mut det = detector();
        for _ in 0..8 {
            det.process_frame(&speech());
        }
        assert!(det.is_in_speech());

        det.reset_window();
        assert!(!det.is_in_speech());
        assert_eq!(det.speech_ratio(), 0.0);

        // The rest of the same utterance, then the pause that ends it.
        let out = run(&mut det, 0, 32, 25);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].frame_count, 40);
    }

    #[test]
    fn too_few_speech_frames_is_rejected() {
        let mut det = detector();
        let out = run(&mut det, 10, 5, 25);
        assert!(out.is_empty());
        assert!(!det.is_in_speech());
    }

    #[test]
    fn quiet_utterance_fails_energy_gate() {
        let mut cfg = config();
        cfg.energy_threshold = 50.0;
        cfg.min_rms_energy = 100.0;
        let mut det = VoiceActivityDetector::new(cfg).unwrap();
        let quiet = AudioFrame::from_samples(&[80; 480]);
        let mut completed = 0;
        for _ in 0..40 {
            if let VadEvent::SpeechCompleted(_) = det.process_frame(&quiet) {
                completed += 1;
            }
        }
        for _ in 0..25 {
            if let VadEvent::SpeechCompleted(_) = det.process_frame(&silence()) {
                completed += 1;
            }
        }
        assert_eq!(completed, 0);
        assert_eq!(det.stats().false_starts, 1);
    }

    #[test]
    fn untrimmed_payload_keeps_trailing_silence() {
        let mut cfg = config();
        cfg.trim_trailing_silence = false;
        let mut det = VoiceActivityDetector::new(cfg).unwrap();
        let out = run(&mut det, 0, 20, 20);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].frame_count, 40);
    }

    #[test]
    fn long_utterance_is_force_completed() {
        let mut cfg = config();
        cfg.max_utterance_frames = 60;
        let mut det = VoiceActivityDetector::new(cfg).unwrap();
        let out = run(&mut det, 0, 70, 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].frame_count, 60);
    }

    struct Failing;

    impl FrameClassifier for Failing {
        fn is_speech(&mut self, _frame: &AudioFrame) -> VoiceResult<bool> {
            Err(VoiceError::VadProcessing("boom".to_string()))
        }
    }

    #[test]
    fn classifier_errors_count_as_silence() {
        let mut det = VoiceActivityDetector::with_classifier(config(), Box::new(Failing));
        for _ in 0..30 {
            assert!(matches!(det.process_frame(&speech()), VadEvent::Silence));
        }
        assert_eq!(det.stats().classifier_errors, 30);
        assert_eq!(det.stats().silence_frames, 30);
    }

    #[test]
    fn sensitivity_is_clamped() {
        let mut det = detector();
        for _ in 0..10 {
            det.adjust_sensitivity(false);
        }
        assert!((det.sensitivity().speech_threshold - 0.8).abs() < 1e-6);
        assert_eq!(det.sensitivity().min_speech_frames, 15);
        for _ in 0..10 {
            det.adjust_sensitivity(true);
        }
        assert!((det.sensitivity().speech_threshold - 0.3).abs() < 1e-6);
        assert_eq!(det.sensitivity().min_speech_frames, 5);
    }

    #[test]
    fn missed_speech_reports_raise_sensitivity() {
        let mut cfg = config();
        cfg.adaptive = true;
        let mut det = VoiceActivityDetector::new(cfg).unwrap();
        for _ in 0..4 {
            det.report_missed_speech();
        }
        assert!((det.sensitivity().speech_threshold - 0.5).abs() < 1e-6);
    }

    #[test]
    fn webrtc_classifier_rejects_bad_mode() {
        assert!(WebRtcClassifier::new(16000, 7).is_err());
        assert!(WebRtcClassifier::new(44100, 2).is_err());
    }

    #[test]
    fn webrtc_classifier_hears_silence() {
        let mut c = WebRtcClassifier::new(16000, 3).unwrap();
        assert!(!c.is_speech(&silence()).unwrap());
    }
}
