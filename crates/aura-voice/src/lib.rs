//! # AURA Voice - continuous voice conversation core
//!
//! Voice activity detection, turn-taking, sentence-streamed responses and
//! barge-in for live calls. Transcription, generation, synthesis, context and
//! persistence are collaborators behind traits; the transport is a pair of
//! channels.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Voice Orchestrator                        │
//! │  ┌────────────┐  ┌────────────┐  ┌─────┐  ┌──────────────────┐   │
//! │  │ Receive    │→ │ TurnBuffer │→ │ VAD │→ │ Transcriber      │   │
//! │  │ loop       │  └────────────┘  └─────┘  └──────────────────┘   │
//! │  └────────────┘                     │ barge-in        ↓          │
//! │        ↑                            ↓           ┌───────────┐    │
//! │   inbound                     ┌───────────┐     │ Generator │    │
//! │                               │ Interrupt │     └───────────┘    │
//! │   outbound ←── audio ←── Synthesizer ←── Segmenter ←──┘          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod registry;
pub mod segmenter;
pub mod session;
pub mod stt;
pub mod transport;
pub mod turn;
pub mod vad;
pub mod voice_output;
pub mod worker;

pub use audio::{AudioFrame, FrameAssembler};
pub use config::{
    ClassifierKind, SegmenterConfig, SessionConfig, TimeoutConfig, VadConfig, VoiceConfig,
};
pub use context::{
    Collaborators, ContextProvider, InMemorySessionStore, SessionStore, StaticContextProvider,
    TurnObserver, TurnRecord,
};
pub use error::{VoiceError, VoiceResult};
pub use llm::{EchoGenerator, ResponseGenerator, ResponseRequest, TokenStream};
pub use orchestrator::{SessionParams, VoiceOrchestrator};
pub use registry::{RegistrationGuard, SessionRegistry};
pub use segmenter::{Boundary, SentenceSegmenter, SpeakableUnit};
pub use session::{ConversationSession, Role, SessionInfo, SessionState, SessionSummary, Turn};
pub use stt::{PlaceholderStt, ScriptedStt, Transcriber, TranscriptOutcome};
pub use transport::{ControlMessage, InboundMessage, OutboundEvent};
pub use turn::TurnBuffer;
pub use vad::{
    EnergyClassifier, FrameClassifier, Utterance, VadEvent, VadStats, VoiceActivityDetector,
    WebRtcClassifier,
};
pub use voice_output::{AudioFragment, PlaceholderTts, SpeechSynthesizer, SynthesisOutcome};
pub use worker::BackgroundWorker;
