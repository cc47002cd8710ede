//! Voice Orchestrator - the turn-taking loop for one call.
//!
//! Each session runs two cooperating loops joined on one task:
//!
//! ```text
//!  inbound ──► receive loop ──► TurnBuffer ──► process loop ──► VAD
//!                 │  (pong,                       │
//!                 │   end_call)                   ├─► transcribe ─► response task
//!                 ▼                               │                   │ tokens ─► segmenter
//!              outbound ◄──────────────────────────┴───────────────────┘ units ─► synthesis (ordered)
//! ```
//!
//! The response task runs on its own tokio task so the process loop keeps
//! feeding the VAD while the assistant speaks. Every outbound delivery from the
//! response task and the interruption itself go through the same speaking
//! gate, so once `interrupted` is sent no later unit audio can follow it.

use crate::audio::FrameAssembler;
use crate::config::VoiceConfig;
use crate::context::{Collaborators, TurnRecord};
use crate::error::{VoiceError, VoiceResult};
use crate::llm::ResponseRequest;
use crate::registry::SessionRegistry;
use crate::segmenter::{SentenceSegmenter, SpeakableUnit};
use crate::session::{ConversationSession, SessionState, SessionSummary, Turn};
use crate::stt::TranscriptOutcome;
use crate::transport::{ControlMessage, InboundMessage, OutboundEvent};
use crate::turn::TurnBuffer;
use crate::vad::{Utterance, VadEvent, VoiceActivityDetector};
use crate::voice_output::SynthesisOutcome;
use crate::worker::BackgroundWorker;
use futures::future::BoxFuture;
use futures::stream::{FuturesOrdered, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

const CONTROL_CHANNEL_CAPACITY: usize = 16;
const WORKER_QUEUE_CAPACITY: usize = 32;

/// `true` while the assistant's response may still reach the caller.
type SpeakingGate = Arc<Mutex<bool>>;

/// Who is calling.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub user_id: String,
    pub tenant_id: Option<String>,
}

impl SessionParams {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

/// Runs conversation sessions against a fixed set of collaborators.
#[derive(Clone)]
pub struct VoiceOrchestrator {
    config: Arc<VoiceConfig>,
    collaborators: Collaborators,
    registry: SessionRegistry,
}

impl VoiceOrchestrator {
    pub fn new(config: VoiceConfig, collaborators: Collaborators, registry: SessionRegistry) -> Self {
        Self {
            config: Arc::new(config),
            collaborators,
            registry,
        }
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Drive one call until the caller ends it or the transport goes away.
    ///
    /// Returns the summary that was handed to the session store. Errors only
    /// when the session could not be set up (for example a bad VAD config);
    /// downstream failures during the call never end it.
    pub async fn run_session(
        &self,
        params: SessionParams,
        inbound: mpsc::Receiver<InboundMessage>,
        outbound: mpsc::Sender<OutboundEvent>,
    ) -> VoiceResult<SessionSummary> {
        let vad = VoiceActivityDetector::new(self.config.vad.clone())?;
        let mut session = ConversationSession::new(
            params.user_id,
            params.tenant_id,
            self.config.session.history_limit,
        );
        let span = info_span!("session", session_id = %session.id());
        let _registration = self.registry.register(session.info());
        info!(
            parent: &span,
            user_id = %session.user_id(),
            tenant_id = ?session.tenant_id(),
            "Session started"
        );

        let loaded = AssertUnwindSafe(self.load_context(&mut session))
            .catch_unwind()
            .instrument(span.clone())
            .await;
        if let Err(panic) = loaded {
            error!(
                parent: &span,
                panic = %panic_message(&*panic),
                "Context provider panicked, continuing without context"
            );
        }

        let buffer = Arc::new(TurnBuffer::new());
        let closed = CancellationToken::new();
        let shutdown = closed.clone();
        let activity = Arc::new(ActivityClock::new());
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);

        let receiver = ReceiveLoop {
            inbound,
            buffer: Arc::clone(&buffer),
            control_tx,
            outbound: outbound.clone(),
            closed: closed.clone(),
            activity: Arc::clone(&activity),
        };
        let worker = self
            .collaborators
            .turn_observer
            .clone()
            .map(|observer| BackgroundWorker::spawn(observer, WORKER_QUEUE_CAPACITY));
        let processor = TurnLoop {
            config: Arc::clone(&self.config),
            collaborators: self.collaborators.clone(),
            session: &mut session,
            vad,
            assembler: FrameAssembler::new(self.config.vad.frame_bytes()),
            buffer,
            control_rx,
            outbound,
            closed,
            activity,
            speaking: Arc::new(Mutex::new(false)),
            response: None,
            pending: VecDeque::new(),
            failures: 0,
            worker,
        };

        let loops = async {
            tokio::join!(receiver.run(), processor.run());
        };
        let finished = AssertUnwindSafe(loops)
            .catch_unwind()
            .instrument(span.clone())
            .await;
        if let Err(panic) = finished {
            error!(
                parent: &span,
                panic = %panic_message(&*panic),
                "Session loop panicked, closing"
            );
        }
        // Stops a response task orphaned by a panicked loop.
        shutdown.cancel();

        session.set_state(SessionState::Closed);
        let summary = session.summary();
        info!(
            parent: &span,
            turns = summary.turn_count,
            interruptions = summary.interruptions,
            duration_secs = summary.duration_secs,
            "Session closed"
        );
        self.save_summary(&summary).instrument(span).await;
        Ok(summary)
    }

    async fn load_context(&self, session: &mut ConversationSession) {
        let Some(provider) = &self.collaborators.context_provider else {
            return;
        };
        let key = session.context_key().to_string();
        let limit = self.config.timeouts.context();
        match timeout(limit, provider.get_context(&key)).await {
            Ok(Ok(context)) => session.set_context(context),
            Ok(Err(e)) => warn!(error = %e, "Context lookup failed, continuing without context"),
            Err(_) => warn!(
                error = %VoiceError::timeout("context lookup", limit),
                "Context lookup failed, continuing without context"
            ),
        }
    }

    async fn save_summary(&self, summary: &SessionSummary) {
        let Some(store) = &self.collaborators.session_store else {
            return;
        };
        let limit = self.config.timeouts.persistence();
        match timeout(limit, store.save_summary(summary.clone())).await {
            Ok(Ok(())) => debug!("Session summary saved"),
            Ok(Err(e)) => warn!(error = %e, "Failed to save session summary"),
            Err(_) => warn!(
                error = %VoiceError::timeout("save summary", limit),
                "Failed to save session summary"
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Last time anything happened on the session.
#[derive(Debug)]
struct ActivityClock {
    last: std::sync::Mutex<Instant>,
}

impl ActivityClock {
    fn new() -> Self {
        Self {
            last: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    fn last(&self) -> Instant {
        *self.last.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Pulls inbound messages: audio into the turn buffer, typed text to the
/// process loop, pings answered directly.
struct ReceiveLoop {
    inbound: mpsc::Receiver<InboundMessage>,
    buffer: Arc<TurnBuffer>,
    control_tx: mpsc::Sender<String>,
    outbound: mpsc::Sender<OutboundEvent>,
    closed: CancellationToken,
    activity: Arc<ActivityClock>,
}

impl ReceiveLoop {
    async fn run(mut self) {
        loop {
            let message = tokio::select! {
                _ = self.closed.cancelled() => break,
                message = self.inbound.recv() => message,
            };
            let Some(message) = message else {
                info!("Transport disconnected");
                self.closed.cancel();
                break;
            };
            self.activity.touch();
            match message {
                InboundMessage::Audio(bytes) => self.buffer.append(&bytes),
                InboundMessage::Text(raw) => {
                    if !self.handle_control(&raw).await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns false when the loop should stop.
    async fn handle_control(&mut self, raw: &str) -> bool {
        match ControlMessage::parse(raw) {
            Ok(ControlMessage::EndCall) => {
                info!("Caller ended the call");
                self.closed.cancel();
                false
            }
            Ok(ControlMessage::Ping) => {
                if self.outbound.send(OutboundEvent::pong()).await.is_err() {
                    self.closed.cancel();
                    return false;
                }
                true
            }
            Ok(ControlMessage::Text { text }) => {
                if self.control_tx.send(text).await.is_err() {
                    self.closed.cancel();
                    return false;
                }
                true
            }
            Ok(ControlMessage::AudioChunk { audio }) => {
                match ControlMessage::decode_audio(&audio) {
                    Ok(bytes) => self.buffer.append(&bytes),
                    Err(e) => warn!(error = %e, "Dropping audio_chunk"),
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed control message");
                true
            }
        }
    }
}

/// Input that arrived while a response was still running.
#[derive(Debug)]
enum PendingInput {
    Utterance(Utterance),
    Text(String),
}

struct ActiveResponse {
    prompt: String,
    cancel: CancellationToken,
    handle: JoinHandle<ResponseOutcome>,
}

/// How a response task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ResponseOutcome {
    /// Fully delivered. `error` is set when generation broke off mid-stream
    /// and only the text received so far was spoken.
    Completed { text: String, error: Option<String> },
    Interrupted,
    Failed(String),
}

/// The process loop. Owns the VAD and the session history.
struct TurnLoop<'a> {
    config: Arc<VoiceConfig>,
    collaborators: Collaborators,
    session: &'a mut ConversationSession,
    vad: VoiceActivityDetector,
    assembler: FrameAssembler,
    buffer: Arc<TurnBuffer>,
    control_rx: mpsc::Receiver<String>,
    outbound: mpsc::Sender<OutboundEvent>,
    closed: CancellationToken,
    activity: Arc<ActivityClock>,
    speaking: SpeakingGate,
    response: Option<ActiveResponse>,
    pending: VecDeque<PendingInput>,
    failures: u32,
    worker: Option<BackgroundWorker>,
}

async fn response_finished(
    response: &mut Option<ActiveResponse>,
) -> Result<ResponseOutcome, JoinError> {
    match response {
        Some(active) => (&mut active.handle).await,
        None => std::future::pending().await,
    }
}

impl<'a> TurnLoop<'a> {
    async fn run(mut self) {
        self.greet().await;
        self.session.set_state(SessionState::Listening);
        let keepalive = self.config.session.keepalive();

        loop {
            let idle_deadline = self.activity.last() + keepalive;
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => break,
                outcome = response_finished(&mut self.response) => {
                    self.finish_response(outcome).await;
                }
                _ = self.buffer.notified() => self.drain_audio().await,
                Some(text) = self.control_rx.recv() => self.on_text(text).await,
                _ = tokio::time::sleep_until(idle_deadline) => self.keepalive().await,
            }
        }

        let unprocessed = self.buffer.len() + self.assembler.pending();
        if unprocessed > 0 {
            debug!(bytes = unprocessed, "Dropping unprocessed audio at close");
        }

        // A response that already finished delivering still counts.
        if let Some(active) = self.response.take() {
            if active.handle.is_finished() {
                if let Ok(ResponseOutcome::Completed { text, .. }) = active.handle.await {
                    self.record_assistant_turn(active.prompt, text);
                }
            } else {
                active.cancel.cancel();
                active.handle.abort();
            }
        }
    }

    async fn greet(&mut self) {
        if !self.config.session.greeting_enabled {
            return;
        }
        let text = self.session.greeting(&self.config.session.assistant_name);
        let limit = self.config.timeouts.synthesis();
        let audio = match timeout(limit, self.collaborators.synthesizer.synthesize(&text)).await {
            Ok(SynthesisOutcome::Audio(fragment)) => fragment.bytes,
            Ok(SynthesisOutcome::Empty) => Vec::new(),
            Ok(SynthesisOutcome::Failed(reason)) => {
                warn!(reason = %reason, "Greeting synthesis failed, sending text only");
                Vec::new()
            }
            Err(_) => {
                warn!("Greeting synthesis timed out, sending text only");
                Vec::new()
            }
        };
        if self
            .emit(OutboundEvent::Greeting {
                text: text.clone(),
                audio,
            })
            .await
        {
            self.session.push_turn(Turn::assistant(text));
        }
    }

    /// Send an event; a closed outbound channel ends the session.
    async fn emit(&mut self, event: OutboundEvent) -> bool {
        if self.outbound.send(event).await.is_err() {
            debug!("Outbound channel closed");
            self.closed.cancel();
            return false;
        }
        true
    }

    async fn keepalive(&mut self) {
        if self.activity.last().elapsed() >= self.config.session.keepalive() {
            debug!("Idle, sending keepalive ping");
            self.emit(OutboundEvent::ping()).await;
            self.activity.touch();
        }
    }

    async fn drain_audio(&mut self) {
        let bytes = self.buffer.drain();
        if bytes.is_empty() {
            return;
        }
        for frame in self.assembler.push(&bytes) {
            match self.vad.process_frame(&frame) {
                VadEvent::Silence => {}
                VadEvent::SpeechContinuing => {
                    if self.config.session.allow_interruptions && self.response.is_some() {
                        self.interrupt().await;
                    }
                }
                VadEvent::SpeechCompleted(utterance) => {
                    self.activity.touch();
                    if self.response.is_some() {
                        debug!("Utterance completed while responding, queued");
                        self.pending.push_back(PendingInput::Utterance(utterance));
                    } else {
                        self.on_utterance(utterance).await;
                    }
                }
            }
            if self.closed.is_cancelled() {
                return;
            }
        }
    }

    async fn interrupt(&mut self) {
        let Some(active) = &self.response else {
            return;
        };
        let mut speaking = self.speaking.lock().await;
        if !*speaking {
            return;
        }
        *speaking = false;
        active.cancel.cancel();
        info!("User interrupted the assistant");
        if self.outbound.send(OutboundEvent::interrupted()).await.is_err() {
            self.closed.cancel();
        }
        drop(speaking);
        self.session.record_interruption();
        self.vad.reset_window();
    }

    async fn on_text(&mut self, text: String) {
        self.activity.touch();
        if self.response.is_some() {
            if self.config.session.allow_interruptions {
                self.interrupt().await;
            }
            self.pending.push_back(PendingInput::Text(text));
            return;
        }
        self.accept_user_text(text).await;
    }

    async fn on_utterance(&mut self, utterance: Utterance) {
        self.session.set_state(SessionState::Transcribing);
        let limit = self.config.timeouts.transcription();
        debug!(
            duration_ms = utterance.duration.as_millis() as u64,
            bytes = utterance.audio.len(),
            "Transcribing utterance"
        );
        let outcome = tokio::select! {
            _ = self.closed.cancelled() => return,
            r = timeout(limit, self.collaborators.transcriber.transcribe(&utterance)) => r,
        };
        match outcome {
            Ok(TranscriptOutcome::Text(text)) if !text.trim().is_empty() => {
                self.accept_user_text(text).await;
            }
            Ok(TranscriptOutcome::Text(_)) | Ok(TranscriptOutcome::Empty) => {
                debug!("Empty transcript, back to listening");
                self.vad.report_false_positive();
                self.session.set_state(SessionState::Listening);
            }
            Ok(TranscriptOutcome::Failed(reason)) => {
                warn!(reason = %reason, "Transcription failed, dropping utterance");
                self.record_failure().await;
                self.session.set_state(SessionState::Listening);
            }
            Err(_) => {
                warn!(
                    error = %VoiceError::timeout("transcription", limit),
                    "Transcription failed, dropping utterance"
                );
                self.record_failure().await;
                self.session.set_state(SessionState::Listening);
            }
        }
    }

    async fn accept_user_text(&mut self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            self.session.set_state(SessionState::Listening);
            return;
        }
        info!(chars = text.len(), "User turn");
        if !self
            .emit(OutboundEvent::UserTranscript { text: text.clone() })
            .await
        {
            return;
        }
        let history = self.session.history_vec();
        self.session.push_turn(Turn::user(text.clone()));
        self.start_response(ResponseRequest {
            prompt: text,
            history,
            context: self.session.context().clone(),
        })
        .await;
    }

    async fn start_response(&mut self, request: ResponseRequest) {
        *self.speaking.lock().await = true;
        let cancel = self.closed.child_token();
        let task = ResponseTask {
            collaborators: self.collaborators.clone(),
            config: Arc::clone(&self.config),
            outbound: self.outbound.clone(),
            speaking: Arc::clone(&self.speaking),
            cancel: cancel.clone(),
            activity: Arc::clone(&self.activity),
        };
        let prompt = request.prompt.clone();
        let handle = tokio::spawn(task.run(request).in_current_span());
        self.response = Some(ActiveResponse {
            prompt,
            cancel,
            handle,
        });
        self.session.set_state(SessionState::Responding);
    }

    async fn finish_response(&mut self, outcome: Result<ResponseOutcome, JoinError>) {
        let Some(active) = self.response.take() else {
            return;
        };
        *self.speaking.lock().await = false;
        self.session.set_state(SessionState::Listening);

        match outcome {
            Ok(ResponseOutcome::Completed { text, error }) => {
                self.record_assistant_turn(active.prompt, text);
                match error {
                    Some(reason) => {
                        warn!(reason = %reason, "Response ended early");
                        self.record_failure().await;
                    }
                    None => self.failures = 0,
                }
            }
            Ok(ResponseOutcome::Interrupted) => {
                info!("Interrupted response discarded from history");
            }
            Ok(ResponseOutcome::Failed(reason)) => {
                warn!(reason = %reason, "Response failed");
                self.record_failure().await;
            }
            Err(e) => {
                error!(error = %e, "Response task panicked");
                self.record_failure().await;
            }
        }

        while self.response.is_none() && !self.closed.is_cancelled() {
            match self.pending.pop_front() {
                Some(PendingInput::Utterance(u)) => self.on_utterance(u).await,
                Some(PendingInput::Text(t)) => self.accept_user_text(t).await,
                None => break,
            }
        }
    }

    fn record_assistant_turn(&mut self, prompt: String, text: String) {
        if text.trim().is_empty() {
            return;
        }
        self.session.push_turn(Turn::assistant(text.clone()));
        self.notify_observer(prompt, text);
    }

    fn notify_observer(&self, user_text: String, assistant_text: String) {
        if let Some(worker) = &self.worker {
            worker.submit(TurnRecord {
                session_id: self.session.id().to_string(),
                user_id: self.session.user_id().to_string(),
                user_text,
                assistant_text,
            });
        }
    }

    /// Count a failed turn. Enough in a row surfaces an error event; the
    /// session keeps running either way.
    async fn record_failure(&mut self) {
        self.failures += 1;
        let limit = self.config.session.max_consecutive_failures;
        if limit > 0 && self.failures >= limit {
            warn!(failures = self.failures, "Repeated downstream failures");
            self.failures = 0;
            self.emit(OutboundEvent::Error {
                message: "I'm having trouble right now. Please try again in a moment.".to_string(),
            })
            .await;
        }
    }
}

/// Streams one response: tokens through the segmenter, units through
/// synthesis with bounded lookahead, audio out in unit order.
struct ResponseTask {
    collaborators: Collaborators,
    config: Arc<VoiceConfig>,
    outbound: mpsc::Sender<OutboundEvent>,
    speaking: SpeakingGate,
    cancel: CancellationToken,
    activity: Arc<ActivityClock>,
}

type Synthesis = BoxFuture<'static, (SpeakableUnit, SynthesisOutcome)>;

impl ResponseTask {
    async fn run(self, request: ResponseRequest) -> ResponseOutcome {
        let limit = self.config.timeouts.generation();
        let generate = self.collaborators.generator.generate(request);
        let mut tokens = tokio::select! {
            _ = self.cancel.cancelled() => return ResponseOutcome::Interrupted,
            r = timeout(limit, generate) => match r {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return ResponseOutcome::Failed(e.to_string()),
                Err(_) => {
                    return ResponseOutcome::Failed(
                        VoiceError::timeout("generation", limit).to_string(),
                    )
                }
            },
        };

        let lookahead = self.config.session.synthesis_lookahead.max(1);
        let mut segmenter = SentenceSegmenter::new(self.config.segmenter.clone());
        let mut waiting: VecDeque<SpeakableUnit> = VecDeque::new();
        let mut in_flight: FuturesOrdered<Synthesis> = FuturesOrdered::new();
        let mut full_text = String::new();
        let mut stream_done = false;
        let mut error = None;

        loop {
            while in_flight.len() < lookahead {
                match waiting.pop_front() {
                    Some(unit) => in_flight.push_back(self.synthesize(unit)),
                    None => break,
                }
            }
            if stream_done && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(
                        unsent_units = waiting.len() + in_flight.len(),
                        buffered_chars = segmenter.pending().len(),
                        "Response cancelled, dropping unsent text"
                    );
                    return ResponseOutcome::Interrupted;
                }
                Some((unit, outcome)) = in_flight.next(), if !in_flight.is_empty() => {
                    if !self.deliver_unit(unit, outcome).await {
                        return ResponseOutcome::Interrupted;
                    }
                }
                next = timeout(limit, tokens.next()), if !stream_done => {
                    match next {
                        Ok(Some(Ok(token))) => {
                            if token.is_empty() {
                                continue;
                            }
                            full_text.push_str(&token);
                            let partial = OutboundEvent::PartialResponse { text: token.clone() };
                            if !self.deliver(partial).await {
                                return ResponseOutcome::Interrupted;
                            }
                            waiting.extend(segmenter.feed(&token).into_iter().filter(|u| !u.is_blank()));
                        }
                        Ok(None) => {
                            stream_done = true;
                            waiting.extend(segmenter.finish().filter(|u| !u.is_blank()));
                        }
                        Ok(Some(Err(e))) => {
                            warn!(error = %e, "Generation failed mid-response");
                            error = Some(e.to_string());
                            stream_done = true;
                            waiting.extend(segmenter.finish().filter(|u| !u.is_blank()));
                        }
                        Err(_) => {
                            let e = VoiceError::timeout("generation", limit);
                            warn!(error = %e, "Generation stalled mid-response");
                            error = Some(e.to_string());
                            stream_done = true;
                            waiting.extend(segmenter.finish().filter(|u| !u.is_blank()));
                        }
                    }
                }
            }
        }
        drop(tokens);

        if full_text.trim().is_empty() {
            return ResponseOutcome::Failed(
                error.unwrap_or_else(|| "generator produced no text".to_string()),
            );
        }

        let mut speaking = self.speaking.lock().await;
        if !*speaking || self.cancel.is_cancelled() {
            return ResponseOutcome::Interrupted;
        }
        *speaking = false;
        let complete = OutboundEvent::ResponseComplete {
            full_response: full_text.clone(),
        };
        if self.outbound.send(complete).await.is_err() {
            return ResponseOutcome::Interrupted;
        }
        drop(speaking);
        self.activity.touch();
        ResponseOutcome::Completed {
            text: full_text,
            error,
        }
    }

    fn synthesize(&self, unit: SpeakableUnit) -> Synthesis {
        let synthesizer = Arc::clone(&self.collaborators.synthesizer);
        let limit = self.config.timeouts.synthesis();
        async move {
            let outcome = match timeout(limit, synthesizer.synthesize(unit.text())).await {
                Ok(outcome) => outcome,
                Err(_) => SynthesisOutcome::Failed(VoiceError::timeout("synthesis", limit).to_string()),
            };
            (unit, outcome)
        }
        .boxed()
    }

    /// Returns false when delivery must stop.
    async fn deliver_unit(&self, unit: SpeakableUnit, outcome: SynthesisOutcome) -> bool {
        match outcome {
            SynthesisOutcome::Audio(fragment) => {
                let event = OutboundEvent::AssistantAudio {
                    index: unit.index,
                    text: unit.text().to_string(),
                    audio: fragment.bytes,
                    duration_ms: fragment.duration.as_millis() as u64,
                };
                self.deliver(event).await
            }
            SynthesisOutcome::Empty => {
                debug!(index = unit.index, "Synthesizer returned no audio, skipping unit");
                !self.cancel.is_cancelled()
            }
            SynthesisOutcome::Failed(reason) => {
                warn!(index = unit.index, reason = %reason, "Synthesis failed, skipping unit");
                !self.cancel.is_cancelled()
            }
        }
    }

    /// Send while the gate says the assistant is still speaking.
    async fn deliver(&self, event: OutboundEvent) -> bool {
        let speaking = self.speaking.lock().await;
        if !*speaking || self.cancel.is_cancelled() {
            return false;
        }
        let sent = self.outbound.send(event).await.is_ok();
        drop(speaking);
        if sent {
            self.activity.touch();
        }
        sent
    }
}
