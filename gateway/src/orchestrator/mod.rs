//! Per-connection turn state machine.
//!
//! A [`TurnOrchestrator`] owns one [`Session`] and reacts to
//! [`SessionCommand`]s from the socket loop. Each turn runs on its own task:
//!
//! 1. quota check and persona load
//! 2. transcription (one-shot, or a streaming provider session)
//! 3. guard rules, which may answer with a canned reply
//! 4. retrieval, degrading to an empty context on failure
//! 5. streamed generation, forwarding every fragment as it arrives
//! 6. synthesis, per reply or per sentence
//!
//! The session state is the turn lock, so a second utterance arriving
//! mid-turn is rejected instead of interleaved. Every provider call is
//! bounded by `provider_timeout`. After `stop`, any late event from the
//! cancelled turn is discarded.

mod events;
mod prompt;
mod session;
mod state;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use events::{AudioPayload, Dispatch, SessionCommand, SessionEvent, StartRequest};
pub use prompt::build_system_prompt;
pub use session::Session;
pub use state::{SessionState, StatusValue};

use crate::core::guards::{
    CLARIFICATION_REPLY, GuardConfig, GuardContext, GuardPolicy, normalize_utterance,
};
use crate::core::llm::Generator;
use crate::core::persistence::{
    Persona, PersistenceError, PersonaStore, QuotaService, TranscriptStore,
};
use crate::core::retrieval::{Retriever, render_context};
use crate::core::sentence::SentenceBuffer;
use crate::core::stt::{
    StreamConfig, StreamEvent, StreamingTranscriber, Transcriber, TranscriptionStream,
};
use crate::core::transcript::{TranscriptRecord, Utterance};
use crate::core::tts::Synthesizer;

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Audio chunks buffered between the socket loop and a streaming provider
const STREAM_CHUNK_BUFFER: usize = 256;

/// Where the client's audio stream stands.
#[derive(Debug, Default)]
enum StreamSlot {
    #[default]
    Idle,
    Open(mpsc::Sender<Bytes>),
    /// The turn ended before the client sent `audio-stream-end`; its
    /// trailing frames are dropped until the next `audio-stream-start`.
    Finalized,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("start not sent")]
    NotStarted,
    #[error("turn already in progress")]
    TurnInProgress,
    #[error("session stopped")]
    SessionStopped,
    #[error("quota exhausted")]
    QuotaExhausted,
    #[error("personaId is required")]
    MissingPersonaId,
    #[error("Persona not found: {0}")]
    PersonaNotFound(String),
    #[error("persona load failed: {0}")]
    PersonaLoad(String),
    #[error("audio stream not started")]
    StreamNotStarted,
    #[error("invalid audio stream config: {0}")]
    InvalidStreamConfig(String),
    #[error("{message}")]
    Provider {
        stage: &'static str,
        message: String,
    },
    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout {
        stage: &'static str,
        after: Duration,
    },
}

/// Whether speech is synthesized per complete reply or per sentence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisGranularity {
    #[default]
    Reply,
    Sentence,
}

impl std::str::FromStr for SynthesisGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reply" => Ok(Self::Reply),
            "sentence" => Ok(Self::Sentence),
            other => Err(format!(
                "Unsupported synthesis granularity: {other}. Expected reply or sentence"
            )),
        }
    }
}

/// Tunables shared by every session.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub provider_timeout: Duration,
    pub synthesis: SynthesisGranularity,
    /// Used when the persona has no voice of its own
    pub default_voice: Option<String>,
    pub guards: GuardConfig,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            synthesis: SynthesisGranularity::Reply,
            default_voice: None,
            guards: GuardConfig::default(),
        }
    }
}

/// Collaborators a session talks to. Built once and shared.
#[derive(Clone)]
pub struct Providers {
    pub transcriber: Arc<dyn Transcriber>,
    pub streaming: Arc<dyn StreamingTranscriber>,
    pub retriever: Arc<dyn Retriever>,
    pub generator: Arc<dyn Generator>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub personas: Arc<dyn PersonaStore>,
    pub transcripts: Arc<dyn TranscriptStore>,
    pub quota: Arc<dyn QuotaService>,
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("transcriber", &self.transcriber.provider_name())
            .field("streaming", &self.streaming.provider_name())
            .field("retriever", &self.retriever.provider_name())
            .field("generator", &self.generator.provider_name())
            .field("synthesizer", &self.synthesizer.provider_name())
            .finish_non_exhaustive()
    }
}

/// Drives one session.
pub struct TurnOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    session_id: String,
    providers: Providers,
    settings: OrchestratorSettings,
    guards: GuardPolicy,
    session: Mutex<Session>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    turn: Mutex<Option<JoinHandle<()>>>,
    stream: Mutex<StreamSlot>,
}

impl TurnOrchestrator {
    pub fn new(
        providers: Providers,
        settings: OrchestratorSettings,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let session = Session::new();
        let guards = GuardPolicy::from_config(&settings.guards);
        Self {
            inner: Arc::new(Inner {
                session_id: session.id.clone(),
                providers,
                settings,
                guards,
                session: Mutex::new(session),
                events,
                cancel: CancellationToken::new(),
                turn: Mutex::new(None),
                stream: Mutex::new(StreamSlot::Idle),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.lock().state()
    }

    pub fn conversation_id(&self) -> String {
        self.inner.session.lock().conversation_id.clone()
    }

    /// Snapshot of the transcript so far.
    pub fn transcript(&self) -> Vec<Utterance> {
        self.inner.session.lock().transcript().to_vec()
    }

    /// Handle one command. Failures are reported as `error` events.
    pub async fn dispatch(&self, command: SessionCommand) -> Dispatch {
        debug!(
            session_id = %self.inner.session_id,
            command = command.name(),
            "Dispatching session command"
        );

        let result = match command {
            SessionCommand::Ping => {
                self.inner.send(SessionEvent::Pong).await;
                Ok(())
            }
            SessionCommand::Start(request) => self.start(request).await,
            SessionCommand::Audio(payload) => self.submit_audio(payload),
            SessionCommand::StreamStart(config) => self.open_stream(config),
            SessionCommand::StreamChunk(chunk) => self.push_chunk(chunk).await,
            SessionCommand::StreamEnd => self.end_stream(),
            SessionCommand::Stop => {
                self.stop().await;
                return Dispatch::Close;
            }
        };

        if let Err(e) = result {
            debug!(session_id = %self.inner.session_id, "Command rejected: {}", e);
            self.inner.send(SessionEvent::error(e.to_string())).await;
        }
        Dispatch::Continue
    }

    /// Load the persona and reset the conversation.
    pub async fn start(&self, request: StartRequest) -> Result<(), OrchestratorError> {
        if request.persona_id.trim().is_empty() {
            return Err(OrchestratorError::MissingPersonaId);
        }
        self.inner.session.lock().begin(&request)?;

        let persona = self.inner.load_persona(&request.persona_id).await?;
        info!(
            session_id = %self.inner.session_id,
            persona_id = %persona.id,
            conversation_id = %self.conversation_id(),
            "Session started"
        );
        self.inner.session.lock().set_persona(persona);
        self.inner
            .send(SessionEvent::status(StatusValue::Ready))
            .await;
        Ok(())
    }

    /// Run a turn over one complete recording.
    pub fn submit_audio(&self, payload: AudioPayload) -> Result<(), OrchestratorError> {
        let turn = self.inner.session.lock().try_begin_turn()?;
        let inner = Arc::clone(&self.inner);
        let cancel = self.inner.cancel.child_token();
        self.spawn_turn(turn, async move { inner.run_audio_turn(payload, turn, cancel).await });
        Ok(())
    }

    /// Open a streaming transcription turn. Chunks follow via [`push_chunk`](Self::push_chunk).
    pub fn open_stream(&self, config: StreamConfig) -> Result<(), OrchestratorError> {
        config
            .validate()
            .map_err(|e| OrchestratorError::InvalidStreamConfig(e.to_string()))?;
        let turn = self.inner.session.lock().try_begin_turn()?;

        let (chunk_tx, chunk_rx) = mpsc::channel(STREAM_CHUNK_BUFFER);
        *self.inner.stream.lock() = StreamSlot::Open(chunk_tx);

        let inner = Arc::clone(&self.inner);
        let cancel = self.inner.cancel.child_token();
        self.spawn_turn(turn, async move {
            inner.run_stream_turn(config, chunk_rx, turn, cancel).await
        });
        Ok(())
    }

    pub async fn push_chunk(&self, chunk: Bytes) -> Result<(), OrchestratorError> {
        let sender = match &*self.inner.stream.lock() {
            StreamSlot::Open(sender) => Some(sender.clone()),
            StreamSlot::Finalized => None,
            StreamSlot::Idle if self.state().is_busy() => None,
            StreamSlot::Idle => return Err(OrchestratorError::StreamNotStarted),
        };
        match sender {
            Some(sender) => {
                if sender.send(chunk).await.is_err() {
                    debug!(session_id = %self.inner.session_id, "Stream finalized, dropping chunk");
                }
            }
            None => debug!(session_id = %self.inner.session_id, "No open stream, dropping chunk"),
        }
        Ok(())
    }

    pub fn end_stream(&self) -> Result<(), OrchestratorError> {
        let previous = std::mem::take(&mut *self.inner.stream.lock());
        match previous {
            StreamSlot::Open(_) | StreamSlot::Finalized => Ok(()),
            StreamSlot::Idle if self.state().is_busy() => Ok(()),
            StreamSlot::Idle => Err(OrchestratorError::StreamNotStarted),
        }
    }

    /// Explicit stop: cancel, persist, then acknowledge with `done`.
    pub async fn stop(&self) {
        self.inner.shutdown(true).await;
    }

    /// Implicit stop when the channel goes away. Nothing is emitted.
    pub async fn shutdown(&self) {
        self.inner.shutdown(false).await;
    }

    /// Wait for the in-flight turn, if any, to finish.
    pub async fn wait_for_turn(&self) {
        let handle = self.inner.turn.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn spawn_turn<F>(&self, turn: u64, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            work.await;
            inner.session.lock().finish_turn(turn);
        });
        *self.inner.turn.lock() = Some(handle);
    }
}

impl Drop for TurnOrchestrator {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
        if let Some(handle) = self.inner.turn.lock().take() {
            handle.abort();
        }
    }
}

impl Inner {
    async fn send(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            debug!(session_id = %self.session_id, "Event receiver gone");
        }
    }

    /// Send unless the turn was cancelled.
    async fn emit(&self, cancel: &CancellationToken, event: SessionEvent) {
        if cancel.is_cancelled() {
            debug!(session_id = %self.session_id, "Discarding event from cancelled turn");
            return;
        }
        self.send(event).await;
    }

    /// The client's stream outlived the turn; swallow what it still sends.
    fn retire_stream(&self) {
        let mut slot = self.stream.lock();
        if matches!(*slot, StreamSlot::Open(_)) {
            *slot = StreamSlot::Finalized;
        }
    }

    /// Release the turn lock, then tell the client the reply is playing.
    ///
    /// The lock goes first so a client answering the instant it sees
    /// `speaking` is not rejected as overlapping.
    async fn finish_speaking(&self, turn: u64, cancel: &CancellationToken) {
        self.session.lock().finish_turn(turn);
        self.emit(cancel, SessionEvent::status(StatusValue::Speaking))
            .await;
    }

    async fn bounded<T, E, F>(&self, stage: &'static str, call: F) -> Result<T, OrchestratorError>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let after = self.settings.provider_timeout;
        match tokio::time::timeout(after, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(OrchestratorError::Provider {
                stage,
                message: e.to_string(),
            }),
            Err(_) => Err(OrchestratorError::Timeout { stage, after }),
        }
    }

    async fn load_persona(&self, persona_id: &str) -> Result<Persona, OrchestratorError> {
        let after = self.settings.provider_timeout;
        match tokio::time::timeout(after, self.providers.personas.fetch(persona_id)).await {
            Ok(Ok(persona)) => Ok(persona),
            Ok(Err(PersistenceError::NotFound(_))) => {
                Err(OrchestratorError::PersonaNotFound(persona_id.to_string()))
            }
            Ok(Err(e)) => Err(OrchestratorError::PersonaLoad(e.to_string())),
            Err(_) => Err(OrchestratorError::Timeout {
                stage: "persona lookup",
                after,
            }),
        }
    }

    /// Cached persona, fetched again if `start` could not load it.
    async fn ensure_persona(&self) -> Result<Arc<Persona>, OrchestratorError> {
        let (cached, persona_id) = {
            let session = self.session.lock();
            (session.persona.clone(), session.persona_id.clone())
        };
        if let Some(persona) = cached {
            return Ok(persona);
        }
        let persona_id = persona_id.ok_or(OrchestratorError::NotStarted)?;
        let persona = self.load_persona(&persona_id).await?;
        let mut session = self.session.lock();
        session.set_persona(persona);
        session.persona.clone().ok_or(OrchestratorError::NotStarted)
    }

    /// Exhausted quota rejects the turn; an unreachable quota service does not.
    async fn check_quota(&self) -> Result<(), OrchestratorError> {
        let company_id = self.session.lock().company_id.clone();
        let Some(company_id) = company_id else {
            return Ok(());
        };
        let after = self.settings.provider_timeout;
        match tokio::time::timeout(after, self.providers.quota.remaining_minutes(&company_id)).await
        {
            Ok(Ok(minutes)) if minutes <= 0 => {
                info!(session_id = %self.session_id, company_id = %company_id, "Quota exhausted");
                Err(OrchestratorError::QuotaExhausted)
            }
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                warn!(session_id = %self.session_id, company_id = %company_id, "Quota check failed, allowing turn: {}", e);
                Ok(())
            }
            Err(_) => {
                warn!(session_id = %self.session_id, company_id = %company_id, "Quota check timed out, allowing turn");
                Ok(())
            }
        }
    }

    async fn prepare_turn(&self, cancel: &CancellationToken) -> Option<Arc<Persona>> {
        let prepared = match self.ensure_persona().await {
            Ok(persona) => self.check_quota().await.map(|_| persona),
            Err(e) => Err(e),
        };
        match prepared {
            Ok(persona) => Some(persona),
            Err(e) => {
                self.emit(cancel, SessionEvent::error(e.to_string())).await;
                None
            }
        }
    }

    async fn run_audio_turn(
        self: Arc<Self>,
        payload: AudioPayload,
        turn: u64,
        cancel: CancellationToken,
    ) {
        let Some(persona) = self.prepare_turn(&cancel).await else {
            return;
        };
        self.emit(&cancel, SessionEvent::status(StatusValue::Listening))
            .await;

        let text = if payload.audio.is_empty() {
            String::new()
        } else {
            debug!(
                session_id = %self.session_id,
                mime = %payload.mime,
                bytes = payload.audio.len(),
                "Transcribing utterance"
            );
            let call = self
                .providers
                .transcriber
                .transcribe(payload.audio, &payload.mime);
            match self.bounded("transcription", call).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(session_id = %self.session_id, "Transcription failed: {}", e);
                    self.emit(&cancel, SessionEvent::error(e.to_string())).await;
                    return;
                }
            }
        };

        self.respond(&persona, &text, turn, &cancel).await;
    }

    async fn run_stream_turn(
        self: Arc<Self>,
        config: StreamConfig,
        mut chunks: mpsc::Receiver<Bytes>,
        turn: u64,
        cancel: CancellationToken,
    ) {
        let Some(persona) = self.prepare_turn(&cancel).await else {
            self.retire_stream();
            return;
        };
        self.emit(&cancel, SessionEvent::status(StatusValue::Listening))
            .await;

        let opened = self
            .bounded("streaming transcription", self.providers.streaming.open(config))
            .await;
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                self.retire_stream();
                warn!(session_id = %self.session_id, "Could not open transcription stream: {}", e);
                self.emit(&cancel, SessionEvent::error(e.to_string())).await;
                return;
            }
        };

        let collected = self.collect_stream(stream, &mut chunks, &cancel).await;
        self.retire_stream();
        drop(chunks);

        match collected {
            Some(Ok(text)) => self.respond(&persona, &text, turn, &cancel).await,
            Some(Err(e)) => {
                warn!(session_id = %self.session_id, "Streaming transcription failed: {}", e);
                self.emit(&cancel, SessionEvent::error(e.to_string())).await;
            }
            None => debug!(session_id = %self.session_id, "Streaming turn cancelled"),
        }
    }

    /// Pump audio into the provider until the utterance is final.
    ///
    /// Finalizes once: on the first utterance end that follows final text,
    /// or when the provider closes. Interim results are ignored. Returns
    /// `None` when cancelled.
    async fn collect_stream(
        &self,
        mut stream: TranscriptionStream,
        chunks: &mut mpsc::Receiver<Bytes>,
        cancel: &CancellationToken,
    ) -> Option<Result<String, OrchestratorError>> {
        let stall = self.settings.provider_timeout;
        let mut finals: Vec<String> = Vec::new();
        let mut failure: Option<String> = None;
        let mut audio_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                chunk = chunks.recv(), if audio_open => match chunk {
                    Some(frame) => {
                        if let Err(e) = stream.send_audio(frame).await {
                            debug!(session_id = %self.session_id, "Provider stopped taking audio: {}", e);
                            audio_open = false;
                            stream.finish_audio();
                        }
                    }
                    None => {
                        audio_open = false;
                        stream.finish_audio();
                    }
                },
                event = stream.next_event() => match event {
                    Some(StreamEvent::Interim(_)) => {}
                    Some(StreamEvent::Final(text)) => {
                        let text = text.trim();
                        if !text.is_empty() {
                            finals.push(text.to_string());
                        }
                    }
                    Some(StreamEvent::UtteranceEnd) => {
                        if !finals.is_empty() {
                            break;
                        }
                    }
                    Some(StreamEvent::Error(message)) => {
                        warn!(session_id = %self.session_id, "Streaming provider error: {}", message);
                        failure = Some(message);
                    }
                    Some(StreamEvent::Closed) | None => break,
                },
                _ = tokio::time::sleep(stall), if !audio_open => {
                    return Some(Err(OrchestratorError::Timeout {
                        stage: "streaming transcription",
                        after: stall,
                    }));
                }
            }
        }

        match failure {
            Some(message) if finals.is_empty() => Some(Err(OrchestratorError::Provider {
                stage: "streaming transcription",
                message,
            })),
            _ => Some(Ok(finals.join(" "))),
        }
    }

    /// Everything after transcription.
    async fn respond(&self, persona: &Persona, text: &str, turn: u64, cancel: &CancellationToken) {
        let text = text.trim();
        if text.is_empty() {
            info!(session_id = %self.session_id, "Empty transcript, asking to repeat");
            self.session.lock().advance(SessionState::Synthesizing);
            self.speak_canned(CLARIFICATION_REPLY, persona, turn, cancel)
                .await;
            return;
        }

        self.emit(cancel, SessionEvent::Transcript(text.to_string()))
            .await;

        let guard_reply = {
            let mut session = self.session.lock();
            session.push(Utterance::user(text));
            let reply = self.guards.evaluate(&GuardContext {
                text,
                previous_normalized: session.last_user_normalized(),
                persona_name: persona.name(),
                persona_role: persona.role(),
            });
            session.remember_user(normalize_utterance(text));
            reply
        };

        if let Some(reply) = guard_reply {
            info!(
                session_id = %self.session_id,
                guard = reply.kind.as_str(),
                "Answering with guard reply"
            );
            self.session.lock().advance(SessionState::Synthesizing);
            self.emit(cancel, SessionEvent::status(StatusValue::Thinking))
                .await;
            self.speak_canned(&reply.text, persona, turn, cancel).await;
            return;
        }

        self.session.lock().advance(SessionState::Retrieving);
        self.emit(cancel, SessionEvent::status(StatusValue::Thinking))
            .await;

        let company_id = self.session.lock().company_id.clone();
        let lookup = self
            .providers
            .retriever
            .retrieve(company_id.as_deref(), text);
        let passages = match self.bounded("retrieval", lookup).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!(session_id = %self.session_id, "Retrieval failed, using empty context: {}", e);
                Vec::new()
            }
        };
        let system = build_system_prompt(persona, &render_context(&passages));

        self.session.lock().advance(SessionState::Generating);
        let (reply, remainder) = self.generate(&system, text, persona, cancel).await;
        if cancel.is_cancelled() {
            return;
        }

        self.session.lock().advance(SessionState::Synthesizing);
        let reply = reply.trim();
        if !reply.is_empty() {
            self.session.lock().push(Utterance::assistant(reply));
            match self.settings.synthesis {
                SynthesisGranularity::Reply => self.synthesize(reply, persona, cancel).await,
                SynthesisGranularity::Sentence => {
                    if let Some(rest) = remainder {
                        self.synthesize(&rest, persona, cancel).await;
                    }
                }
            }
        }
        self.finish_speaking(turn, cancel).await;
    }

    /// Stream the reply, forwarding each fragment.
    ///
    /// Returns the full text and, in sentence mode, the unterminated tail
    /// still waiting for synthesis.
    async fn generate(
        &self,
        system: &str,
        user: &str,
        persona: &Persona,
        cancel: &CancellationToken,
    ) -> (String, Option<String>) {
        let mut reply = String::new();
        let mut sentences =
            (self.settings.synthesis == SynthesisGranularity::Sentence).then(SentenceBuffer::new);

        let started = self
            .bounded("generation", self.providers.generator.generate(system, user))
            .await;
        let mut fragments = match started {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!(session_id = %self.session_id, "Generation failed: {}", e);
                self.emit(cancel, SessionEvent::error(e.to_string())).await;
                return (reply, None);
            }
        };

        let stall = self.settings.provider_timeout;
        while !cancel.is_cancelled() {
            match tokio::time::timeout(stall, fragments.next()).await {
                Ok(Some(Ok(fragment))) => {
                    reply.push_str(&fragment);
                    let completed = sentences
                        .as_mut()
                        .map(|buffer| buffer.push(&fragment))
                        .unwrap_or_default();
                    self.emit(cancel, SessionEvent::assistant_text(fragment))
                        .await;
                    for sentence in completed {
                        self.synthesize(&sentence, persona, cancel).await;
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!(session_id = %self.session_id, "Generation stream failed: {}", e);
                    self.emit(cancel, SessionEvent::error(e.to_string())).await;
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    let e = OrchestratorError::Timeout {
                        stage: "generation",
                        after: stall,
                    };
                    warn!(session_id = %self.session_id, "{}", e);
                    self.emit(cancel, SessionEvent::error(e.to_string())).await;
                    break;
                }
            }
        }

        debug!(session_id = %self.session_id, chars = reply.len(), "Generation finished");
        (reply, sentences.and_then(|mut buffer| buffer.finish()))
    }

    async fn speak_canned(
        &self,
        text: &str,
        persona: &Persona,
        turn: u64,
        cancel: &CancellationToken,
    ) {
        self.session.lock().push(Utterance::assistant(text));
        self.emit(cancel, SessionEvent::assistant_text(text)).await;
        self.synthesize(text, persona, cancel).await;
        self.finish_speaking(turn, cancel).await;
    }

    async fn synthesize(&self, text: &str, persona: &Persona, cancel: &CancellationToken) {
        let voice = persona
            .voice
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .or(self.settings.default_voice.as_deref());
        match self
            .bounded("synthesis", self.providers.synthesizer.synthesize(text, voice))
            .await
        {
            Ok(audio) => self.emit(cancel, SessionEvent::Tts(audio)).await,
            Err(e) => {
                warn!(session_id = %self.session_id, "Synthesis failed: {}", e);
                self.emit(cancel, SessionEvent::error(e.to_string())).await;
            }
        }
    }

    async fn shutdown(&self, acknowledge: bool) {
        let record = self.session.lock().stop();
        self.cancel.cancel();
        *self.stream.lock() = StreamSlot::Idle;
        let turn = self.turn.lock().take();
        if let Some(handle) = turn {
            handle.abort();
        }

        match record {
            Some(record) => self.persist(record).await,
            None => debug!(session_id = %self.session_id, "Nothing to persist"),
        }

        if acknowledge {
            self.send(SessionEvent::Done).await;
        }
    }

    /// Best effort: failures are logged and never block the close.
    async fn persist(&self, record: TranscriptRecord) {
        let after = self.settings.provider_timeout;
        match tokio::time::timeout(after, self.providers.transcripts.save(&record)).await {
            Ok(Ok(())) => info!(
                session_id = %self.session_id,
                conversation_id = %record.id,
                messages = record.messages.len(),
                duration_sec = record.duration_sec,
                "Transcript persisted"
            ),
            Ok(Err(e)) => warn!(
                session_id = %self.session_id,
                conversation_id = %record.id,
                "Transcript persist failed: {}", e
            ),
            Err(_) => warn!(
                session_id = %self.session_id,
                conversation_id = %record.id,
                "Transcript persist timed out"
            ),
        }

        let Some(company_id) = record.company_id.as_deref() else {
            return;
        };
        if record.messages.is_empty() {
            debug!(session_id = %self.session_id, company_id, "Empty call, no usage recorded");
            return;
        }
        let usage = self
            .providers
            .quota
            .record_usage(company_id, &record.id, record.duration_sec);
        match tokio::time::timeout(after, usage).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session_id = %self.session_id, company_id, "Usage record failed: {}", e),
            Err(_) => warn!(session_id = %self.session_id, company_id, "Usage record timed out"),
        }
    }
}
