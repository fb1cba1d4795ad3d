//! Scripted providers for driving sessions without network access.
//!
//! Each mock records what it was asked so tests can assert on calls:
//! - `ScriptedTranscriber` returns a queue of transcripts, optionally gated
//! - `ScriptedStreaming` replays stream events once audio starts flowing
//! - `ScriptedGenerator` streams fixed fragments and keeps the prompts
//! - `RecordingSynthesizer` echoes text back as audio bytes

// Not every test binary uses every helper
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use persona_voice_gateway::core::llm::{FragmentStream, Generator, LLMError};
use persona_voice_gateway::core::persistence::{
    InMemoryPersonaStore, InMemoryQuota, InMemoryTranscriptStore, Persona,
};
use persona_voice_gateway::core::retrieval::{RetrievalError, Retriever};
use persona_voice_gateway::core::stt::{
    STTError, StreamConfig, StreamEvent, StreamingTranscriber, Transcriber, TranscriptionStream,
    stream_pair,
};
use persona_voice_gateway::core::tts::{SynthesizedAudio, Synthesizer, TTSResult};
use persona_voice_gateway::orchestrator::{
    OrchestratorSettings, Providers, SessionEvent, StartRequest, TurnOrchestrator,
};

/// How long a test waits for the next session event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub const PERSONA_ID: &str = "persona-dana";
pub const COMPANY_ID: &str = "acme";

pub fn sample_persona() -> Persona {
    Persona {
        id: PERSONA_ID.to_string(),
        name: "Dana".to_string(),
        role: "CFO".to_string(),
        prompt: "Skeptical about budget, cares about payback period.".to_string(),
        voice: Some("nova".to_string()),
    }
}

// =============================================================================
// Transcription
// =============================================================================

pub struct ScriptedTranscriber {
    replies: Mutex<VecDeque<Result<String, STTError>>>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: STTError) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([Err(error)])),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Block every call until the returned handle is notified.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _audio: Bytes, _mime: &str) -> Result<String, STTError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// Never answers.
pub struct HangingTranscriber;

#[async_trait]
impl Transcriber for HangingTranscriber {
    async fn transcribe(&self, _audio: Bytes, _mime: &str) -> Result<String, STTError> {
        std::future::pending().await
    }

    fn provider_name(&self) -> &'static str {
        "hanging"
    }
}

/// Replays `script` after the first audio frame, then closes when audio ends.
pub struct ScriptedStreaming {
    script: Vec<StreamEvent>,
    frames: Arc<AtomicUsize>,
    opened: AtomicUsize,
}

impl ScriptedStreaming {
    pub fn new(script: Vec<StreamEvent>) -> Self {
        Self {
            script,
            frames: Arc::new(AtomicUsize::new(0)),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn frames_received(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamingTranscriber for ScriptedStreaming {
    async fn open(&self, config: StreamConfig) -> Result<TranscriptionStream, STTError> {
        config.validate()?;
        self.opened.fetch_add(1, Ordering::SeqCst);

        let (stream, mut worker) = stream_pair(64);
        let script = self.script.clone();
        let frames = self.frames.clone();
        tokio::spawn(async move {
            let mut replayed = false;
            while let Some(_frame) = worker.audio_rx.recv().await {
                frames.fetch_add(1, Ordering::SeqCst);
                if !replayed {
                    replayed = true;
                    for event in &script {
                        if worker.events_tx.send(event.clone()).await.is_err() {
                            return;
                        }
                    }
                }
            }
            let _ = worker.events_tx.send(StreamEvent::Closed).await;
        });
        Ok(stream)
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

// =============================================================================
// Retrieval
// =============================================================================

pub struct ScriptedRetriever {
    result: Result<Vec<String>, RetrievalError>,
    queries: Mutex<Vec<(Option<String>, String)>>,
}

impl ScriptedRetriever {
    pub fn passages<I, S>(passages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            result: Ok(passages.into_iter().map(Into::into).collect()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err(RetrievalError::Lookup("vector store offline".to_string())),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<(Option<String>, String)> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    async fn retrieve(
        &self,
        company_id: Option<&str>,
        query: &str,
    ) -> Result<Vec<String>, RetrievalError> {
        self.queries
            .lock()
            .push((company_id.map(str::to_string), query.to_string()));
        self.result.clone()
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

// =============================================================================
// Generation
// =============================================================================

pub enum GeneratorScript {
    Fragments(Vec<String>),
    /// Fragments, then a mid-stream failure
    Broken(Vec<String>, LLMError),
    Refuse(LLMError),
    /// Opens the stream but never yields
    Stall,
}

pub struct ScriptedGenerator {
    script: GeneratorScript,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedGenerator {
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(GeneratorScript::Fragments(
            fragments.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn new(script: GeneratorScript) -> Self {
        Self {
            script,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// `(system, user)` pairs in call order.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, system: &str, user: &str) -> Result<FragmentStream, LLMError> {
        self.prompts
            .lock()
            .push((system.to_string(), user.to_string()));
        let stream: FragmentStream = match &self.script {
            GeneratorScript::Fragments(fragments) => Box::pin(futures::stream::iter(
                fragments.clone().into_iter().map(Ok),
            )),
            GeneratorScript::Broken(fragments, error) => {
                let items: Vec<Result<String, LLMError>> = fragments
                    .iter()
                    .cloned()
                    .map(Ok)
                    .chain(std::iter::once(Err(error.clone())))
                    .collect();
                Box::pin(futures::stream::iter(items))
            }
            GeneratorScript::Refuse(error) => return Err(error.clone()),
            GeneratorScript::Stall => Box::pin(futures::stream::pending()),
        };
        Ok(stream)
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

// =============================================================================
// Synthesis
// =============================================================================

#[derive(Default)]
pub struct RecordingSynthesizer {
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn voices(&self) -> Vec<Option<String>> {
        self.calls.lock().iter().map(|(_, v)| v.clone()).collect()
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> TTSResult<SynthesizedAudio> {
        self.calls
            .lock()
            .push((text.to_string(), voice.map(str::to_string)));
        Ok(SynthesizedAudio {
            bytes: Bytes::copy_from_slice(text.as_bytes()),
            mime: "audio/mpeg".to_string(),
        })
    }

    fn provider_name(&self) -> &'static str {
        "recording"
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Handles to every mock behind a [`Providers`] bundle.
pub struct MockProviders {
    pub transcriber: Arc<dyn Transcriber>,
    pub streaming: Arc<ScriptedStreaming>,
    pub retriever: Arc<ScriptedRetriever>,
    pub generator: Arc<ScriptedGenerator>,
    pub synthesizer: Arc<RecordingSynthesizer>,
    pub personas: Arc<InMemoryPersonaStore>,
    pub transcripts: Arc<InMemoryTranscriptStore>,
    pub quota: Arc<InMemoryQuota>,
}

impl MockProviders {
    /// Transcriber answers `heard` once; the generator replies `reply`.
    pub fn simple(heard: &str, reply: &[&str]) -> Self {
        Self {
            transcriber: Arc::new(ScriptedTranscriber::new([heard])),
            streaming: Arc::new(ScriptedStreaming::new(Vec::new())),
            retriever: Arc::new(ScriptedRetriever::passages([
                "Acme sells payroll software.",
            ])),
            generator: Arc::new(ScriptedGenerator::fragments(reply.iter().copied())),
            synthesizer: Arc::new(RecordingSynthesizer::new()),
            personas: Arc::new(InMemoryPersonaStore::new().with(sample_persona())),
            transcripts: Arc::new(InMemoryTranscriptStore::new()),
            quota: Arc::new(InMemoryQuota::new().with_balance(COMPANY_ID, 30)),
        }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            transcriber: self.transcriber.clone(),
            streaming: self.streaming.clone(),
            retriever: self.retriever.clone(),
            generator: self.generator.clone(),
            synthesizer: self.synthesizer.clone(),
            personas: self.personas.clone(),
            transcripts: self.transcripts.clone(),
            quota: self.quota.clone(),
        }
    }
}

/// An orchestrator plus the receiving end of its event channel.
pub struct TestSession {
    pub orchestrator: TurnOrchestrator,
    pub events: mpsc::Receiver<SessionEvent>,
}

impl TestSession {
    pub fn new(mocks: &MockProviders) -> Self {
        Self::with_settings(mocks, test_settings())
    }

    pub fn with_settings(mocks: &MockProviders, settings: OrchestratorSettings) -> Self {
        let (tx, events) = mpsc::channel(256);
        Self {
            orchestrator: TurnOrchestrator::new(mocks.providers(), settings, tx),
            events,
        }
    }

    pub async fn next_event(&mut self) -> SessionEvent {
        match tokio::time::timeout(EVENT_TIMEOUT, self.events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => panic!("event channel closed"),
            Err(_) => panic!("timed out waiting for a session event"),
        }
    }

    /// Collect events up to and including the first one matching `until`.
    pub async fn events_until<F>(&mut self, until: F) -> Vec<SessionEvent>
    where
        F: Fn(&SessionEvent) -> bool,
    {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            let stop = until(&event);
            seen.push(event);
            if stop {
                return seen;
            }
        }
    }

    /// Events that are already queued, without waiting.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }
}

pub fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        provider_timeout: Duration::from_secs(2),
        default_voice: Some("alloy".to_string()),
        ..Default::default()
    }
}

pub fn start_request(company: Option<&str>) -> StartRequest {
    StartRequest {
        persona_id: PERSONA_ID.to_string(),
        conversation_id: Some("conv-1".to_string()),
        company_id: company.map(str::to_string),
    }
}
