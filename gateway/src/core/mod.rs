pub mod guards;
pub mod llm;
pub mod persistence;
pub mod playback;
pub mod retrieval;
pub mod retry;
pub mod sentence;
pub mod stt;
pub mod transcript;
pub mod tts;
pub mod turn_detector;

// Re-export commonly used types for convenience
pub use guards::{GuardConfig, GuardPolicy, GuardReply};
pub use llm::{Generator, LLMError, create_generator};
pub use persistence::{Persona, PersistenceError, PersonaStore, QuotaService, TranscriptStore};
pub use playback::{AudioSink, PlaybackQueue};
pub use retrieval::{RetrievalError, Retriever};
pub use retry::RetryPolicy;
pub use stt::{
    STTError, StreamConfig, StreamEvent, StreamingTranscriber, Transcriber, TranscriptionStream,
    create_streaming_transcriber, create_transcriber,
};
pub use transcript::{Role, TranscriptRecord, Utterance};
pub use tts::{SynthesizedAudio, Synthesizer, TTSError, create_synthesizer};
pub use turn_detector::{TurnDetector, TurnDetectorConfig};
