mod client;
mod config;
mod messages;

pub use client::DeepgramStreamingTranscriber;
pub use config::{DEEPGRAM_LISTEN_URL, DeepgramStreamConfig, deepgram_encoding};
pub use messages::{ControlMessage, DeepgramMessage, ResultsMessage};
