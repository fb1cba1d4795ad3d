//! Deepgram live transcription settings.

use url::Url;

use super::super::base::{STTError, StreamConfig};

pub const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";

#[derive(Debug, Clone)]
pub struct DeepgramStreamConfig {
    pub api_key: String,
    pub model: String,
    pub language: String,
    pub ws_url: String,
    /// Silence (ms) after which Deepgram marks `speech_final`
    pub endpointing_ms: u32,
    /// Gap (ms) after the last word before an `UtteranceEnd` is sent
    pub utterance_end_ms: u32,
    pub interim_results: bool,
    pub punctuate: bool,
    pub smart_format: bool,
}

impl Default for DeepgramStreamConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "nova-2".to_string(),
            language: "en-US".to_string(),
            ws_url: DEEPGRAM_LISTEN_URL.to_string(),
            endpointing_ms: 300,
            utterance_end_ms: 1000,
            interim_results: true,
            punctuate: true,
            smart_format: true,
        }
    }
}

/// Map a client encoding name onto Deepgram's vocabulary.
pub fn deepgram_encoding(encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "linear16" | "pcm16" | "pcm_s16le" | "pcm" | "s16le" => "linear16".to_string(),
        "mulaw" | "ulaw" | "pcm_mulaw" => "mulaw".to_string(),
        "alaw" | "pcm_alaw" => "alaw".to_string(),
        "opus" => "opus".to_string(),
        "flac" => "flac".to_string(),
        other => other.to_string(),
    }
}

impl DeepgramStreamConfig {
    /// Listen URL with all query parameters for one stream.
    pub fn build_url(&self, stream: &StreamConfig) -> Result<Url, STTError> {
        let mut url = Url::parse(&self.ws_url)
            .map_err(|e| STTError::ConfigurationError(format!("Invalid Deepgram URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("model", &self.model)
            .append_pair("language", &self.language)
            .append_pair("encoding", &deepgram_encoding(&stream.encoding))
            .append_pair("sample_rate", &stream.sample_rate.to_string())
            .append_pair("channels", &stream.channels.to_string())
            .append_pair("interim_results", &self.interim_results.to_string())
            .append_pair("punctuate", &self.punctuate.to_string())
            .append_pair("smart_format", &self.smart_format.to_string())
            .append_pair("endpointing", &self.endpointing_ms.to_string());
        // utterance_end_ms requires interim results
        if self.interim_results {
            url.query_pairs_mut()
                .append_pair("utterance_end_ms", &self.utterance_end_ms.to_string())
                .append_pair("vad_events", "true");
        }
        Ok(url)
    }
}
