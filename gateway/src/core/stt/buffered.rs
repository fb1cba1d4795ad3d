//! Streaming facade over a one-shot transcriber.
//!
//! Collects raw PCM frames until the caller finishes the audio, wraps them in
//! a WAV container and makes a single [`Transcriber`] call. Useful when no
//! streaming provider is configured; latency is that of the one-shot path.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use super::base::{
    STTError, StreamConfig, StreamEvent, StreamWorker, StreamingTranscriber, Transcriber,
    TranscriptionStream, stream_pair,
};

/// Slightly below the 25MB upload limit to leave room for the header
const MAX_BUFFER_SIZE_BYTES: usize = 20 * 1024 * 1024;

const STREAM_BUFFER: usize = 256;

/// Wrap 16-bit little-endian PCM in a WAV container.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>, STTError> {
    if pcm.len() % 2 != 0 {
        return Err(STTError::AudioProcessingError(format!(
            "PCM16 payload has odd length {}",
            pcm.len()
        )));
    }

    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len()));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| STTError::AudioProcessingError(format!("WAV header: {e}")))?;
        for sample in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .map_err(|e| STTError::AudioProcessingError(format!("WAV write: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| STTError::AudioProcessingError(format!("WAV finalize: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Buffers a stream and transcribes it in one call when the audio ends.
#[derive(Clone)]
pub struct BufferedStreamingTranscriber {
    transcriber: Arc<dyn Transcriber>,
}

impl BufferedStreamingTranscriber {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self { transcriber }
    }
}

#[async_trait]
impl StreamingTranscriber for BufferedStreamingTranscriber {
    async fn open(&self, config: StreamConfig) -> Result<TranscriptionStream, STTError> {
        config.validate()?;
        if !config.is_linear16() {
            return Err(STTError::InvalidAudioFormat(format!(
                "Buffered streaming needs linear16 PCM, got {}",
                config.encoding
            )));
        }

        let (stream, worker) = stream_pair(STREAM_BUFFER);
        tokio::spawn(run_buffer(self.transcriber.clone(), config, worker));
        Ok(stream)
    }

    fn provider_name(&self) -> &'static str {
        "buffered"
    }
}

async fn run_buffer(transcriber: Arc<dyn Transcriber>, config: StreamConfig, worker: StreamWorker) {
    let StreamWorker {
        mut audio_rx,
        events_tx,
    } = worker;
    let mut buffer = BytesMut::new();

    loop {
        tokio::select! {
            frame = audio_rx.recv() => match frame {
                Some(frame) => {
                    if buffer.len() + frame.len() > MAX_BUFFER_SIZE_BYTES {
                        warn!(bytes = buffer.len(), "Buffered audio exceeds limit");
                        let _ = events_tx
                            .send(StreamEvent::Error("audio stream too large".to_string()))
                            .await;
                        let _ = events_tx.send(StreamEvent::Closed).await;
                        return;
                    }
                    buffer.extend_from_slice(&frame);
                }
                None => break,
            },
            _ = events_tx.closed() => return,
        }
    }

    debug!(bytes = buffer.len(), "Audio finished, transcribing buffered stream");
    let result = if buffer.is_empty() {
        Ok(String::new())
    } else {
        match pcm16_to_wav(&buffer, config.sample_rate, config.channels) {
            Ok(wav) => transcriber.transcribe(Bytes::from(wav), "audio/wav").await,
            Err(e) => Err(e),
        }
    };

    match result {
        Ok(text) if !text.trim().is_empty() => {
            let _ = events_tx.send(StreamEvent::Final(text.trim().to_string())).await;
            let _ = events_tx.send(StreamEvent::UtteranceEnd).await;
        }
        Ok(_) => {}
        Err(e) => {
            let _ = events_tx.send(StreamEvent::Error(e.to_string())).await;
        }
    }
    let _ = events_tx.send(StreamEvent::Closed).await;
}
