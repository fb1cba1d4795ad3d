//! Deepgram live WebSocket session.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use url::Url;

use super::super::base::{
    STTError, StreamConfig, StreamEvent, StreamWorker, StreamingTranscriber, TranscriptionStream,
    stream_pair,
};
use super::config::DeepgramStreamConfig;
use super::messages::{ControlMessage, DeepgramMessage};
use crate::core::retry::RetryPolicy;

type DeepgramSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Frames buffered between the session and the socket task
const STREAM_BUFFER: usize = 256;

/// Deepgram drops idle sockets after ~10s without audio
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(8);

/// Opens Deepgram live transcription sessions.
#[derive(Debug, Clone)]
pub struct DeepgramStreamingTranscriber {
    config: DeepgramStreamConfig,
    retry: RetryPolicy,
}

impl DeepgramStreamingTranscriber {
    pub fn new(config: DeepgramStreamConfig, retry: RetryPolicy) -> Self {
        Self { config, retry }
    }

    async fn connect_once(url: &Url, api_key: &str) -> Result<DeepgramSocket, STTError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| STTError::ConnectionFailed(format!("Invalid request: {e}")))?;
        let auth = HeaderValue::from_str(&format!("Token {api_key}"))
            .map_err(|e| STTError::ConfigurationError(format!("Invalid API key: {e}")))?;
        request.headers_mut().insert("Authorization", auth);

        match connect_async(request).await {
            Ok((socket, _response)) => Ok(socket),
            Err(tokio_tungstenite::tungstenite::Error::Http(response))
                if response.status().as_u16() == 401 =>
            {
                Err(STTError::AuthenticationFailed(
                    "Deepgram rejected the API key".to_string(),
                ))
            }
            Err(e) => Err(STTError::ConnectionFailed(format!(
                "Failed to connect to Deepgram: {e}"
            ))),
        }
    }
}

#[async_trait]
impl StreamingTranscriber for DeepgramStreamingTranscriber {
    async fn open(&self, stream_config: StreamConfig) -> Result<TranscriptionStream, STTError> {
        stream_config.validate()?;
        if self.config.api_key.is_empty() {
            return Err(STTError::ConfigurationError(
                "DEEPGRAM_API_KEY not set".to_string(),
            ));
        }

        let url = self.config.build_url(&stream_config)?;
        let api_key = self.config.api_key.clone();
        let socket = self
            .retry
            .run("deepgram-connect", || {
                let url = url.clone();
                let api_key = api_key.clone();
                async move { Self::connect_once(&url, &api_key).await }
            })
            .await?;

        info!(
            sample_rate = stream_config.sample_rate,
            encoding = %stream_config.encoding,
            "Connected to Deepgram live transcription"
        );

        let (stream, worker) = stream_pair(STREAM_BUFFER);
        tokio::spawn(run_socket(socket, worker));
        Ok(stream)
    }

    fn provider_name(&self) -> &'static str {
        "deepgram"
    }
}

async fn run_socket(socket: DeepgramSocket, worker: StreamWorker) {
    let StreamWorker {
        mut audio_rx,
        events_tx,
    } = worker;
    let (mut ws_sink, mut ws_stream) = socket.split();
    let mut audio_done = false;
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;

    loop {
        tokio::select! {
            frame = audio_rx.recv(), if !audio_done => match frame {
                Some(frame) => {
                    if let Err(e) = ws_sink.send(Message::Binary(frame)).await {
                        error!("Failed to send audio to Deepgram: {}", e);
                        let _ = events_tx.send(StreamEvent::Error(e.to_string())).await;
                        break;
                    }
                }
                None => {
                    audio_done = true;
                    debug!("Audio finished, asking Deepgram to flush");
                    if let Ok(json) = serde_json::to_string(&ControlMessage::CloseStream) {
                        let _ = ws_sink.send(Message::Text(json.into())).await;
                    }
                }
            },

            _ = keepalive.tick(), if !audio_done => {
                if let Ok(json) = serde_json::to_string(&ControlMessage::KeepAlive) {
                    let _ = ws_sink.send(Message::Text(json.into())).await;
                }
            }

            message = ws_stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<DeepgramMessage>(text.as_str()) {
                        Ok(parsed) => {
                            for event in parsed.to_events() {
                                if events_tx.send(event).await.is_err() {
                                    debug!("Transcription stream dropped by caller");
                                    let _ = ws_sink.send(Message::Close(None)).await;
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!("Ignoring malformed Deepgram message: {}", e),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Deepgram closed the stream");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Deepgram WebSocket error: {}", e);
                    let _ = events_tx.send(StreamEvent::Error(e.to_string())).await;
                    break;
                }
                None => break,
            },

            _ = events_tx.closed() => {
                debug!("Transcription stream dropped by caller");
                let _ = ws_sink.send(Message::Close(None)).await;
                return;
            }
        }
    }

    let _ = events_tx.send(StreamEvent::Closed).await;
    info!("Deepgram stream closed");
}
