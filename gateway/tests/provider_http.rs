//! Provider adapter tests against mock backends
//!
//! HTTP providers are exercised against wiremock; the Deepgram client
//! against a local tokio-tungstenite server speaking its live protocol.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use persona_voice_gateway::core::llm::{Generator, LLMError, OpenRouterConfig, OpenRouterGenerator};
use persona_voice_gateway::core::persistence::{
    PersistenceError, PersonaStore, QuotaService, SupabaseClient, SupabaseConfig, SupabaseStore,
    TranscriptStore,
};
use persona_voice_gateway::core::retrieval::{EmbeddingConfig, Retriever, SupabaseRetriever};
use persona_voice_gateway::core::retry::RetryPolicy;
use persona_voice_gateway::core::stt::{
    DeepgramStreamConfig, DeepgramStreamingTranscriber, STTError, StreamConfig, StreamEvent,
    StreamingTranscriber, Transcriber, WhisperConfig, WhisperTranscriber,
};
use persona_voice_gateway::core::transcript::{TranscriptRecord, Utterance};
use persona_voice_gateway::core::tts::{OpenAISynthesizer, OpenAITTSConfig, Synthesizer};

const KEY: &str = "sk-test";

fn http() -> reqwest::Client {
    reqwest::Client::new()
}

fn supabase(server: &MockServer) -> SupabaseClient {
    SupabaseClient::new(
        &SupabaseConfig {
            url: server.uri(),
            service_role_key: "service-role".to_string(),
        },
        http(),
    )
    .unwrap()
}

// =============================================================================
// Whisper
// =============================================================================

fn whisper(server: &MockServer) -> WhisperTranscriber {
    WhisperTranscriber::new(
        WhisperConfig {
            api_key: KEY.to_string(),
            api_url: format!("{}/audio/transcriptions", server.uri()),
            ..Default::default()
        },
        http(),
    )
}

#[tokio::test]
async fn test_whisper_transcribes_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "  Hello there.  "})))
        .expect(1)
        .mount(&server)
        .await;

    let text = whisper(&server)
        .transcribe(Bytes::from_static(b"fake-webm"), "audio/webm")
        .await
        .unwrap();
    assert_eq!(text, "Hello there.");

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains(r#"filename="audio.webm""#));
    assert!(body.contains("whisper-1"));
}

#[tokio::test]
async fn test_whisper_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "Incorrect API key provided"}})),
        )
        .mount(&server)
        .await;

    let err = whisper(&server)
        .transcribe(Bytes::from_static(b"fake"), "audio/m4a")
        .await
        .unwrap_err();
    match err {
        STTError::AuthenticationFailed(message) => {
            assert!(message.contains("Incorrect API key provided"))
        }
        other => panic!("Expected auth failure, got {other:?}"),
    }
}

// =============================================================================
// OpenRouter
// =============================================================================

fn openrouter(server: &MockServer) -> OpenRouterGenerator {
    OpenRouterGenerator::new(
        OpenRouterConfig {
            api_key: KEY.to_string(),
            model: "test/model".to_string(),
            api_url: format!("{}/chat/completions", server.uri()),
        },
        http(),
    )
}

fn sse_chunk(content: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"choices": [{"delta": {"content": content}}]})
    )
}

#[tokio::test]
async fn test_openrouter_streams_fragments() {
    let server = MockServer::start().await;
    let body = format!(
        "{}: keep-alive\n\n{}data: {{not json}}\n\n{}data: [DONE]\n\n{}",
        sse_chunk("Budget "),
        sse_chunk("is "),
        sse_chunk("tight."),
        sse_chunk("ignored after done"),
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "test/model",
            "stream": true,
            "messages": [
                {"role": "system", "content": "be Dana"},
                {"role": "user", "content": "how is budget?"},
            ],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let stream = openrouter(&server)
        .generate("be Dana", "how is budget?")
        .await
        .unwrap();
    let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
    assert_eq!(fragments, vec!["Budget ", "is ", "tight."]);
}

#[tokio::test]
async fn test_openrouter_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    match openrouter(&server).generate("s", "u").await {
        Err(LLMError::ProviderError(message)) => {
            assert!(message.contains("429"));
            assert!(message.contains("rate limited"));
        }
        Err(other) => panic!("Expected provider error, got {other:?}"),
        Ok(_) => panic!("Expected provider error, got a stream"),
    }
}

// =============================================================================
// Speech
// =============================================================================

fn speech(server: &MockServer) -> OpenAISynthesizer {
    OpenAISynthesizer::new(
        OpenAITTSConfig {
            api_key: KEY.to_string(),
            api_url: format!("{}/audio/speech", server.uri()),
            ..Default::default()
        },
        http(),
    )
}

#[tokio::test]
async fn test_speech_uses_persona_voice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/speech"))
        .and(body_partial_json(json!({
            "model": "tts-1",
            "voice": "nova",
            "input": "Hello.",
            "response_format": "mp3",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3-mp3".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let audio = speech(&server)
        .synthesize("Hello.", Some("nova"))
        .await
        .unwrap();
    assert_eq!(audio.bytes, Bytes::from_static(b"ID3-mp3"));
    assert_eq!(audio.mime, "audio/mpeg");
}

#[tokio::test]
async fn test_speech_unknown_voice_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/speech"))
        .and(body_partial_json(json!({"voice": "alloy"})))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp3".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    speech(&server)
        .synthesize("Hello.", Some("Rachel"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_speech_empty_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/speech"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    assert!(speech(&server).synthesize("Hello.", None).await.is_err());
}

// =============================================================================
// Supabase
// =============================================================================

#[tokio::test]
async fn test_supabase_persona_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/personas"))
        .and(query_param("id", "eq.p1"))
        .and(header("apikey", "service-role"))
        .and(header("authorization", "Bearer service-role"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "p1",
            "name": "Dana",
            "role": null,
            "prompt": "Skeptical.",
            "voice": "nova",
            "created_at": "2025-01-01T00:00:00Z",
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/personas"))
        .and(query_param("id", "eq.missing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = SupabaseStore::new(supabase(&server));
    let persona = store.fetch("p1").await.unwrap();
    assert_eq!(persona.name, "Dana");
    assert_eq!(persona.role, "");
    assert_eq!(persona.voice.as_deref(), Some("nova"));

    assert!(matches!(
        store.fetch("missing").await,
        Err(PersistenceError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_supabase_transcript_upsert() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/transcripts"))
        .and(header_exists("prefer"))
        .and(body_partial_json(json!({
            "id": "conv-1",
            "persona_id": "p1",
            "company_id": null,
            "duration_sec": 42,
            "messages": [{"role": "user", "text": "Hi"}, {"role": "ai", "text": "Hello."}],
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let store = SupabaseStore::new(supabase(&server));
    let record = TranscriptRecord {
        id: "conv-1".to_string(),
        persona_id: Some("p1".to_string()),
        company_id: None,
        messages: vec![Utterance::user("Hi"), Utterance::assistant("Hello.")],
        duration_sec: 42,
    };
    store.save(&record).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(
        requests[0].headers.get("prefer").unwrap().to_str().unwrap(),
        "resolution=merge-duplicates,return=minimal"
    );
}

#[tokio::test]
async fn test_supabase_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/transcripts"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = SupabaseStore::new(supabase(&server));
    let record = TranscriptRecord {
        id: "conv-2".to_string(),
        persona_id: None,
        company_id: None,
        messages: Vec::new(),
        duration_sec: 1,
    };
    match store.save(&record).await {
        Err(PersistenceError::Backend(message)) => assert!(message.contains("boom")),
        other => panic!("Expected backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_supabase_minutes_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/companies"))
        .and(query_param("id", "eq.acme"))
        .and(query_param("select", "minutes_balance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"minutes_balance": 12}])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/decrement_minutes"))
        .and(body_partial_json(json!({"p_company_id": "acme", "p_minutes": 2})))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/usage_ledger"))
        .and(body_partial_json(json!({
            "company_id": "acme",
            "conversation_id": "conv-1",
            "seconds_used": 61,
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let store = SupabaseStore::new(supabase(&server));
    assert_eq!(store.remaining_minutes("acme").await.unwrap(), 12);
    store.record_usage("acme", "conv-1", 61).await.unwrap();
    // no conversation: decrement only
    store.record_usage("acme", "", 61).await.unwrap();
    // zero billable minutes: nothing sent
    store.record_usage("acme", "conv-1", 0).await.unwrap();
}

// =============================================================================
// Retrieval
// =============================================================================

#[tokio::test]
async fn test_retriever_embeds_then_matches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(json!({
            "model": "text-embedding-3-small",
            "input": "what about security?",
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": [{"embedding": [0.25, -0.5]}]})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/match_documents"))
        .and(body_partial_json(json!({
            "query_embedding": [0.25, -0.5],
            "company_id": "acme",
            "match_count": 4,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"content": "SOC 2 Type II certified."},
            {"content": null},
            {"content": "Data encrypted at rest."},
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let retriever = SupabaseRetriever::new(
        EmbeddingConfig {
            api_key: KEY.to_string(),
            api_url: format!("{}/embeddings", server.uri()),
            ..Default::default()
        },
        supabase(&server),
        http(),
    );
    let passages = retriever
        .retrieve(Some("acme"), "what about security?")
        .await
        .unwrap();
    assert_eq!(
        passages,
        vec!["SOC 2 Type II certified.", "Data encrypted at rest."]
    );
}

#[tokio::test]
async fn test_retriever_without_company_makes_no_calls() {
    let server = MockServer::start().await;
    let retriever = SupabaseRetriever::new(
        EmbeddingConfig {
            api_key: KEY.to_string(),
            api_url: format!("{}/embeddings", server.uri()),
            ..Default::default()
        },
        supabase(&server),
        http(),
    );

    assert!(retriever.retrieve(None, "anything").await.unwrap().is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

// =============================================================================
// Deepgram
// =============================================================================

/// Accepts one live session, answers the first audio frame with a scripted
/// transcript, and closes after `CloseStream`.
async fn spawn_fake_deepgram() -> (String, tokio::task::JoinHandle<(String, usize)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/v1/listen", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut authorization = String::new();
        let ws = tokio_tungstenite::accept_hdr_async(
            tcp,
            |request: &tokio_tungstenite::tungstenite::handshake::server::Request, response| {
                authorization = request
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Ok(response)
            },
        )
        .await
        .unwrap();
        let (mut write, mut read) = ws.split();

        let mut frames = 0usize;
        while let Some(Ok(message)) = read.next().await {
            match message {
                Message::Binary(_) => {
                    frames += 1;
                    if frames == 1 {
                        let script = [
                            json!({"type": "Metadata", "request_id": "req-1"}),
                            json!({"type": "Results", "is_final": false, "speech_final": false,
                                   "channel": {"alternatives": [{"transcript": "we need", "confidence": 0.7}]}}),
                            json!({"type": "Results", "is_final": true, "speech_final": true,
                                   "channel": {"alternatives": [{"transcript": "We need SSO.", "confidence": 0.98}]}}),
                            json!({"type": "UtteranceEnd", "last_word_end": 1.2}),
                        ];
                        for message in script {
                            write
                                .send(Message::Text(message.to_string().into()))
                                .await
                                .unwrap();
                        }
                    }
                }
                Message::Text(text) if text.as_str().contains("CloseStream") => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                _ => {}
            }
        }
        (authorization, frames)
    });

    (url, handle)
}

#[tokio::test]
async fn test_deepgram_live_session() {
    let (url, server) = spawn_fake_deepgram().await;
    let transcriber = DeepgramStreamingTranscriber::new(
        DeepgramStreamConfig {
            api_key: "dg-key".to_string(),
            ws_url: url,
            ..Default::default()
        },
        RetryPolicy::none(),
    );

    let mut stream = transcriber.open(StreamConfig::default()).await.unwrap();
    stream
        .send_audio(Bytes::from_static(&[0u8; 640]))
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), stream.next_event())
        .await
        .expect("timed out waiting for Deepgram events")
    {
        let end = event == StreamEvent::UtteranceEnd;
        events.push(event);
        if end && events.len() >= 4 {
            break;
        }
    }
    assert_eq!(
        events,
        vec![
            StreamEvent::Interim("we need".to_string()),
            StreamEvent::Final("We need SSO.".to_string()),
            StreamEvent::UtteranceEnd,
            StreamEvent::UtteranceEnd,
        ]
    );

    stream.finish_audio();
    let tail = tokio::time::timeout(Duration::from_secs(5), stream.next_event())
        .await
        .expect("timed out waiting for close");
    assert_eq!(tail, Some(StreamEvent::Closed));

    let (authorization, frames) = server.await.unwrap();
    assert_eq!(authorization, "Token dg-key");
    assert_eq!(frames, 1);
}

#[tokio::test]
async fn test_deepgram_requires_key() {
    let transcriber =
        DeepgramStreamingTranscriber::new(DeepgramStreamConfig::default(), RetryPolicy::none());
    assert!(matches!(
        transcriber.open(StreamConfig::default()).await,
        Err(STTError::ConfigurationError(_))
    ));
}
