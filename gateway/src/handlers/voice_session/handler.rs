//! Voice session WebSocket handler
//!
//! One socket is one [`TurnOrchestrator`]. The read loop decodes client
//! frames into commands while a sender task drains session events onto the
//! socket, so `stop` and `ping` are served while a turn is running.

use axum::{
    Extension,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};

use crate::middleware::ClientIp;
use crate::orchestrator::{Dispatch, SessionCommand, SessionEvent, StatusValue, TurnOrchestrator};
use crate::state::AppState;

use super::messages::{ClientMessage, MAX_CHUNK_BASE64_SIZE, OutgoingMessage};

/// Events buffered between the orchestrator and the socket
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Maximum WebSocket frame size (20 MB)
const MAX_WS_FRAME_SIZE: usize = 20 * 1024 * 1024;

/// Maximum WebSocket message size (20 MB), room for a 16 MiB base64 recording
const MAX_WS_MESSAGE_SIZE: usize = 20 * 1024 * 1024;

/// How often the read loop checks for a stale connection
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Close connections with no inbound traffic for this long
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Time allowed for `done` and the close frame to flush after `stop`
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Releases the connection-limit slot however the socket ends, including
/// upgrades that never complete.
struct ConnectionSlot {
    state: Arc<AppState>,
    ip: ClientIp,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.release_connection(self.ip.0);
        debug!(ip = %self.ip.0, "Released connection slot");
    }
}

/// How the read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopControl {
    Continue,
    /// Client sent `stop`; `done` is on its way
    Stopped,
    /// Socket closed, errored or went idle
    Disconnected,
}

/// Voice session WebSocket handler
///
/// Upgrades the connection and runs one persona session on it.
pub async fn voice_session_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let slot = client_ip.map(|Extension(ip)| ConnectionSlot {
        state: Arc::clone(&state),
        ip,
    });
    info!(
        ip = ?slot.as_ref().map(|s| s.ip.0),
        "Voice session WebSocket upgrade requested"
    );

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_voice_socket(socket, state, slot))
}

async fn handle_voice_socket(socket: WebSocket, state: Arc<AppState>, slot: Option<ConnectionSlot>) {
    let (mut sender, mut receiver) = socket.split();
    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(CHANNEL_BUFFER_SIZE);

    let orchestrator = TurnOrchestrator::new(
        state.providers.clone(),
        state.orchestrator_settings.clone(),
        event_tx.clone(),
    );
    let session_id = orchestrator.session_id().to_string();
    info!(session_id = %session_id, "Voice session connected");

    // Sender task: session events to JSON frames; `done` is followed by a close
    let mut sender_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let done = matches!(event, SessionEvent::Done);
            let json = match serde_json::to_string(&OutgoingMessage::from(event)) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize outgoing message: {}", e);
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(json.into())).await {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
            if done {
                let frame = CloseFrame {
                    code: close_code::NORMAL,
                    reason: "client stop".into(),
                };
                if let Err(e) = sender.send(Message::Close(Some(frame))).await {
                    debug!("Failed to send close frame: {}", e);
                }
                break;
            }
        }
    });

    if event_tx
        .send(SessionEvent::status(StatusValue::Ready))
        .await
        .is_err()
    {
        warn!(session_id = %session_id, "Sender task ended before the session started");
    }

    let mut last_activity = Instant::now();
    let outcome = loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        match process_message(msg, &orchestrator, &event_tx).await {
                            LoopControl::Continue => {}
                            other => break other,
                        }
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, "Voice session WebSocket error: {}", e);
                        break LoopControl::Disconnected;
                    }
                    None => {
                        info!(session_id = %session_id, "Voice session closed by client");
                        break LoopControl::Disconnected;
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > IDLE_TIMEOUT {
                    warn!(
                        session_id = %session_id,
                        "Voice session idle for {}s, closing stale connection",
                        last_activity.elapsed().as_secs()
                    );
                    let _ = event_tx
                        .send(SessionEvent::error("Connection closed due to inactivity"))
                        .await;
                    break LoopControl::Disconnected;
                }
                debug!(session_id = %session_id, "Voice session idle check - still active");
            }
        }
    };

    match outcome {
        LoopControl::Stopped => {
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut sender_task)
                .await
                .is_err()
            {
                sender_task.abort();
            }
        }
        _ => {
            // implicit stop: persist, nothing to emit
            orchestrator.shutdown().await;
            sender_task.abort();
        }
    }

    drop(slot);
    info!(session_id = %session_id, "Voice session terminated");
}

/// Process one inbound frame.
async fn process_message(
    msg: Message,
    orchestrator: &TurnOrchestrator,
    event_tx: &mpsc::Sender<SessionEvent>,
) -> LoopControl {
    match msg {
        Message::Text(text) => {
            debug!("Received text message: {} bytes", text.len());

            let incoming: ClientMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Failed to parse voice session message: {}", e);
                    report(event_tx, format!("Invalid message format: {e}")).await;
                    return LoopControl::Continue;
                }
            };

            if let Err(e) = incoming.validate_size() {
                warn!("Message validation failed: {}", e);
                report(event_tx, e.to_string()).await;
                return LoopControl::Continue;
            }

            match incoming.into_command() {
                Ok(command) => handle_client_message(command, orchestrator).await,
                Err(e) => {
                    report(event_tx, e.to_string()).await;
                    LoopControl::Continue
                }
            }
        }
        Message::Binary(data) => {
            debug!("Received binary audio: {} bytes", data.len());
            if data.len() > MAX_CHUNK_BASE64_SIZE {
                report(
                    event_tx,
                    format!(
                        "audio chunk too large: {} bytes (max: {} bytes)",
                        data.len(),
                        MAX_CHUNK_BASE64_SIZE
                    ),
                )
                .await;
                return LoopControl::Continue;
            }
            handle_client_message(SessionCommand::StreamChunk(data), orchestrator).await
        }
        Message::Ping(_) | Message::Pong(_) => LoopControl::Continue,
        Message::Close(_) => {
            info!("Voice session close received");
            LoopControl::Disconnected
        }
    }
}

async fn handle_client_message(
    command: SessionCommand,
    orchestrator: &TurnOrchestrator,
) -> LoopControl {
    match orchestrator.dispatch(command).await {
        Dispatch::Continue => LoopControl::Continue,
        Dispatch::Close => LoopControl::Stopped,
    }
}

async fn report(event_tx: &mpsc::Sender<SessionEvent>, message: String) {
    if event_tx.send(SessionEvent::error(message)).await.is_err() {
        debug!("Event channel closed, dropping error");
    }
}
