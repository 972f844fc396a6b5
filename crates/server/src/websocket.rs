//! WebSocket handler
//!
//! Binary frames are raw PCM for the session's ingestion buffer; text frames
//! are JSON envelopes. A connection starts with `SYSTEM_CLIENT_SESSION_START`,
//! which creates or reattaches a session; the session's outbound channel is
//! then drained into the socket by a dedicated task.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;

use voice_dialog_core::ErrorKind;
use voice_dialog_session::Session;

use crate::protocol::{
    outbound_to_wire, ClientEnvelope, ClientEventType, ServerEnvelope, ServerEventType,
    TextInputData,
};
use crate::state::AppState;

type WsSender = Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>;

/// WebSocket handler
pub struct WebSocketHandler;

struct Connection {
    state: AppState,
    sender: WsSender,
    session: Option<Arc<Session>>,
    drain_task: Option<JoinHandle<()>>,
}

impl WebSocketHandler {
    /// Handle WebSocket upgrade
    pub async fn handle(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
        let max_message_size = state.settings.transport.max_message_size;
        ws.max_message_size(max_message_size)
            .on_upgrade(move |socket| Self::handle_socket(socket, state))
    }

    async fn handle_socket(socket: WebSocket, state: AppState) {
        let (sender, mut receiver) = socket.split();
        let mut connection = Connection {
            state,
            sender: Arc::new(tokio::sync::Mutex::new(sender)),
            session: None,
            drain_task: None,
        };

        while let Some(message) = receiver.next().await {
            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    tracing::debug!("websocket receive error: {}", err);
                    break;
                }
            };
            let keep_open = match message {
                Message::Binary(bytes) => connection.on_binary(bytes).await,
                Message::Text(text) => connection.on_text(&text).await,
                Message::Close(_) => false,
                Message::Ping(_) | Message::Pong(_) => true,
            };
            if !keep_open {
                break;
            }
        }

        connection.teardown().await;
    }
}

impl Connection {
    async fn on_binary(&mut self, bytes: Vec<u8>) -> bool {
        let Some(session) = &self.session else {
            // Audio before session start is dropped silently
            return true;
        };
        if session.on_audio_frame(bytes).await.is_err() {
            tracing::debug!("[{}] session closed under audio stream", session.id);
            return false;
        }
        true
    }

    async fn on_text(&mut self, text: &str) -> bool {
        let envelope: ClientEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                // Malformed inbound JSON: report and drop the message only
                let reply = ServerEnvelope::error(
                    &format!("malformed event: {err}"),
                    ErrorKind::ProtocolViolation,
                    self.session.as_ref().map(|s| s.id.clone()),
                );
                return self.send(reply).await;
            }
        };

        match envelope.event_type {
            ClientEventType::SystemClientSessionStart => self.on_session_start(envelope).await,
            ClientEventType::ClientTextInput => self.on_text_input(envelope).await,
            ClientEventType::ClientSpeechEnd => match self.require_session().await {
                Some(session) => session.on_speech_end().await.is_ok(),
                None => true,
            },
            ClientEventType::ConfigGet => match self.require_session().await {
                Some(session) => {
                    let snapshot = session.config_snapshot();
                    let reply = ServerEnvelope::new(
                        ServerEventType::ConfigSnapshot,
                        snapshot,
                        Some(session.id.clone()),
                    );
                    self.send(reply).await
                }
                None => true,
            },
            ClientEventType::ConfigSet => match self.require_session().await {
                Some(session) => {
                    let merged = session.merge_config(&envelope.event_data);
                    let reply = ServerEnvelope::new(
                        ServerEventType::ConfigSnapshot,
                        merged,
                        Some(session.id.clone()),
                    );
                    self.send(reply).await
                }
                None => true,
            },
            ClientEventType::ModuleStatusGet => {
                let reply = ServerEnvelope::new(
                    ServerEventType::ModuleStatusReport,
                    self.state.module_status(),
                    self.session.as_ref().map(|s| s.id.clone()),
                );
                self.send(reply).await
            }
        }
    }

    async fn on_session_start(&mut self, envelope: ClientEnvelope) -> bool {
        let session = match self.state.sessions.create(envelope.session_id) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!("session create failed: {}", err);
                let reply =
                    ServerEnvelope::error(&err.to_string(), ErrorKind::Fatal, None);
                let _ = self.send(reply).await;
                return false;
            }
        };

        if self.drain_task.is_none() {
            match session.take_outbound() {
                Some(rx) => {
                    self.drain_task = Some(spawn_drain(session.id.clone(), rx, self.sender.clone()));
                }
                None => {
                    tracing::warn!(
                        "[{}] outbound channel already attached to another transport",
                        session.id
                    );
                }
            }
        }

        let reply = ServerEnvelope::new(
            ServerEventType::SystemServerSessionStart,
            serde_json::json!({ "session_id": session.id }),
            Some(session.id.clone()),
        );
        tracing::info!("[{}] session attached to websocket", session.id);
        self.session = Some(session);
        self.send(reply).await
    }

    async fn on_text_input(&mut self, envelope: ClientEnvelope) -> bool {
        let Some(session) = self.require_session().await else {
            return true;
        };
        let data: TextInputData = match serde_json::from_value(envelope.event_data) {
            Ok(data) => data,
            Err(err) => {
                let reply = ServerEnvelope::error(
                    &format!("invalid text input: {err}"),
                    ErrorKind::ProtocolViolation,
                    Some(session.id.clone()),
                );
                return self.send(reply).await;
            }
        };
        if data.is_final == Some(false) {
            // Non-final client text is a typing indicator, not an utterance
            return true;
        }
        session.on_text_input(data.text).await.is_ok()
    }

    /// The current session, or a protocol error to the client.
    async fn require_session(&mut self) -> Option<Arc<Session>> {
        if let Some(session) = &self.session {
            return Some(session.clone());
        }
        let reply = ServerEnvelope::error(
            "no session: send SYSTEM_CLIENT_SESSION_START first",
            ErrorKind::ProtocolViolation,
            None,
        );
        let _ = self.send(reply).await;
        None
    }

    async fn send(&self, envelope: ServerEnvelope) -> bool {
        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(err) => {
                tracing::error!("failed to serialize envelope: {}", err);
                return true;
            }
        };
        self.sender
            .lock()
            .await
            .send(Message::Text(json))
            .await
            .is_ok()
    }

    async fn teardown(self) {
        if let Some(task) = self.drain_task {
            task.abort();
        }
        if let Some(session) = self.session {
            tracing::info!("[{}] websocket closed, destroying session", session.id);
            self.state.sessions.destroy(&session.id).await;
        }
    }
}

/// Forward the session's outbound events into the socket.
fn spawn_drain(
    session_id: String,
    mut rx: tokio::sync::mpsc::Receiver<voice_dialog_core::OutboundEvent>,
    sender: WsSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let envelope = outbound_to_wire(&session_id, event);
            let json = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(err) => {
                    tracing::error!("[{}] failed to serialize event: {}", session_id, err);
                    continue;
                }
            };
            if sender.lock().await.send(Message::Text(json)).await.is_err() {
                tracing::debug!("[{}] transport send failed, stopping drain", session_id);
                break;
            }
        }
    })
}
