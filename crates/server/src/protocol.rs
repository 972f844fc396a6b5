//! Wire protocol
//!
//! JSON envelopes exchanged over the websocket. Binary frames are raw PCM
//! and bypass this module entirely; audio on the way out is base64-encoded.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use voice_dialog_core::{ErrorKind, OutboundEvent};

/// Client-originated event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientEventType {
    SystemClientSessionStart,
    ClientTextInput,
    ClientSpeechEnd,
    ConfigGet,
    ConfigSet,
    ModuleStatusGet,
}

/// Inbound JSON envelope
#[derive(Debug, Deserialize)]
pub struct ClientEnvelope {
    pub event_type: ClientEventType,
    #[serde(default)]
    pub event_data: serde_json::Value,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tag_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// `CLIENT_TEXT_INPUT` payload
#[derive(Debug, Deserialize)]
pub struct TextInputData {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub is_final: Option<bool>,
}

/// Server-originated event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEventType {
    SystemServerSessionStart,
    ServerTextResponse,
    ServerAudioResponse,
    AsrUpdate,
    ServerSystemMessage,
    Error,
    ConfigSnapshot,
    ModuleStatusReport,
}

/// Outbound JSON envelope
#[derive(Debug, Serialize)]
pub struct ServerEnvelope {
    pub event_type: ServerEventType,
    pub event_data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: f64,
}

impl ServerEnvelope {
    pub fn new(
        event_type: ServerEventType,
        event_data: serde_json::Value,
        session_id: Option<String>,
    ) -> Self {
        Self {
            event_type,
            event_data,
            session_id,
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }

    pub fn error(text: &str, kind: ErrorKind, session_id: Option<String>) -> Self {
        Self::new(
            ServerEventType::Error,
            serde_json::json!({ "text": text, "kind": kind.as_str() }),
            session_id,
        )
    }
}

/// Map a core outbound event onto its wire representation.
pub fn outbound_to_wire(session_id: &str, event: OutboundEvent) -> ServerEnvelope {
    let session_id = Some(session_id.to_string());
    match event {
        OutboundEvent::SessionStart { session_id: id } => ServerEnvelope::new(
            ServerEventType::SystemServerSessionStart,
            serde_json::json!({ "session_id": id }),
            session_id,
        ),
        OutboundEvent::TextChunk { text, is_final } => ServerEnvelope::new(
            ServerEventType::ServerTextResponse,
            serde_json::json!({ "text": text, "is_final": is_final }),
            session_id,
        ),
        OutboundEvent::AudioChunk(chunk) => ServerEnvelope::new(
            ServerEventType::ServerAudioResponse,
            serde_json::json!({
                "data": BASE64.encode(&chunk.bytes),
                "codec": chunk.codec.as_str(),
                "sample_rate": chunk.sample_rate,
            }),
            session_id,
        ),
        OutboundEvent::AsrUpdate { text, is_final } => ServerEnvelope::new(
            ServerEventType::AsrUpdate,
            serde_json::json!({ "text": text, "is_final": is_final }),
            session_id,
        ),
        OutboundEvent::SystemMessage { text } => ServerEnvelope::new(
            ServerEventType::ServerSystemMessage,
            serde_json::json!({ "text": text }),
            session_id,
        ),
        OutboundEvent::BackpressureDropped { dropped_samples } => ServerEnvelope::new(
            ServerEventType::ServerSystemMessage,
            serde_json::json!({
                "text": format!("audio backlog overflow: dropped {dropped_samples} samples"),
            }),
            session_id,
        ),
        OutboundEvent::Error { text, kind } => ServerEnvelope::error(&text, kind, session_id),
    }
}
