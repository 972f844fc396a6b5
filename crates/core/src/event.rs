//! Outbound events
//!
//! Everything the dialog core sends toward a client flows through this type.
//! The transport maps each variant onto the wire protocol at its own pace;
//! the core only ever enqueues onto the session's bounded outbound channel.

use crate::audio::AudioChunk;
use crate::error::ErrorKind;

/// Event produced by the dialog core, drained by the transport
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    /// Session established, id assigned
    SessionStart { session_id: String },
    /// One chunk of the assistant's reply text; an empty `is_final` chunk
    /// terminates the turn's text stream
    TextChunk { text: String, is_final: bool },
    /// One chunk of synthesized reply audio
    AudioChunk(AudioChunk),
    /// Recognition result for a user utterance
    AsrUpdate { text: String, is_final: bool },
    /// Scripted or informational message outside a reply turn
    SystemMessage { text: String },
    /// Ingestion backlog overflowed and old samples were discarded
    BackpressureDropped { dropped_samples: usize },
    /// Session-scoped error; the session survives
    Error { text: String, kind: ErrorKind },
}

impl OutboundEvent {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            OutboundEvent::SessionStart { .. } => "session_start",
            OutboundEvent::TextChunk { .. } => "text_chunk",
            OutboundEvent::AudioChunk(_) => "audio_chunk",
            OutboundEvent::AsrUpdate { .. } => "asr_update",
            OutboundEvent::SystemMessage { .. } => "system_message",
            OutboundEvent::BackpressureDropped { .. } => "backpressure_dropped",
            OutboundEvent::Error { .. } => "error",
        }
    }
}
