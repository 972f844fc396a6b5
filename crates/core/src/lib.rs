//! Core types for the voice dialog server
//!
//! This crate provides foundational types used across all other crates:
//! - Audio frames, speech segments, and PCM helpers
//! - Transcripts
//! - Conversation history
//! - Outbound events and the wire-facing error taxonomy

pub mod audio;
pub mod error;
pub mod event;
pub mod history;
pub mod transcript;

pub use audio::{decode_pcm16, encode_pcm16, AudioChunk, AudioCodec, SpeechSegment};
pub use error::ErrorKind;
pub use event::OutboundEvent;
pub use history::{ConversationHistory, HistoryEntry, Role};
pub use transcript::Transcript;
