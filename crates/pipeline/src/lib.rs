//! Per-session dialog pipeline
//!
//! The concurrency choreography that turns a microphone stream into a spoken
//! conversation:
//! - PCM ingestion into fixed-size VAD windows
//! - Turn segmentation with end-of-speech detection and barge-in signaling
//! - Sentence splitting between LLM and TTS streams
//! - The reply pipeline interleaving text and audio with bounded backpressure
//! - The turn orchestrator owning cancellation, carry-over, and history

pub mod activation;
pub mod ingest;
pub mod orchestrator;
pub mod reply;
pub mod segmenter;
pub mod splitter;

pub use activation::{ActivationConfig, ActivationGate, GateDecision};
pub use ingest::{IngestBuffer, IngestConfig};
pub use orchestrator::{OrchestratorConfig, TurnOrchestrator, TurnPhase};
pub use reply::{run_reply, speak_system, ProviderDeadlines, ReplyOutcome, ReplyPipelineConfig};
pub use segmenter::{SegmentEvent, SegmenterConfig, SegmenterState, TurnSegmenter};
pub use splitter::SentenceSplitter;

use thiserror::Error;

use voice_dialog_core::{audio::AudioError, ErrorKind};
use voice_dialog_providers::ProviderError;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("invalid audio frame: {0}")]
    InvalidFrame(#[from] AudioError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("outbound channel closed")]
    ChannelClosed,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidFrame(_) => ErrorKind::InvalidFrame,
            PipelineError::Provider(err) => err.kind(),
            PipelineError::ChannelClosed => ErrorKind::QueueOverflow,
        }
    }
}
