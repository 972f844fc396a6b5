//! Capability providers
//!
//! VAD, ASR, LLM, and TTS are pluggable engines behind async traits. Engines
//! are process-scoped and shared read-only across sessions; implementations
//! must tolerate concurrent calls or serialize internally.

pub mod builtin;
pub mod registry;
pub mod retry;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use voice_dialog_core::{AudioChunk, ErrorKind, HistoryEntry, Transcript};

pub use registry::{build_capabilities, Capabilities, CapabilityRegistry, Registries, RegistryError};
pub use retry::{call_with_retry, with_deadline, RetryPolicy};

/// Provider call errors
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// The provider is missing, misconfigured, or failed non-retryably
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// A call exceeded its deadline
    #[error("provider deadline exceeded: {0}")]
    Timeout(String),

    /// A retryable failure (network hiccup, rate limit)
    #[error("transient provider error: {0}")]
    Transient(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Unavailable(_) => ErrorKind::ProviderUnavailable,
            ProviderError::Timeout(_) => ErrorKind::ProviderTimeout,
            ProviderError::Transient(_) => ErrorKind::ProviderTransient,
        }
    }
}

/// Stream of reply tokens from an LLM
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Stream of synthesized audio chunks from a TTS engine
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<AudioChunk, ProviderError>> + Send>>;

/// Prompt handed to the LLM for one turn
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    pub system_prompt: String,
    pub history: Vec<HistoryEntry>,
    pub user_text: String,
}

/// Synthesis options forwarded to the TTS engine
#[derive(Debug, Clone, Default)]
pub struct SpeechParams {
    pub voice: Option<String>,
    pub rate: Option<f32>,
    pub volume: Option<f32>,
}

/// Voice activity detection over fixed-size PCM windows
#[async_trait]
pub trait VadEngine: Send + Sync {
    /// Speech probability in [0, 1] for one window. Stateless per window.
    async fn detect(&self, window: &[i16]) -> Result<f32, ProviderError>;
}

/// Speech recognition over complete utterance segments
#[async_trait]
pub trait AsrEngine: Send + Sync {
    async fn recognize(
        &self,
        samples: &[i16],
        sample_rate: u32,
        language: Option<&str>,
    ) -> Result<Transcript, ProviderError>;
}

/// Streaming language model generation
///
/// Cancellation is cooperative: dropping the returned stream must abort any
/// in-flight work.
#[async_trait]
pub trait LlmEngine: Send + Sync {
    async fn generate(&self, prompt: &ChatPrompt) -> Result<TokenStream, ProviderError>;
}

/// Streaming speech synthesis
#[async_trait]
pub trait TtsEngine: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        params: &SpeechParams,
    ) -> Result<AudioStream, ProviderError>;
}
