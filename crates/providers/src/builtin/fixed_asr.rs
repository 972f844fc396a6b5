//! Fixed-text speech recognition
//!
//! Returns a configured transcript for every segment. Useful for demos and
//! as a wiring check when no real recognizer is installed.

use async_trait::async_trait;
use serde::Deserialize;

use voice_dialog_core::Transcript;

use crate::{AsrEngine, ProviderError};

/// Fixed ASR configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixedAsrConfig {
    /// Text returned for every recognized segment
    #[serde(default)]
    pub text: String,

    /// Language tag attached to transcripts
    #[serde(default)]
    pub language: Option<String>,
}

/// ASR that answers with a canned transcript
pub struct FixedAsr {
    config: FixedAsrConfig,
}

impl FixedAsr {
    pub fn new(config: FixedAsrConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AsrEngine for FixedAsr {
    async fn recognize(
        &self,
        samples: &[i16],
        _sample_rate: u32,
        language: Option<&str>,
    ) -> Result<Transcript, ProviderError> {
        if samples.is_empty() {
            return Ok(Transcript::new(""));
        }
        let mut transcript = Transcript::new(self.config.text.clone());
        transcript.language = language
            .map(str::to_string)
            .or_else(|| self.config.language.clone());
        Ok(transcript)
    }
}
