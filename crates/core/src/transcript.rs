//! Transcript types for ASR output

use serde::{Deserialize, Serialize};

/// Final recognition result for one speech segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// Recognized text
    pub text: String,
    /// Detected language (ISO 639-1 code), if the engine reports one
    pub language: Option<String>,
    /// Id of the segment this transcript came from, when audio-sourced
    pub segment_id: Option<u64>,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            segment_id: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_segment(mut self, segment_id: u64) -> Self {
        self.segment_id = Some(segment_id);
        self
    }

    /// True when the engine produced no words.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_detection() {
        assert!(Transcript::new("   ").is_empty());
        assert!(!Transcript::new("hello").is_empty());
    }

    #[test]
    fn test_builders() {
        let t = Transcript::new("hola").with_language("es").with_segment(7);
        assert_eq!(t.language.as_deref(), Some("es"));
        assert_eq!(t.segment_id, Some(7));
    }
}
