//! Scripted streaming language model
//!
//! Streams canned replies token by token, rotating through the configured
//! list. Falls back to echoing the user when no replies are configured. The
//! optional per-token delay makes barge-in observable in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{ChatPrompt, LlmEngine, ProviderError, TokenStream};

/// Scripted LLM configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptedLlmConfig {
    /// Replies emitted in rotation; empty means echo the user text
    #[serde(default)]
    pub replies: Vec<String>,

    /// Pause between tokens in milliseconds
    #[serde(default)]
    pub token_delay_ms: u64,
}

/// LLM that streams from a fixed script
pub struct ScriptedLlm {
    config: ScriptedLlmConfig,
    next_reply: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(config: ScriptedLlmConfig) -> Self {
        Self {
            config,
            next_reply: AtomicUsize::new(0),
        }
    }

    fn pick_reply(&self, prompt: &ChatPrompt) -> String {
        if self.config.replies.is_empty() {
            return format!("You said: {}.", prompt.user_text);
        }
        let index = self.next_reply.fetch_add(1, Ordering::Relaxed) % self.config.replies.len();
        self.config.replies[index].clone()
    }
}

/// Split text into whitespace-delimited tokens, keeping the separators so
/// that concatenating the tokens reproduces the input exactly.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch.is_whitespace() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[async_trait]
impl LlmEngine for ScriptedLlm {
    async fn generate(&self, prompt: &ChatPrompt) -> Result<TokenStream, ProviderError> {
        let tokens = tokenize(&self.pick_reply(prompt));
        let delay = Duration::from_millis(self.config.token_delay_ms);

        let stream = futures::stream::unfold((tokens, 0usize), move |(tokens, index)| async move {
            if index >= tokens.len() {
                return None;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let token = tokens[index].clone();
            Some((Ok(token), (tokens, index + 1)))
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn prompt(text: &str) -> ChatPrompt {
        ChatPrompt {
            system_prompt: String::new(),
            history: Vec::new(),
            user_text: text.to_string(),
        }
    }

    #[test]
    fn test_tokenize_preserves_text() {
        let tokens = tokenize("Hi there, friend!");
        assert_eq!(tokens.concat(), "Hi there, friend!");
        assert_eq!(tokens.len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_replies_rotate() {
        let llm = ScriptedLlm::new(ScriptedLlmConfig {
            replies: vec!["One.".to_string(), "Two.".to_string()],
            token_delay_ms: 0,
        });

        for expected in ["One.", "Two.", "One."] {
            let mut stream = llm.generate(&prompt("hi")).await.unwrap();
            let mut text = String::new();
            while let Some(token) = stream.next().await {
                text.push_str(&token.unwrap());
            }
            assert_eq!(text, expected);
        }
    }

    #[tokio::test]
    async fn test_echo_fallback() {
        let llm = ScriptedLlm::new(ScriptedLlmConfig::default());
        let mut stream = llm.generate(&prompt("hello")).await.unwrap();
        let mut text = String::new();
        while let Some(token) = stream.next().await {
            text.push_str(&token.unwrap());
        }
        assert_eq!(text, "You said: hello.");
    }
}
