//! Activation gate
//!
//! Optional wake-word policy: while a session is inactive, user input that
//! carries no activation keyword is answered with a scripted prompt instead
//! of reaching the LLM. Activity times out back to the gated state.

use std::time::{Duration, Instant};

/// Gate configuration
#[derive(Debug, Clone)]
pub struct ActivationConfig {
    pub enabled: bool,
    pub keywords: Vec<String>,
    pub deactivation_keywords: Vec<String>,
    pub timeout: Duration,
    pub activation_reply: String,
    pub deactivation_reply: String,
    pub inactive_prompt: String,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            keywords: vec!["hello assistant".to_string()],
            deactivation_keywords: Vec::new(),
            timeout: Duration::from_secs(30),
            activation_reply: "I'm listening. How can I help?".to_string(),
            deactivation_reply: "Goodbye for now.".to_string(),
            inactive_prompt: "Say the wake word to start a conversation.".to_string(),
        }
    }
}

/// Outcome of gating one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Forward the text to the LLM
    Pass { text: String },
    /// A keyword activated the session; `remainder` is the text after it
    Activated {
        reply: String,
        remainder: Option<String>,
    },
    /// An explicit keyword deactivated the session
    Deactivated { reply: String },
    /// Inactive and no keyword: emit the scripted prompt, drop the input
    Rejected { prompt: String },
}

/// Per-session wake-word gate
pub struct ActivationGate {
    config: ActivationConfig,
    active: bool,
    last_interaction: Instant,
}

impl ActivationGate {
    pub fn new(config: ActivationConfig) -> Self {
        Self {
            active: !config.enabled,
            config,
            last_interaction: Instant::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Gate one final utterance.
    pub fn evaluate(&mut self, text: &str) -> GateDecision {
        if !self.config.enabled {
            self.last_interaction = Instant::now();
            return GateDecision::Pass {
                text: text.to_string(),
            };
        }

        if self.active {
            if earliest_match(text, &self.config.deactivation_keywords).is_some() {
                self.active = false;
                return GateDecision::Deactivated {
                    reply: self.config.deactivation_reply.clone(),
                };
            }
            self.last_interaction = Instant::now();
            return GateDecision::Pass {
                text: text.to_string(),
            };
        }

        match earliest_match(text, &self.config.keywords) {
            Some((_, end)) => {
                self.active = true;
                self.last_interaction = Instant::now();
                let remainder = text[end..]
                    .trim_start_matches(|c: char| {
                        c.is_whitespace() || matches!(c, ',' | '，' | '.' | '。' | '!' | '！' | '?' | '？' | ':' | '：' | ';' | '；')
                    })
                    .trim()
                    .to_string();
                GateDecision::Activated {
                    reply: self.config.activation_reply.clone(),
                    remainder: if remainder.is_empty() {
                        None
                    } else {
                        Some(remainder)
                    },
                }
            }
            None => GateDecision::Rejected {
                prompt: self.config.inactive_prompt.clone(),
            },
        }
    }

    /// Check the activation timeout.
    ///
    /// Returns the deactivation reply exactly once when the session falls
    /// back to the gated state.
    pub fn tick(&mut self) -> Option<String> {
        if self.config.enabled && self.active && self.last_interaction.elapsed() >= self.config.timeout
        {
            self.active = false;
            tracing::info!("session deactivated after inactivity timeout");
            return Some(self.config.deactivation_reply.clone());
        }
        None
    }

    /// Replace the gate configuration (per-session config updates).
    pub fn update_config(&mut self, config: ActivationConfig) {
        if !config.enabled {
            self.active = true;
        } else if !self.config.enabled {
            // Gating newly enabled starts in the inactive state
            self.active = false;
        }
        self.config = config;
    }
}

/// Case-insensitive search for the earliest occurrence of any needle.
///
/// Returns the byte range of the match in `haystack`.
fn earliest_match(haystack: &str, needles: &[String]) -> Option<(usize, usize)> {
    needles
        .iter()
        .filter_map(|needle| ci_find(haystack, needle))
        .min_by_key(|(start, _)| *start)
}

/// Case-insensitive substring search that keeps original byte offsets.
fn ci_find(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    if needle.is_empty() {
        return None;
    }
    let needle_lower: Vec<char> = needle.chars().flat_map(char::to_lowercase).collect();

    'outer: for (start, _) in haystack.char_indices() {
        let mut matched = 0;
        for (offset, ch) in haystack[start..].char_indices() {
            for lowered in ch.to_lowercase() {
                if matched >= needle_lower.len() {
                    break;
                }
                if lowered != needle_lower[matched] {
                    continue 'outer;
                }
                matched += 1;
            }
            if matched >= needle_lower.len() {
                return Some((start, start + offset + ch.len_utf8()));
            }
        }
    }
    None
}
