//! Conversation history
//!
//! One entry per completed or interrupted turn side. The session owns the
//! history; readers take snapshots under a short-lived lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One utterance in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Bounded conversation history for one session
#[derive(Debug)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
    max_entries: usize,
}

impl ConversationHistory {
    /// Create a history capped at `max_entries` (oldest entries evicted).
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(HistoryEntry::new(Role::User, text));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(HistoryEntry::new(Role::Assistant, text));
    }

    fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
        }
    }

    /// Copy of the full history, oldest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.clone()
    }

    /// Copy of the most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        let start = self.entries.len().saturating_sub(n);
        self.entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
