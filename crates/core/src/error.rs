//! Wire-facing error taxonomy
//!
//! Every error surfaced to a client carries one of these kinds. Per-session
//! errors never terminate the process; `Fatal` is reserved for startup
//! failures.

use serde::{Deserialize, Serialize};

/// Error classification shared across crates and reported on `ERROR` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed audio frame from the client
    InvalidFrame,
    /// A capability provider is missing or failed non-retryably
    ProviderUnavailable,
    /// A capability call exceeded its deadline
    ProviderTimeout,
    /// A retryable provider failure
    ProviderTransient,
    /// Outbound queue could not accept an event (transport dead)
    QueueOverflow,
    /// Inbound message could not be parsed
    ProtocolViolation,
    /// Unrecoverable startup error
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidFrame => "invalid_frame",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::ProviderTimeout => "provider_timeout",
            ErrorKind::ProviderTransient => "provider_transient",
            ErrorKind::QueueOverflow => "queue_overflow",
            ErrorKind::ProtocolViolation => "protocol_violation",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ProviderTimeout).unwrap();
        assert_eq!(json, "\"provider_timeout\"");
    }
}
