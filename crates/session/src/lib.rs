//! Per-client sessions
//!
//! A `Session` owns one client's dialog pipeline: the coordinator task that
//! feeds audio through VAD and segmentation, the turn orchestrator, the
//! conversation history, and the bounded outbound event channel the transport
//! drains. The `SessionRegistry` is the process-wide id-to-session map with
//! lifecycle and idle cleanup.

mod registry;
mod session;

pub use registry::SessionRegistry;
pub use session::{Session, SessionConfig};

use thiserror::Error;

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,

    #[error("maximum session count reached")]
    Capacity,
}
