//! Configuration for the voice dialog server
//!
//! Layered loading: `config/default.yaml`, an optional environment-specific
//! file, then `VOICE_DIALOG__` environment variables (double-underscore
//! separated). Secrets are referenced by env-var name and resolved at
//! provider construction, never stored in files.

mod settings;

pub use settings::{
    load_settings, resolve_api_key, ActivationSettings, AudioConfig, GlobalSettings, ModuleConfig,
    ModulesConfig, ReplySettings, SegmenterSettings, Settings, TimeoutSettings, TransportConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
