//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Process-wide settings
    #[serde(default)]
    pub global_settings: GlobalSettings,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Capability modules
    #[serde(default)]
    pub modules: ModulesConfig,

    /// Wake-word gating
    #[serde(default)]
    pub activation_settings: ActivationSettings,

    /// Audio ingestion tuning
    #[serde(default)]
    pub audio: AudioConfig,

    /// Turn segmentation tuning
    #[serde(default)]
    pub segmenter: SegmenterSettings,

    /// Reply pipeline tuning
    #[serde(default)]
    pub reply: ReplySettings,

    /// Provider deadlines and retry policy
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

impl Settings {
    /// Validate settings after load
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.window_samples == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.window_samples".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.sample_rate".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        // EOS must be observable: at least one VAD window of silence
        let window_ms = self.audio.window_samples as u64 * 1000 / self.audio.sample_rate as u64;
        if self.segmenter.eos_silence_ms < window_ms {
            return Err(ConfigError::InvalidValue {
                field: "segmenter.eos_silence_ms".to_string(),
                message: format!("must be at least one window period ({window_ms} ms)"),
            });
        }

        if !(0.0..=1.0).contains(&self.segmenter.speech_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "segmenter.speech_threshold".to_string(),
                message: "must be within [0, 1]".to_string(),
            });
        }

        if self.reply.outbound_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reply.outbound_capacity".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Process-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Log level: DEBUG, INFO, WARNING, ERROR
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum inbound websocket message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Idle sessions are destroyed after this long without activity
    #[serde(default = "default_session_timeout")]
    pub session_timeout_seconds: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8765
}
fn default_max_message_size() -> usize {
    1024 * 1024
}
fn default_session_timeout() -> u64 {
    1800
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_message_size: default_max_message_size(),
            session_timeout_seconds: default_session_timeout(),
        }
    }
}

/// One capability module entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Whether the module participates in the pipeline
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Key in the capability registry
    #[serde(default)]
    pub adapter_type: String,

    /// Adapter-specific configuration, keyed by adapter type
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ModuleConfig {
    fn named(adapter_type: &str) -> Self {
        Self {
            enabled: true,
            adapter_type: adapter_type.to_string(),
            config: serde_json::Value::Null,
        }
    }

    /// The configuration block for the selected adapter, `{}` if absent.
    pub fn adapter_config(&self) -> serde_json::Value {
        self.config
            .get(&self.adapter_type)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}))
    }
}

fn default_true() -> bool {
    true
}

/// Capability module set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    #[serde(default = "default_vad_module")]
    pub vad: ModuleConfig,

    #[serde(default = "default_asr_module")]
    pub asr: ModuleConfig,

    #[serde(default = "default_llm_module")]
    pub llm: ModuleConfig,

    #[serde(default = "default_tts_module")]
    pub tts: ModuleConfig,
}

fn default_vad_module() -> ModuleConfig {
    ModuleConfig::named("energy")
}
fn default_asr_module() -> ModuleConfig {
    ModuleConfig::named("fixed")
}
fn default_llm_module() -> ModuleConfig {
    ModuleConfig::named("scripted")
}
fn default_tts_module() -> ModuleConfig {
    ModuleConfig::named("tone")
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            vad: default_vad_module(),
            asr: default_asr_module(),
            llm: default_llm_module(),
            tts: default_tts_module(),
        }
    }
}

/// Wake-word gating settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationSettings {
    /// When enabled, input is dropped until an activation keyword is heard
    #[serde(default)]
    pub enable_prompt_activation: bool,

    #[serde(default = "default_activation_keywords")]
    pub activation_keywords: Vec<String>,

    #[serde(default)]
    pub deactivation_keywords: Vec<String>,

    /// Active sessions fall back to gated after this long without input
    #[serde(default = "default_activation_timeout")]
    pub activation_timeout_seconds: u64,

    #[serde(default = "default_activation_reply")]
    pub activation_reply: String,

    #[serde(default = "default_deactivation_reply")]
    pub deactivation_reply: String,

    /// Scripted message emitted when gated input carries no keyword
    #[serde(default = "default_inactive_prompt")]
    pub prompt_if_not_activated: String,
}

fn default_activation_keywords() -> Vec<String> {
    vec!["hello assistant".to_string()]
}
fn default_activation_timeout() -> u64 {
    30
}
fn default_activation_reply() -> String {
    "I'm listening. How can I help?".to_string()
}
fn default_deactivation_reply() -> String {
    "Goodbye for now.".to_string()
}
fn default_inactive_prompt() -> String {
    "Say the wake word to start a conversation.".to_string()
}

impl Default for ActivationSettings {
    fn default() -> Self {
        Self {
            enable_prompt_activation: false,
            activation_keywords: default_activation_keywords(),
            deactivation_keywords: Vec::new(),
            activation_timeout_seconds: default_activation_timeout(),
            activation_reply: default_activation_reply(),
            deactivation_reply: default_deactivation_reply(),
            prompt_if_not_activated: default_inactive_prompt(),
        }
    }
}

/// Audio ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Inbound PCM sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// VAD window size in samples
    #[serde(default = "default_window_samples")]
    pub window_samples: usize,

    /// Unconsumed backlog beyond this is dropped oldest-first
    #[serde(default = "default_max_backlog_ms")]
    pub max_backlog_ms: u64,
}

fn default_sample_rate() -> u32 {
    16_000
}
fn default_window_samples() -> usize {
    512
}
fn default_max_backlog_ms() -> u64 {
    10_000
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            window_samples: default_window_samples(),
            max_backlog_ms: default_max_backlog_ms(),
        }
    }
}

/// Turn segmentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterSettings {
    /// Speech probability at or above this counts as speech
    #[serde(default = "default_speech_threshold")]
    pub speech_threshold: f32,

    /// Silence run that closes an utterance
    #[serde(default = "default_eos_silence_ms")]
    pub eos_silence_ms: u64,

    /// Utterances are force-closed at this duration
    #[serde(default = "default_max_segment_ms")]
    pub max_segment_ms: u64,
}

fn default_speech_threshold() -> f32 {
    0.5
}
fn default_eos_silence_ms() -> u64 {
    1200
}
fn default_max_segment_ms() -> u64 {
    5000
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            speech_threshold: default_speech_threshold(),
            eos_silence_ms: default_eos_silence_ms(),
            max_segment_ms: default_max_segment_ms(),
        }
    }
}

/// Reply pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplySettings {
    /// Sentence buffer is flushed to TTS at this length even without a terminator
    #[serde(default = "default_max_pending_chars")]
    pub max_pending_chars: usize,

    /// Outbound event queue capacity; senders block when full
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Barge-in carry-over applies when the gap between segments is below this
    #[serde(default = "default_carryover_window_ms")]
    pub carryover_window_ms: u64,

    /// System prompt prepended to every LLM request
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// History entries forwarded to the LLM
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Synthesize audio for text-input turns as well
    #[serde(default = "default_true")]
    pub tts_for_text_input: bool,
}

fn default_max_pending_chars() -> usize {
    120
}
fn default_outbound_capacity() -> usize {
    64
}
fn default_carryover_window_ms() -> u64 {
    8000
}
fn default_system_prompt() -> String {
    "You are a helpful voice assistant. Answer briefly and conversationally.".to_string()
}
fn default_history_limit() -> usize {
    32
}

impl Default for ReplySettings {
    fn default() -> Self {
        Self {
            max_pending_chars: default_max_pending_chars(),
            outbound_capacity: default_outbound_capacity(),
            carryover_window_ms: default_carryover_window_ms(),
            system_prompt: default_system_prompt(),
            history_limit: default_history_limit(),
            tts_for_text_input: true,
        }
    }
}

/// Provider deadlines and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_asr_ms")]
    pub asr_ms: u64,

    #[serde(default = "default_llm_first_token_ms")]
    pub llm_first_token_ms: u64,

    #[serde(default = "default_llm_token_ms")]
    pub llm_token_ms: u64,

    #[serde(default = "default_tts_ms")]
    pub tts_ms: u64,

    /// Transient provider failures are retried this many times
    #[serde(default = "default_provider_retries")]
    pub provider_retries: u32,

    /// In-flight work is abandoned this long after session close
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_asr_ms() -> u64 {
    15_000
}
fn default_llm_first_token_ms() -> u64 {
    10_000
}
fn default_llm_token_ms() -> u64 {
    30_000
}
fn default_tts_ms() -> u64 {
    20_000
}
fn default_provider_retries() -> u32 {
    2
}
fn default_shutdown_grace_ms() -> u64 {
    5000
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            asr_ms: default_asr_ms(),
            llm_first_token_ms: default_llm_first_token_ms(),
            llm_token_ms: default_llm_token_ms(),
            tts_ms: default_tts_ms(),
            provider_retries: default_provider_retries(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// Resolve an adapter's API key through its `api_key_env_var` reference.
///
/// Returns `None` when the adapter config names no env var or the variable
/// is unset.
pub fn resolve_api_key(adapter_config: &serde_json::Value) -> Option<String> {
    let var_name = adapter_config.get("api_key_env_var")?.as_str()?;
    match std::env::var(var_name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => {
            tracing::warn!("api_key_env_var {} is not set", var_name);
            None
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (VOICE_DIALOG__ prefix)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{env_name}")).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_DIALOG")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.audio.window_samples, 512);
        assert_eq!(settings.segmenter.eos_silence_ms, 1200);
        assert_eq!(settings.reply.outbound_capacity, 64);
    }

    #[test]
    fn test_validation_rejects_bad_threshold() {
        let mut settings = Settings::default();
        settings.segmenter.speech_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_short_eos() {
        let mut settings = Settings::default();
        settings.segmenter.eos_silence_ms = 10;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_adapter_config_lookup() {
        let module = ModuleConfig {
            enabled: true,
            adapter_type: "tone".to_string(),
            config: serde_json::json!({ "tone": { "voice": "low" } }),
        };
        assert_eq!(module.adapter_config()["voice"], "low");

        let bare = ModuleConfig::named("tone");
        assert_eq!(bare.adapter_config(), serde_json::json!({}));
    }

    #[test]
    fn test_resolve_api_key_missing() {
        let cfg = serde_json::json!({ "api_key_env_var": "VOICE_DIALOG_TEST_KEY_UNSET" });
        assert!(resolve_api_key(&cfg).is_none());
        assert!(resolve_api_key(&serde_json::json!({})).is_none());
    }
}
