//! Capability registry
//!
//! Maps adapter names to factories, one registry per capability category.
//! Resolved once at startup; an unknown adapter name is fatal and prevents
//! the server from starting.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use voice_dialog_config::ModulesConfig;

use crate::builtin;
use crate::{AsrEngine, LlmEngine, TtsEngine, VadEngine};

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("unknown {category} provider '{name}' (available: {available})")]
    UnknownProvider {
        category: &'static str,
        name: String,
        available: String,
    },

    #[error("failed to construct {category} provider '{name}': {message}")]
    Construction {
        category: &'static str,
        name: String,
        message: String,
    },
}

/// Factory building one provider instance from its adapter config
pub type ProviderFactory<T> =
    Box<dyn Fn(&serde_json::Value) -> Result<Arc<T>, RegistryError> + Send + Sync>;

/// Name-to-factory mapping for one capability category
pub struct CapabilityRegistry<T: ?Sized> {
    category: &'static str,
    factories: HashMap<String, ProviderFactory<T>>,
}

impl<T: ?Sized> CapabilityRegistry<T> {
    pub fn new(category: &'static str) -> Self {
        Self {
            category,
            factories: HashMap::new(),
        }
    }

    /// Register a factory under `name`. Re-registering replaces the factory.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: ProviderFactory<T>,
    ) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Instantiate the provider registered under `name`.
    pub fn create(&self, name: &str, config: &serde_json::Value) -> Result<Arc<T>, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownProvider {
                category: self.category,
                name: name.to_string(),
                available: self.available().join(", "),
            })?;

        let provider = factory(config)?;
        tracing::info!("Created {} provider '{}'", self.category, name);
        Ok(provider)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered adapter names, sorted for stable error messages.
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

/// All four capability registries
pub struct Registries {
    pub vad: CapabilityRegistry<dyn VadEngine>,
    pub asr: CapabilityRegistry<dyn AsrEngine>,
    pub llm: CapabilityRegistry<dyn LlmEngine>,
    pub tts: CapabilityRegistry<dyn TtsEngine>,
}

impl Registries {
    /// Empty registries, for callers that install only their own adapters.
    pub fn empty() -> Self {
        Self {
            vad: CapabilityRegistry::new("vad"),
            asr: CapabilityRegistry::new("asr"),
            llm: CapabilityRegistry::new("llm"),
            tts: CapabilityRegistry::new("tts"),
        }
    }

    /// Registries pre-loaded with the built-in reference adapters.
    pub fn builtin() -> Self {
        let mut regs = Self::empty();
        builtin::install(&mut regs);
        regs
    }
}

/// Process-scoped provider set shared read-only across sessions
#[derive(Clone, Default)]
pub struct Capabilities {
    pub vad: Option<Arc<dyn VadEngine>>,
    pub asr: Option<Arc<dyn AsrEngine>>,
    pub llm: Option<Arc<dyn LlmEngine>>,
    pub tts: Option<Arc<dyn TtsEngine>>,
}

impl Capabilities {
    /// Human-readable module states for status reports.
    pub fn module_states(&self) -> Vec<(&'static str, &'static str)> {
        fn state<T: ?Sized>(module: &Option<Arc<T>>) -> &'static str {
            if module.is_some() {
                "ready"
            } else {
                "disabled"
            }
        }
        vec![
            ("vad", state(&self.vad)),
            ("asr", state(&self.asr)),
            ("llm", state(&self.llm)),
            ("tts", state(&self.tts)),
        ]
    }
}

/// Instantiate every enabled module from configuration.
///
/// Called once at startup; any failure here is fatal.
pub fn build_capabilities(
    modules: &ModulesConfig,
    regs: &Registries,
) -> Result<Capabilities, RegistryError> {
    let mut caps = Capabilities::default();

    if modules.vad.enabled {
        caps.vad = Some(
            regs.vad
                .create(&modules.vad.adapter_type, &modules.vad.adapter_config())?,
        );
    }
    if modules.asr.enabled {
        caps.asr = Some(
            regs.asr
                .create(&modules.asr.adapter_type, &modules.asr.adapter_config())?,
        );
    }
    if modules.llm.enabled {
        caps.llm = Some(
            regs.llm
                .create(&modules.llm.adapter_type, &modules.llm.adapter_config())?,
        );
    }
    if modules.tts.enabled {
        caps.tts = Some(
            regs.tts
                .create(&modules.tts.adapter_type, &modules.tts.adapter_config())?,
        );
    }

    Ok(caps)
}
