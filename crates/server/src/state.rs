//! Application State

use std::sync::Arc;

use voice_dialog_config::Settings;
use voice_dialog_providers::Capabilities;
use voice_dialog_session::SessionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Effective settings
    pub settings: Arc<Settings>,
    /// Process-wide session registry
    pub sessions: Arc<SessionRegistry>,
    /// Shared capability providers
    pub caps: Capabilities,
}

impl AppState {
    pub fn new(settings: Settings, caps: Capabilities) -> Self {
        let sessions = Arc::new(SessionRegistry::new(caps.clone(), &settings));
        Self {
            settings: Arc::new(settings),
            sessions,
            caps,
        }
    }

    /// Module → state map for `MODULE_STATUS_REPORT`.
    pub fn module_status(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (module, state) in self.caps.module_states() {
            map.insert(module.to_string(), serde_json::Value::String(state.into()));
        }
        serde_json::Value::Object(map)
    }
}
