//! Session registry
//!
//! Process-wide map of session ids to sessions, with lifecycle and periodic
//! idle cleanup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;

use voice_dialog_config::Settings;
use voice_dialog_providers::Capabilities;

use crate::session::{Session, SessionConfig};
use crate::SessionError;

const DEFAULT_MAX_SESSIONS: usize = 256;

/// Id-to-session map with create / lookup / destroy lifecycle
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    caps: Capabilities,
    config: SessionConfig,
    base_config: serde_json::Value,
    max_sessions: usize,
    session_timeout: Duration,
    cleanup_interval: Duration,
}

impl SessionRegistry {
    pub fn new(caps: Capabilities, settings: &Settings) -> Self {
        let base_config = serde_json::to_value(settings).unwrap_or(serde_json::Value::Null);
        Self {
            sessions: RwLock::new(HashMap::new()),
            caps,
            config: SessionConfig::from_settings(settings),
            base_config,
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_timeout: Duration::from_secs(settings.transport.session_timeout_seconds),
            cleanup_interval: Duration::from_secs(60),
        }
    }

    /// Override capacity and timing (tests, embedders).
    pub fn with_limits(mut self, max_sessions: usize, session_timeout: Duration) -> Self {
        self.max_sessions = max_sessions;
        self.session_timeout = session_timeout;
        self
    }

    /// Create a session, or attach to a live one when the client proposes a
    /// known id. A missing id gets a server-generated UUID.
    pub fn create(&self, id: Option<String>) -> Result<Arc<Session>, SessionError> {
        if let Some(id) = id.as_deref() {
            if let Some(existing) = self.get(id) {
                existing.touch();
                tracing::info!("Reattached to session: {}", id);
                return Ok(existing);
            }
        }

        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            let timeout = self.session_timeout;
            sessions.retain(|id, session| {
                let keep = !session.is_expired(timeout) && !session.is_closed();
                if !keep {
                    tracing::info!("Evicted expired session: {}", id);
                }
                keep
            });
            if sessions.len() >= self.max_sessions {
                return Err(SessionError::Capacity);
            }
        }

        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if let Some(existing) = sessions.get(&id) {
            return Ok(existing.clone());
        }

        let session = Arc::new(Session::new(
            &id,
            self.caps.clone(),
            self.config.clone(),
            self.base_config.clone(),
        ));
        sessions.insert(id.clone(), session.clone());
        tracing::info!("Created session: {} ({} total)", id, sessions.len());
        Ok(session)
    }

    /// Get a session by ID
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove and close a session
    pub async fn destroy(&self, id: &str) {
        let removed = self.sessions.write().remove(id);
        if let Some(session) = removed {
            session.close().await;
            tracing::info!("Destroyed session: {}", id);
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Close and remove every session idle past the timeout.
    pub async fn cleanup_expired(&self) {
        let expired: Vec<String> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter(|(_, session)| session.is_expired(self.session_timeout))
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in expired {
            tracing::info!("Expiring idle session: {}", id);
            self.destroy(&id).await;
        }
    }

    /// Start a background task that periodically cleans up idle sessions.
    ///
    /// Returns a shutdown sender that stops the task.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(self);
        let interval = registry.cleanup_interval;

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let before = registry.count();
                        registry.cleanup_expired().await;
                        let after = registry.count();
                        if before != after {
                            tracing::info!(
                                "Session cleanup: removed {} idle sessions ({} remaining)",
                                before - after,
                                after
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Session cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Close every session (graceful server shutdown).
    pub async fn shutdown(&self) {
        let all: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write();
            sessions.drain().map(|(_, session)| session).collect()
        };
        for session in all {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Capabilities::default(), &Settings::default())
    }

    #[tokio::test]
    async fn test_create_get_destroy() {
        let registry = registry();
        let session = registry.create(None).unwrap();
        let id = session.id.clone();

        assert!(registry.get(&id).is_some());
        assert_eq!(registry.count(), 1);

        registry.destroy(&id).await;
        assert!(registry.get(&id).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_client_proposed_id_attaches() {
        let registry = registry();
        let first = registry.create(Some("client-1".to_string())).unwrap();
        let second = registry.create(Some("client-1".to_string())).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.count(), 1);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let registry = SessionRegistry::new(Capabilities::default(), &Settings::default())
            .with_limits(1, Duration::from_secs(3600));

        registry.create(Some("a".to_string())).unwrap();
        assert!(matches!(
            registry.create(Some("b".to_string())),
            Err(SessionError::Capacity)
        ));

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let registry = SessionRegistry::new(Capabilities::default(), &Settings::default())
            .with_limits(8, Duration::from_millis(10));

        registry.create(Some("idle".to_string())).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.cleanup_expired().await;
        assert_eq!(registry.count(), 0);
    }
}
