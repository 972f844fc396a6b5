//! Session container and coordinator
//!
//! The session's public surface is transport-agnostic: feed it audio frames,
//! text input, and control signals; drain outbound events from the bounded
//! channel. All pipeline state is owned by the coordinator task, which is the
//! only mutator; external readers get snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use voice_dialog_config::{ActivationSettings, Settings};
use voice_dialog_core::{ConversationHistory, HistoryEntry, OutboundEvent};
use voice_dialog_pipeline::{
    speak_system, ActivationConfig, ActivationGate, IngestBuffer, IngestConfig, OrchestratorConfig,
    PipelineError, ProviderDeadlines, ReplyPipelineConfig, SegmentEvent, SegmenterConfig,
    TurnOrchestrator, TurnPhase, TurnSegmenter,
};
use voice_dialog_providers::{Capabilities, RetryPolicy, SpeechParams, TtsEngine, VadEngine};

use crate::SessionError;

/// History entries kept per session
const HISTORY_CAPACITY: usize = 256;

/// Inbound command queue depth (audio frames, text, control)
const INBOUND_CAPACITY: usize = 32;

/// Everything a session needs, assembled once from settings
#[derive(Clone)]
pub struct SessionConfig {
    pub ingest: IngestConfig,
    pub segmenter: SegmenterConfig,
    pub orchestrator: OrchestratorConfig,
    pub activation: ActivationConfig,
    pub outbound_capacity: usize,
    /// Cadence of the activation-timeout check
    pub activation_tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            segmenter: SegmenterConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            activation: ActivationConfig::default(),
            outbound_capacity: 64,
            activation_tick: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let tts_config = settings.modules.tts.adapter_config();
        let speech = SpeechParams {
            voice: tts_config
                .get("voice")
                .and_then(|v| v.as_str())
                .map(String::from),
            rate: tts_config.get("rate").and_then(|v| v.as_f64()).map(|v| v as f32),
            volume: tts_config
                .get("volume")
                .and_then(|v| v.as_f64())
                .map(|v| v as f32),
        };
        let asr_language = settings
            .modules
            .asr
            .adapter_config()
            .get("language")
            .and_then(|v| v.as_str())
            .map(String::from);

        let reply = ReplyPipelineConfig {
            max_pending_chars: settings.reply.max_pending_chars,
            deadlines: ProviderDeadlines {
                asr: Duration::from_millis(settings.timeouts.asr_ms),
                llm_first_token: Duration::from_millis(settings.timeouts.llm_first_token_ms),
                llm_token: Duration::from_millis(settings.timeouts.llm_token_ms),
                tts: Duration::from_millis(settings.timeouts.tts_ms),
            },
            retry: RetryPolicy::new(settings.timeouts.provider_retries),
        };

        Self {
            ingest: IngestConfig {
                sample_rate: settings.audio.sample_rate,
                window_samples: settings.audio.window_samples,
                max_backlog_ms: settings.audio.max_backlog_ms,
            },
            segmenter: SegmenterConfig {
                sample_rate: settings.audio.sample_rate,
                speech_threshold: settings.segmenter.speech_threshold,
                eos_silence_ms: settings.segmenter.eos_silence_ms,
                max_segment_ms: settings.segmenter.max_segment_ms,
            },
            orchestrator: OrchestratorConfig {
                sample_rate: settings.audio.sample_rate,
                system_prompt: settings.reply.system_prompt.clone(),
                history_limit: settings.reply.history_limit,
                carryover_window_ms: settings.reply.carryover_window_ms,
                tts_for_text_input: settings.reply.tts_for_text_input,
                asr_language,
                speech,
                reply,
                shutdown_grace: Duration::from_millis(settings.timeouts.shutdown_grace_ms),
            },
            activation: activation_config(&settings.activation_settings),
            outbound_capacity: settings.reply.outbound_capacity,
            activation_tick: Duration::from_secs(1),
        }
    }
}

fn activation_config(settings: &ActivationSettings) -> ActivationConfig {
    ActivationConfig {
        enabled: settings.enable_prompt_activation,
        keywords: settings.activation_keywords.clone(),
        deactivation_keywords: settings.deactivation_keywords.clone(),
        timeout: Duration::from_secs(settings.activation_timeout_seconds),
        activation_reply: settings.activation_reply.clone(),
        deactivation_reply: settings.deactivation_reply.clone(),
        inactive_prompt: settings.prompt_if_not_activated.clone(),
    }
}

enum SessionCommand {
    Audio(Vec<u8>),
    Text(String),
    SpeechEnd,
    Close,
}

/// One connected client's dialog state
pub struct Session {
    /// Session ID
    pub id: String,
    cmd_tx: mpsc::Sender<SessionCommand>,
    outbound_rx: Mutex<Option<mpsc::Receiver<OutboundEvent>>>,
    gate: Arc<Mutex<ActivationGate>>,
    history: Arc<Mutex<ConversationHistory>>,
    phase: Arc<Mutex<TurnPhase>>,
    overlay: Mutex<serde_json::Value>,
    created_at: Instant,
    last_activity: RwLock<Instant>,
    closed: AtomicBool,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    shutdown_grace: Duration,
}

impl Session {
    /// Create a session and spawn its coordinator task.
    ///
    /// `base_config` is the JSON view of the effective settings, used as the
    /// starting point for per-session `CONFIG_SET` overlays.
    pub fn new(
        id: impl Into<String>,
        caps: Capabilities,
        config: SessionConfig,
        base_config: serde_json::Value,
    ) -> Self {
        let id = id.into();
        let (cmd_tx, cmd_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(config.outbound_capacity);

        let history = Arc::new(Mutex::new(ConversationHistory::new(HISTORY_CAPACITY)));
        let gate = Arc::new(Mutex::new(ActivationGate::new(config.activation.clone())));

        let orchestrator = TurnOrchestrator::new(
            caps.clone(),
            config.orchestrator.clone(),
            history.clone(),
            gate.clone(),
            out_tx.clone(),
        );
        let phase = Arc::new(Mutex::new(TurnPhase::Listening));

        let coordinator = Coordinator {
            session_id: id.clone(),
            cmd_rx,
            ingest: IngestBuffer::new(config.ingest.clone()),
            segmenter: TurnSegmenter::new(config.segmenter.clone()),
            orchestrator,
            vad: caps.vad.clone(),
            tts: caps.tts.clone(),
            speech: config.orchestrator.speech.clone(),
            tts_deadline: config.orchestrator.reply.deadlines.tts,
            gate: gate.clone(),
            outbound: out_tx,
            tick: config.activation_tick,
            phase: phase.clone(),
        };
        let handle = tokio::spawn(coordinator.run());

        tracing::info!("Created session context: {}", id);

        Self {
            id,
            cmd_tx,
            outbound_rx: Mutex::new(Some(out_rx)),
            gate,
            history,
            phase,
            overlay: Mutex::new(base_config),
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
            closed: AtomicBool::new(false),
            coordinator: Mutex::new(Some(handle)),
            shutdown_grace: config.orchestrator.shutdown_grace,
        }
    }

    /// Feed one inbound PCM frame.
    pub async fn on_audio_frame(&self, bytes: Vec<u8>) -> Result<(), SessionError> {
        self.touch();
        self.send(SessionCommand::Audio(bytes)).await
    }

    /// Feed one completed user text input.
    pub async fn on_text_input(&self, text: String) -> Result<(), SessionError> {
        self.touch();
        self.send(SessionCommand::Text(text)).await
    }

    /// Force the open speech segment closed (push-to-talk release).
    pub async fn on_speech_end(&self) -> Result<(), SessionError> {
        self.touch();
        self.send(SessionCommand::SpeechEnd).await
    }

    /// Take the outbound event receiver. Yields once; the transport owns it.
    pub fn take_outbound(&self) -> Option<mpsc::Receiver<OutboundEvent>> {
        self.outbound_rx.lock().take()
    }

    /// Snapshot of the conversation history.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().snapshot()
    }

    /// Current turn phase.
    pub fn phase(&self) -> TurnPhase {
        *self.phase.lock()
    }

    /// Whether the activation gate currently lets input through.
    pub fn is_activated(&self) -> bool {
        self.gate.lock().is_active()
    }

    /// Current per-session config snapshot.
    pub fn config_snapshot(&self) -> serde_json::Value {
        self.overlay.lock().clone()
    }

    /// Deep-merge a config patch into the session overlay.
    ///
    /// `activation_settings` changes take effect immediately; other keys are
    /// recorded and reported back in the snapshot.
    pub fn merge_config(&self, patch: &serde_json::Value) -> serde_json::Value {
        let mut overlay = self.overlay.lock();
        deep_update(&mut overlay, patch);

        if patch.get("activation_settings").is_some() {
            if let Some(merged) = overlay.get("activation_settings") {
                match serde_json::from_value::<ActivationSettings>(merged.clone()) {
                    Ok(settings) => {
                        self.gate.lock().update_config(activation_config(&settings));
                        tracing::info!("[{}] activation settings updated", self.id);
                    }
                    Err(err) => {
                        tracing::warn!("[{}] invalid activation_settings update: {}", self.id, err);
                    }
                }
            }
        }
        overlay.clone()
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.read().elapsed() > timeout
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Cancel any active turn, stop the coordinator, and release resources.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Closing session: {}", self.id);

        let _ = self.cmd_tx.send(SessionCommand::Close).await;

        let handle = self.coordinator.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(self.shutdown_grace, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!(
                    "[{}] coordinator did not stop within {:?}; aborting",
                    self.id,
                    self.shutdown_grace
                );
                handle.abort();
            }
        }
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

fn deep_update(base: &mut serde_json::Value, patch: &serde_json::Value) {
    if let (Some(base_map), Some(patch_map)) = (base.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_map {
            match base_map.get_mut(key) {
                Some(existing) if existing.is_object() && value.is_object() => {
                    deep_update(existing, value);
                }
                _ => {
                    base_map.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Single-flight task owning all mutable pipeline state for one session
struct Coordinator {
    session_id: String,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    ingest: IngestBuffer,
    segmenter: TurnSegmenter,
    orchestrator: TurnOrchestrator,
    vad: Option<Arc<dyn VadEngine>>,
    tts: Option<Arc<dyn TtsEngine>>,
    speech: SpeechParams,
    tts_deadline: Duration,
    gate: Arc<Mutex<ActivationGate>>,
    outbound: mpsc::Sender<OutboundEvent>,
    tick: Duration,
    phase: Arc<Mutex<TurnPhase>>,
}

impl Coordinator {
    async fn run(mut self) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => {
                    let result = match command {
                        Some(SessionCommand::Audio(bytes)) => self.handle_audio(&bytes).await,
                        Some(SessionCommand::Text(text)) => {
                            self.orchestrator.submit_text(text).await;
                            Ok(())
                        }
                        Some(SessionCommand::SpeechEnd) => {
                            match self.segmenter.flush() {
                                Some(event) => self.handle_segment_event(event).await,
                                None => Ok(()),
                            }
                        }
                        Some(SessionCommand::Close) | None => break,
                    };
                    if result.is_err() {
                        tracing::debug!("[{}] outbound channel closed", self.session_id);
                        break;
                    }
                }
                _ = interval.tick() => {
                    let reply = self.gate.lock().tick();
                    if let Some(reply) = reply {
                        let spoken = speak_system(
                            self.tts.as_ref(),
                            &reply,
                            &self.speech,
                            self.tts_deadline,
                            &self.outbound,
                        )
                        .await;
                        if spoken.is_err() {
                            break;
                        }
                    }
                }
            }
            *self.phase.lock() = self.orchestrator.phase();
        }

        self.orchestrator.cancel_active().await;
        self.ingest.clear();
        self.segmenter.reset();
        tracing::debug!("[{}] coordinator stopped", self.session_id);
    }

    async fn handle_audio(&mut self, bytes: &[u8]) -> Result<(), PipelineError> {
        match self.ingest.push_bytes(bytes) {
            Ok(0) => {}
            Ok(dropped) => {
                tracing::warn!(
                    "[{}] audio backlog overflow, dropped {} samples",
                    self.session_id,
                    dropped
                );
                self.emit(OutboundEvent::BackpressureDropped {
                    dropped_samples: dropped,
                })
                .await?;
            }
            Err(err) => {
                // Malformed frames are reported; the session survives
                self.emit(OutboundEvent::Error {
                    text: err.to_string(),
                    kind: err.kind(),
                })
                .await?;
                return Ok(());
            }
        }

        let Some(vad) = self.vad.clone() else {
            // No VAD installed: audio cannot be segmented
            self.ingest.clear();
            return Ok(());
        };

        loop {
            let Some((offset, window)) = self.ingest.next_window() else {
                break;
            };
            let probability = match vad.detect(window).await {
                Ok(probability) => probability,
                Err(err) => {
                    tracing::warn!("[{}] vad error: {}", self.session_id, err);
                    0.0
                }
            };
            let event = self.segmenter.process(offset, window, probability);
            if let Some(event) = event {
                self.handle_segment_event(event).await?;
            }
        }
        Ok(())
    }

    async fn handle_segment_event(&mut self, event: SegmentEvent) -> Result<(), PipelineError> {
        match event {
            SegmentEvent::SpeechStarted { .. } => {
                self.orchestrator.on_speech_started();
            }
            SegmentEvent::EndOfSpeech { segment, forced } => {
                tracing::debug!(
                    "[{}] segment {} closed ({} samples, forced={})",
                    self.session_id,
                    segment.id,
                    segment.samples.len(),
                    forced
                );
                self.orchestrator.submit_segment(segment).await;
            }
        }
        Ok(())
    }

    async fn emit(&self, event: OutboundEvent) -> Result<(), PipelineError> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_update_merges_nested() {
        let mut base = serde_json::json!({
            "transport": { "host": "0.0.0.0", "port": 8765 },
            "reply": { "max_pending_chars": 120 }
        });
        let patch = serde_json::json!({
            "transport": { "port": 9000 },
            "extra": true
        });
        deep_update(&mut base, &patch);

        assert_eq!(base["transport"]["host"], "0.0.0.0");
        assert_eq!(base["transport"]["port"], 9000);
        assert_eq!(base["reply"]["max_pending_chars"], 120);
        assert_eq!(base["extra"], true);
    }

    #[test]
    fn test_session_config_from_settings() {
        let mut settings = Settings::default();
        settings.audio.window_samples = 256;
        settings.segmenter.eos_silence_ms = 900;
        settings.timeouts.asr_ms = 5000;
        settings.modules.tts.config = serde_json::json!({ "tone": { "voice": "low" } });

        let config = SessionConfig::from_settings(&settings);
        assert_eq!(config.ingest.window_samples, 256);
        assert_eq!(config.segmenter.eos_silence_ms, 900);
        assert_eq!(
            config.orchestrator.reply.deadlines.asr,
            Duration::from_secs(5)
        );
        assert_eq!(config.orchestrator.speech.voice.as_deref(), Some("low"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let session = Session::new(
            "s1",
            Capabilities::default(),
            SessionConfig::default(),
            serde_json::json!({}),
        );
        session.close().await;
        session.close().await;
        assert!(session.is_closed());
        assert!(session.on_text_input("late".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_config_merge_updates_gate() {
        let session = Session::new(
            "s2",
            Capabilities::default(),
            SessionConfig::default(),
            serde_json::to_value(Settings::default()).unwrap(),
        );
        assert!(session.is_activated());

        let snapshot = session.merge_config(&serde_json::json!({
            "activation_settings": { "enable_prompt_activation": true }
        }));
        assert_eq!(
            snapshot["activation_settings"]["enable_prompt_activation"],
            true
        );
        assert!(!session.is_activated());

        session.close().await;
    }
}
