//! Turn orchestrator
//!
//! Drives one conversation turn at a time: segment → transcript → activation
//! check → reply. Owns the per-turn cancellation token. A new segment or text
//! input preempts the active turn, awaits its teardown, and only then starts
//! its own; `SpeechStarted` from the segmenter cancels eagerly so the old
//! reply stops streaming while the new utterance is still being spoken.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use voice_dialog_core::{ConversationHistory, ErrorKind, OutboundEvent, SpeechSegment};
use voice_dialog_providers::{
    call_with_retry, with_deadline, Capabilities, ChatPrompt, SpeechParams,
};

use crate::activation::{ActivationGate, GateDecision};
use crate::reply::{run_reply, speak_system, ReplyPipelineConfig};
use crate::PipelineError;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Inbound PCM sample rate in Hz
    pub sample_rate: u32,
    /// System prompt prepended to every LLM request
    pub system_prompt: String,
    /// History entries forwarded to the LLM
    pub history_limit: usize,
    /// Barge-in carry-over applies when the segment gap is below this
    pub carryover_window_ms: u64,
    /// Synthesize audio for text-input turns as well
    pub tts_for_text_input: bool,
    /// Language hint forwarded to the ASR
    pub asr_language: Option<String>,
    /// Synthesis options
    pub speech: SpeechParams,
    /// Reply pipeline tuning
    pub reply: ReplyPipelineConfig,
    /// In-flight work is abandoned this long after cancellation
    pub shutdown_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            system_prompt: String::new(),
            history_limit: 32,
            carryover_window_ms: 8000,
            tts_for_text_input: true,
            asr_language: None,
            speech: SpeechParams::default(),
            reply: ReplyPipelineConfig::default(),
            shutdown_grace: Duration::from_millis(5000),
        }
    }
}

/// Where the current turn is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Listening,
    Transcribing,
    Generating,
    Speaking,
}

/// Cross-turn state for barge-in carry-over
#[derive(Default)]
struct TurnMemory {
    last_user_text: Option<String>,
    last_cancelled: bool,
    last_segment_end_ms: Option<u64>,
}

struct ActiveTurn {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Shared state handed to each spawned turn
#[derive(Clone)]
struct TurnContext {
    caps: Capabilities,
    config: Arc<OrchestratorConfig>,
    history: Arc<Mutex<ConversationHistory>>,
    gate: Arc<Mutex<ActivationGate>>,
    memory: Arc<Mutex<TurnMemory>>,
    phase: Arc<Mutex<TurnPhase>>,
    outbound: mpsc::Sender<OutboundEvent>,
}

enum TurnInput {
    Segment(SpeechSegment),
    Text(String),
}

/// Per-session turn driver
pub struct TurnOrchestrator {
    ctx: TurnContext,
    shutdown_grace: Duration,
    active: Option<ActiveTurn>,
}

impl TurnOrchestrator {
    pub fn new(
        caps: Capabilities,
        config: OrchestratorConfig,
        history: Arc<Mutex<ConversationHistory>>,
        gate: Arc<Mutex<ActivationGate>>,
        outbound: mpsc::Sender<OutboundEvent>,
    ) -> Self {
        let shutdown_grace = config.shutdown_grace;
        Self {
            ctx: TurnContext {
                caps,
                config: Arc::new(config),
                history,
                gate,
                memory: Arc::new(Mutex::new(TurnMemory::default())),
                phase: Arc::new(Mutex::new(TurnPhase::Listening)),
                outbound,
            },
            shutdown_grace,
            active: None,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        *self.ctx.phase.lock()
    }

    pub fn has_active_turn(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|turn| !turn.handle.is_finished())
    }

    /// Barge-in signal: cancel the active reply without awaiting teardown.
    ///
    /// Only a turn that is already replying is cancelled here; a turn still
    /// in ASR runs to its transcript and is preempted when the new segment
    /// is submitted. The join happens at that submission.
    pub fn on_speech_started(&self) {
        let Some(turn) = &self.active else {
            return;
        };
        if turn.handle.is_finished() || turn.cancel.is_cancelled() {
            return;
        }
        let phase = *self.ctx.phase.lock();
        if matches!(phase, TurnPhase::Generating | TurnPhase::Speaking) {
            tracing::info!("barge-in: cancelling active reply");
            turn.cancel.cancel();
        }
    }

    /// Begin a turn for a closed speech segment.
    ///
    /// Preempts and awaits any active turn first; segments run strictly in
    /// arrival order, at most one turn at a time.
    pub async fn submit_segment(&mut self, segment: SpeechSegment) {
        self.preempt().await;
        self.spawn(TurnInput::Segment(segment));
    }

    /// Begin a turn for direct text input, skipping ASR.
    pub async fn submit_text(&mut self, text: String) {
        self.preempt().await;
        self.spawn(TurnInput::Text(text));
    }

    /// Cancel the active turn and wait for its teardown. Idempotent.
    pub async fn cancel_active(&mut self) {
        self.preempt().await;
    }

    /// Wait for the active turn to finish on its own (tests, drain).
    pub async fn wait_idle(&mut self) {
        if let Some(turn) = self.active.take() {
            let _ = turn.handle.await;
        }
    }

    fn spawn(&mut self, input: TurnInput) {
        let cancel = CancellationToken::new();
        let ctx = self.ctx.clone();
        let handle = tokio::spawn(run_turn(ctx, cancel.clone(), input));
        self.active = Some(ActiveTurn { cancel, handle });
    }

    async fn preempt(&mut self) {
        let Some(turn) = self.active.take() else {
            return;
        };
        turn.cancel.cancel();

        let mut handle = turn.handle;
        if tokio::time::timeout(self.shutdown_grace, &mut handle)
            .await
            .is_err()
        {
            tracing::warn!(
                "turn did not stop within {:?} after cancel; aborting",
                self.shutdown_grace
            );
            handle.abort();
        }
    }
}

async fn run_turn(ctx: TurnContext, cancel: CancellationToken, input: TurnInput) {
    if let Err(PipelineError::ChannelClosed) = drive_turn(&ctx, &cancel, input).await {
        tracing::debug!("outbound channel closed mid-turn");
    }
    *ctx.phase.lock() = TurnPhase::Listening;
}

/// Errors escaping this function mean the outbound channel is gone; provider
/// failures are reported as events and handled in place.
async fn drive_turn(
    ctx: &TurnContext,
    cancel: &CancellationToken,
    input: TurnInput,
) -> Result<(), PipelineError> {
    let use_tts = match &input {
        TurnInput::Segment(_) => true,
        TurnInput::Text(_) => ctx.config.tts_for_text_input,
    };

    let (utterance, times) = match input {
        TurnInput::Segment(segment) => match transcribe(ctx, cancel, segment).await? {
            Some(result) => (result.0, Some(result.1)),
            None => return Ok(()),
        },
        TurnInput::Text(text) => {
            // Direct text never concatenates with an interrupted voice turn
            ctx.memory.lock().last_cancelled = false;
            (text, None)
        }
    };

    let utterance = apply_carryover(ctx, utterance, times.as_ref().map(|t| t.start_ms));

    let decision = ctx.gate.lock().evaluate(&utterance);
    let utterance = match decision {
        GateDecision::Pass { text } => text,
        GateDecision::Activated { reply, remainder } => {
            announce(ctx, &reply).await?;
            match remainder {
                Some(rest) => rest,
                None => return Ok(()),
            }
        }
        GateDecision::Deactivated { reply } => {
            announce(ctx, &reply).await?;
            return Ok(());
        }
        GateDecision::Rejected { prompt } => {
            tracing::debug!("input gated: no activation keyword");
            announce(ctx, &prompt).await?;
            return Ok(());
        }
    };

    {
        let mut memory = ctx.memory.lock();
        memory.last_user_text = Some(utterance.clone());
        memory.last_segment_end_ms = times.as_ref().map(|t| t.end_ms);
    }

    generate_reply(ctx, cancel, utterance, use_tts).await
}

struct SegmentTimes {
    start_ms: u64,
    end_ms: u64,
}

async fn transcribe(
    ctx: &TurnContext,
    cancel: &CancellationToken,
    segment: SpeechSegment,
) -> Result<Option<(String, SegmentTimes)>, PipelineError> {
    *ctx.phase.lock() = TurnPhase::Transcribing;

    let Some(asr) = ctx.caps.asr.clone() else {
        emit_error(ctx, "asr module not available", ErrorKind::ProviderUnavailable).await?;
        return Ok(None);
    };

    let sample_rate = ctx.config.sample_rate;
    let times = SegmentTimes {
        start_ms: segment.start_offset * 1000 / sample_rate as u64,
        end_ms: segment.end_ms(sample_rate),
    };
    let deadline = ctx.config.reply.deadlines.asr;
    let language = ctx.config.asr_language.clone();
    let samples = segment.samples;

    let recognize = call_with_retry(&ctx.config.reply.retry, "asr.recognize", || {
        with_deadline(
            deadline,
            "asr.recognize",
            asr.recognize(&samples, sample_rate, language.as_deref()),
        )
    });

    let transcript = tokio::select! {
        // Superseded before a transcript existed: nothing to record
        _ = cancel.cancelled() => return Ok(None),
        result = recognize => match result {
            Ok(transcript) => transcript,
            Err(err) => {
                emit_error(ctx, &err.to_string(), err.kind()).await?;
                return Ok(None);
            }
        },
    };

    emit(
        ctx,
        OutboundEvent::AsrUpdate {
            text: transcript.text.clone(),
            is_final: true,
        },
    )
    .await?;

    if transcript.is_empty() {
        tracing::debug!(segment = segment.id, "empty transcript");
        return Ok(None);
    }
    Ok(Some((transcript.text, times)))
}

/// Prefix the previous turn's user text when it was interrupted by barge-in
/// and the new segment started within the carry-over window. Applies exactly
/// once.
fn apply_carryover(ctx: &TurnContext, utterance: String, new_start_ms: Option<u64>) -> String {
    let mut memory = ctx.memory.lock();
    if !memory.last_cancelled {
        return utterance;
    }
    memory.last_cancelled = false;

    let window = ctx.config.carryover_window_ms;
    match (
        memory.last_user_text.as_ref(),
        memory.last_segment_end_ms,
        new_start_ms,
    ) {
        (Some(previous), Some(prev_end), Some(start))
            if start.saturating_sub(prev_end) < window =>
        {
            tracing::info!("carrying over interrupted turn text");
            format!("{previous} {utterance}")
        }
        _ => utterance,
    }
}

async fn generate_reply(
    ctx: &TurnContext,
    cancel: &CancellationToken,
    utterance: String,
    use_tts: bool,
) -> Result<(), PipelineError> {
    let Some(llm) = ctx.caps.llm.clone() else {
        emit_error(ctx, "llm module not available", ErrorKind::ProviderUnavailable).await?;
        return Ok(());
    };

    *ctx.phase.lock() = TurnPhase::Generating;

    let history = ctx.history.lock().recent(ctx.config.history_limit);
    let prompt = ChatPrompt {
        system_prompt: ctx.config.system_prompt.clone(),
        history,
        user_text: utterance.clone(),
    };
    let tts = if use_tts { ctx.caps.tts.clone() } else { None };

    *ctx.phase.lock() = TurnPhase::Speaking;
    let outcome = run_reply(
        llm,
        tts,
        prompt,
        ctx.config.speech.clone(),
        cancel.clone(),
        ctx.outbound.clone(),
        &ctx.config.reply,
    )
    .await;

    // History delta, exactly once per turn that reached the LLM. Interrupted
    // assistant text is stored verbatim, as emitted.
    {
        let mut history = ctx.history.lock();
        history.push_user(&utterance);
        match &outcome.error {
            None => history.push_assistant(&outcome.text),
            Some(_) if !outcome.text.is_empty() => history.push_assistant(&outcome.text),
            Some(_) => {}
        }
    }
    ctx.memory.lock().last_cancelled = outcome.cancelled;

    if outcome.cancelled {
        tracing::info!(chars = outcome.text.len(), "reply cancelled mid-stream");
    }
    if let Some(err) = outcome.error {
        if matches!(err, PipelineError::ChannelClosed) {
            return Err(err);
        }
        emit_error(ctx, &err.to_string(), err.kind()).await?;
    }
    Ok(())
}

async fn emit(ctx: &TurnContext, event: OutboundEvent) -> Result<(), PipelineError> {
    ctx.outbound
        .send(event)
        .await
        .map_err(|_| PipelineError::ChannelClosed)
}

async fn emit_error(
    ctx: &TurnContext,
    text: &str,
    kind: ErrorKind,
) -> Result<(), PipelineError> {
    tracing::warn!(%kind, "turn error: {}", text);
    emit(
        ctx,
        OutboundEvent::Error {
            text: text.to_string(),
            kind,
        },
    )
    .await
}

async fn announce(ctx: &TurnContext, text: &str) -> Result<(), PipelineError> {
    speak_system(
        ctx.caps.tts.as_ref(),
        text,
        &ctx.config.speech,
        ctx.config.reply.deadlines.tts,
        &ctx.outbound,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationConfig;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use voice_dialog_core::{Role, Transcript};
    use voice_dialog_providers::builtin::{ScriptedLlm, ScriptedLlmConfig};
    use voice_dialog_providers::{AsrEngine, LlmEngine, ProviderError, TokenStream};

    /// ASR that answers from a queue of expected transcripts.
    struct QueueAsr {
        texts: Mutex<VecDeque<String>>,
    }

    impl QueueAsr {
        fn new(texts: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                texts: Mutex::new(texts.iter().map(|t| t.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl AsrEngine for QueueAsr {
        async fn recognize(
            &self,
            _samples: &[i16],
            _sample_rate: u32,
            _language: Option<&str>,
        ) -> Result<Transcript, ProviderError> {
            Ok(Transcript::new(
                self.texts.lock().pop_front().unwrap_or_default(),
            ))
        }
    }

    /// LLM that records each prompt's user text before replying.
    struct RecordingLlm {
        prompts: Mutex<Vec<String>>,
        reply: String,
        token_delay_ms: u64,
    }

    impl RecordingLlm {
        fn new(reply: &str, token_delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
                reply: reply.to_string(),
                token_delay_ms,
            })
        }
    }

    #[async_trait]
    impl LlmEngine for RecordingLlm {
        async fn generate(&self, prompt: &ChatPrompt) -> Result<TokenStream, ProviderError> {
            self.prompts.lock().push(prompt.user_text.clone());
            let tokens: Vec<String> =
                self.reply.split_inclusive(' ').map(str::to_string).collect();
            let delay = Duration::from_millis(self.token_delay_ms);
            Ok(Box::pin(futures::stream::unfold(
                (tokens, 0usize),
                move |(tokens, i)| async move {
                    if i >= tokens.len() {
                        return None;
                    }
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    Some((Ok(tokens[i].clone()), (tokens, i + 1)))
                },
            )))
        }
    }

    fn orchestrator(
        caps: Capabilities,
        activation: ActivationConfig,
    ) -> (
        TurnOrchestrator,
        mpsc::Receiver<OutboundEvent>,
        Arc<Mutex<ConversationHistory>>,
    ) {
        let history = Arc::new(Mutex::new(ConversationHistory::new(64)));
        let gate = Arc::new(Mutex::new(ActivationGate::new(activation)));
        let (tx, rx) = mpsc::channel(256);
        let orch = TurnOrchestrator::new(
            caps,
            OrchestratorConfig::default(),
            history.clone(),
            gate,
            tx,
        );
        (orch, rx, history)
    }

    fn text_caps(llm: Arc<dyn LlmEngine>) -> Capabilities {
        Capabilities {
            llm: Some(llm),
            ..Capabilities::default()
        }
    }

    fn segment(start_offset: u64, samples: usize) -> SpeechSegment {
        SpeechSegment {
            id: 0,
            samples: vec![4000i16; samples],
            start_offset,
            end_offset: start_offset + samples as u64,
        }
    }

    #[tokio::test]
    async fn test_text_turn_appends_history() {
        let llm = Arc::new(ScriptedLlm::new(ScriptedLlmConfig {
            replies: vec!["Hi!".to_string()],
            token_delay_ms: 0,
        }));
        let (mut orch, mut rx, history) = orchestrator(text_caps(llm), ActivationConfig::default());

        orch.submit_text("hello".to_string()).await;
        orch.wait_idle().await;

        let snapshot = history.lock().snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].role, Role::User);
        assert_eq!(snapshot[0].text, "hello");
        assert_eq!(snapshot[1].role, Role::Assistant);
        assert_eq!(snapshot[1].text, "Hi!");

        let mut partial = String::new();
        let mut finals = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                OutboundEvent::TextChunk { text, is_final: false } => partial.push_str(&text),
                OutboundEvent::TextChunk { is_final: true, .. } => finals += 1,
                _ => {}
            }
        }
        assert_eq!(partial, "Hi!");
        assert_eq!(finals, 1);
    }

    #[tokio::test]
    async fn test_cancelled_turn_stores_partial() {
        let llm = RecordingLlm::new("word word word word word word end.", 30);
        let (mut orch, _rx, history) = orchestrator(
            text_caps(llm.clone()),
            ActivationConfig::default(),
        );

        orch.submit_text("question".to_string()).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        orch.cancel_active().await;

        let snapshot = history.lock().snapshot();
        assert_eq!(snapshot.len(), 2, "user and partial assistant entries");
        assert_eq!(snapshot[0].text, "question");
        assert!(snapshot[1].text.len() < "word word word word word word end.".len());
    }

    #[tokio::test]
    async fn test_segment_turn_emits_final_asr_update() {
        let llm = RecordingLlm::new("Sure.", 0);
        let caps = Capabilities {
            asr: Some(QueueAsr::new(&["what time is it"])),
            llm: Some(llm.clone()),
            ..Capabilities::default()
        };
        let (mut orch, mut rx, _history) = orchestrator(caps, ActivationConfig::default());

        orch.submit_segment(segment(0, 16_000)).await;
        orch.wait_idle().await;

        let mut saw_asr_before_text = false;
        let mut saw_text = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                OutboundEvent::AsrUpdate { text, is_final } => {
                    assert!(is_final);
                    assert_eq!(text, "what time is it");
                    saw_asr_before_text = !saw_text;
                }
                OutboundEvent::TextChunk { .. } => saw_text = true,
                _ => {}
            }
        }
        assert!(saw_asr_before_text);
        assert_eq!(llm.prompts.lock().as_slice(), ["what time is it"]);
    }

    #[tokio::test]
    async fn test_empty_transcript_skips_turn() {
        let llm = RecordingLlm::new("Sure.", 0);
        let caps = Capabilities {
            asr: Some(QueueAsr::new(&[""])),
            llm: Some(llm.clone()),
            ..Capabilities::default()
        };
        let (mut orch, mut rx, history) = orchestrator(caps, ActivationConfig::default());

        orch.submit_segment(segment(0, 16_000)).await;
        orch.wait_idle().await;

        assert!(history.lock().is_empty());
        assert!(llm.prompts.lock().is_empty());

        let mut saw_empty_final = false;
        while let Ok(event) = rx.try_recv() {
            if let OutboundEvent::AsrUpdate { text, is_final: true } = event {
                assert!(text.is_empty());
                saw_empty_final = true;
            }
        }
        assert!(saw_empty_final);
    }

    #[tokio::test]
    async fn test_carryover_after_barge_in() {
        let llm = RecordingLlm::new("thinking about the weather now word word word end.", 30);
        let caps = Capabilities {
            asr: Some(QueueAsr::new(&["What's the weather", "in Tokyo"])),
            llm: Some(llm.clone()),
            ..Capabilities::default()
        };
        let (mut orch, _rx, _history) = orchestrator(caps, ActivationConfig::default());

        // First voice turn starts replying
        orch.submit_segment(segment(0, 16_000)).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        // User starts speaking again: barge-in, then the new segment arrives
        // well within the carry-over window (1 s gap on the stream clock)
        orch.on_speech_started();
        orch.submit_segment(segment(32_000, 16_000)).await;
        orch.wait_idle().await;

        let prompts = llm.prompts.lock();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0], "What's the weather");
        assert_eq!(prompts[1], "What's the weather in Tokyo");
    }

    #[tokio::test]
    async fn test_carryover_applies_only_once() {
        let llm = RecordingLlm::new("word word word word word word word end.", 30);
        let caps = Capabilities {
            asr: Some(QueueAsr::new(&["first", "second", "third"])),
            llm: Some(llm.clone()),
            ..Capabilities::default()
        };
        let (mut orch, _rx, _history) = orchestrator(caps, ActivationConfig::default());

        orch.submit_segment(segment(0, 16_000)).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        orch.on_speech_started();
        orch.submit_segment(segment(32_000, 16_000)).await;
        orch.wait_idle().await;

        // Third segment after a completed (not cancelled) turn: no carry-over
        orch.submit_segment(segment(64_000, 16_000)).await;
        orch.wait_idle().await;

        let prompts = llm.prompts.lock();
        assert_eq!(prompts[1], "first second");
        assert_eq!(prompts[2], "third");
    }

    #[tokio::test]
    async fn test_activation_gating_blocks_llm() {
        let llm = RecordingLlm::new("Joke.", 0);
        let activation = ActivationConfig {
            enabled: true,
            keywords: vec!["hello assistant".to_string()],
            ..ActivationConfig::default()
        };
        let (mut orch, mut rx, history) = orchestrator(text_caps(llm.clone()), activation);

        // Gated: scripted prompt, no LLM call
        orch.submit_text("tell me a joke".to_string()).await;
        orch.wait_idle().await;
        assert!(llm.prompts.lock().is_empty());
        assert!(history.lock().is_empty());

        let mut saw_prompt = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, OutboundEvent::SystemMessage { .. }) {
                saw_prompt = true;
            }
        }
        assert!(saw_prompt);

        // Keyword with trailing request: activation reply, then the remainder
        orch.submit_text("hello assistant, tell me a joke".to_string())
            .await;
        orch.wait_idle().await;

        assert_eq!(llm.prompts.lock().as_slice(), ["tell me a joke"]);
        let mut saw_reply = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, OutboundEvent::SystemMessage { .. }) {
                saw_reply = true;
            }
        }
        assert!(saw_reply);
    }
}
