//! Reply pipeline
//!
//! Streams LLM tokens through the sentence splitter into the TTS, emitting
//! interleaved text and audio onto the session's bounded outbound channel.
//! Text chunks preserve token order; audio for sentence *i* is fully emitted
//! before any audio for sentence *i+1*. Cancellation is cooperative: the
//! token is consulted before every enqueue, and nothing is enqueued after it
//! is observed.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voice_dialog_core::OutboundEvent;
use voice_dialog_providers::{
    call_with_retry, ChatPrompt, LlmEngine, ProviderError, RetryPolicy, SpeechParams, TtsEngine,
};

use crate::{PipelineError, SentenceSplitter};

/// Per-call provider deadlines
#[derive(Debug, Clone)]
pub struct ProviderDeadlines {
    pub asr: Duration,
    pub llm_first_token: Duration,
    pub llm_token: Duration,
    pub tts: Duration,
}

impl Default for ProviderDeadlines {
    fn default() -> Self {
        Self {
            asr: Duration::from_secs(15),
            llm_first_token: Duration::from_secs(10),
            llm_token: Duration::from_secs(30),
            tts: Duration::from_secs(20),
        }
    }
}

/// Reply pipeline configuration
#[derive(Debug, Clone)]
pub struct ReplyPipelineConfig {
    pub max_pending_chars: usize,
    pub deadlines: ProviderDeadlines,
    pub retry: RetryPolicy,
}

impl Default for ReplyPipelineConfig {
    fn default() -> Self {
        Self {
            max_pending_chars: 120,
            deadlines: ProviderDeadlines::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ReplyPipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What one reply turn produced
#[derive(Debug)]
pub struct ReplyOutcome {
    /// Concatenation of all emitted text chunks, in order
    pub text: String,
    /// The turn was cancelled mid-stream (barge-in or preemption)
    pub cancelled: bool,
    /// Provider or channel failure that ended the turn early
    pub error: Option<PipelineError>,
}

struct ReplyState {
    emitted: String,
    cancelled: bool,
}

enum SendResult {
    Sent,
    Cancelled,
}

/// Drive one reply: LLM stream → sentence splitter → TTS → outbound events.
#[allow(clippy::too_many_arguments)]
pub async fn run_reply(
    llm: Arc<dyn LlmEngine>,
    tts: Option<Arc<dyn TtsEngine>>,
    prompt: ChatPrompt,
    speech: SpeechParams,
    cancel: CancellationToken,
    outbound: mpsc::Sender<OutboundEvent>,
    config: &ReplyPipelineConfig,
) -> ReplyOutcome {
    let mut state = ReplyState {
        emitted: String::new(),
        cancelled: false,
    };
    let error = drive(
        &mut state,
        llm,
        tts,
        prompt,
        speech,
        &cancel,
        &outbound,
        config,
    )
    .await
    .err();

    ReplyOutcome {
        text: state.emitted,
        cancelled: state.cancelled,
        error,
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    state: &mut ReplyState,
    llm: Arc<dyn LlmEngine>,
    tts: Option<Arc<dyn TtsEngine>>,
    prompt: ChatPrompt,
    speech: SpeechParams,
    cancel: &CancellationToken,
    outbound: &mpsc::Sender<OutboundEvent>,
    config: &ReplyPipelineConfig,
) -> Result<(), PipelineError> {
    let mut splitter = SentenceSplitter::new(config.max_pending_chars);

    let mut stream = call_with_retry(&config.retry, "llm.generate", || llm.generate(&prompt)).await?;

    let mut first = true;
    loop {
        if cancel.is_cancelled() {
            state.cancelled = true;
            return Ok(());
        }

        let deadline = if first {
            config.deadlines.llm_first_token
        } else {
            config.deadlines.llm_token
        };
        let step = tokio::select! {
            _ = cancel.cancelled() => {
                state.cancelled = true;
                return Ok(());
            }
            step = tokio::time::timeout(deadline, stream.next()) => step,
        };

        let token = match step {
            Err(_) => return Err(ProviderError::Timeout("llm token".to_string()).into()),
            Ok(None) => break,
            Ok(Some(Err(err))) => return Err(err.into()),
            Ok(Some(Ok(token))) => token,
        };
        first = false;

        splitter.push(&token);
        while let Some(sentence) = splitter.next_sentence() {
            if !emit_sentence(state, &sentence, tts.as_ref(), &speech, cancel, outbound, config)
                .await?
            {
                state.cancelled = true;
                return Ok(());
            }
        }
    }

    if let Some(remainder) = splitter.drain_remainder() {
        if !emit_sentence(state, &remainder, tts.as_ref(), &speech, cancel, outbound, config)
            .await?
        {
            state.cancelled = true;
            return Ok(());
        }
    }

    // Stream end marker for the turn's text
    match send_or_cancel(
        outbound,
        cancel,
        OutboundEvent::TextChunk {
            text: String::new(),
            is_final: true,
        },
    )
    .await?
    {
        SendResult::Sent => Ok(()),
        SendResult::Cancelled => {
            state.cancelled = true;
            Ok(())
        }
    }
}

/// Emit one sentence: text chunk first, then its audio in full.
///
/// Returns `Ok(false)` when cancellation was observed.
async fn emit_sentence(
    state: &mut ReplyState,
    sentence: &str,
    tts: Option<&Arc<dyn TtsEngine>>,
    speech: &SpeechParams,
    cancel: &CancellationToken,
    outbound: &mpsc::Sender<OutboundEvent>,
    config: &ReplyPipelineConfig,
) -> Result<bool, PipelineError> {
    if cancel.is_cancelled() {
        return Ok(false);
    }

    match send_or_cancel(
        outbound,
        cancel,
        OutboundEvent::TextChunk {
            text: sentence.to_string(),
            is_final: false,
        },
    )
    .await?
    {
        SendResult::Sent => state.emitted.push_str(sentence),
        SendResult::Cancelled => return Ok(false),
    }

    let Some(tts) = tts else { return Ok(true) };

    let mut audio =
        call_with_retry(&config.retry, "tts.synthesize", || tts.synthesize(sentence, speech))
            .await?;

    loop {
        let step = tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            step = tokio::time::timeout(config.deadlines.tts, audio.next()) => step,
        };
        match step {
            Err(_) => return Err(ProviderError::Timeout("tts chunk".to_string()).into()),
            Ok(None) => break,
            Ok(Some(Err(err))) => return Err(err.into()),
            Ok(Some(Ok(chunk))) => {
                match send_or_cancel(outbound, cancel, OutboundEvent::AudioChunk(chunk)).await? {
                    SendResult::Sent => {}
                    SendResult::Cancelled => return Ok(false),
                }
            }
        }
    }
    Ok(true)
}

/// Blocking enqueue that stays responsive to cancellation.
async fn send_or_cancel(
    outbound: &mpsc::Sender<OutboundEvent>,
    cancel: &CancellationToken,
    event: OutboundEvent,
) -> Result<SendResult, PipelineError> {
    tokio::select! {
        biased;
        result = outbound.send(event) => result
            .map(|_| SendResult::Sent)
            .map_err(|_| PipelineError::ChannelClosed),
        _ = cancel.cancelled() => Ok(SendResult::Cancelled),
    }
}

/// Emit a scripted system message, spoken through TTS when available.
///
/// Synthesis failures are logged and swallowed; only a dead outbound channel
/// is an error.
pub async fn speak_system(
    tts: Option<&Arc<dyn TtsEngine>>,
    text: &str,
    speech: &SpeechParams,
    deadline: Duration,
    outbound: &mpsc::Sender<OutboundEvent>,
) -> Result<(), PipelineError> {
    outbound
        .send(OutboundEvent::SystemMessage {
            text: text.to_string(),
        })
        .await
        .map_err(|_| PipelineError::ChannelClosed)?;

    let Some(tts) = tts else { return Ok(()) };

    let mut audio = match tts.synthesize(text, speech).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!("system message synthesis failed: {}", err);
            return Ok(());
        }
    };

    loop {
        match tokio::time::timeout(deadline, audio.next()).await {
            Err(_) => {
                tracing::warn!("system message synthesis timed out");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                tracing::warn!("system message synthesis failed mid-stream: {}", err);
                break;
            }
            Ok(Some(Ok(chunk))) => {
                outbound
                    .send(OutboundEvent::AudioChunk(chunk))
                    .await
                    .map_err(|_| PipelineError::ChannelClosed)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_dialog_providers::builtin::{
        ScriptedLlm, ScriptedLlmConfig, ToneTts, ToneTtsConfig,
    };
    use voice_dialog_providers::TokenStream;

    fn prompt() -> ChatPrompt {
        ChatPrompt {
            system_prompt: String::new(),
            history: Vec::new(),
            user_text: "hi".to_string(),
        }
    }

    fn scripted(reply: &str, delay_ms: u64) -> Arc<dyn LlmEngine> {
        Arc::new(ScriptedLlm::new(ScriptedLlmConfig {
            replies: vec![reply.to_string()],
            token_delay_ms: delay_ms,
        }))
    }

    #[tokio::test]
    async fn test_text_and_audio_interleave_in_order() {
        let llm = scripted("Hi there. Bye.", 0);
        let tts: Arc<dyn TtsEngine> = Arc::new(ToneTts::new(ToneTtsConfig::default()));
        let (tx, mut rx) = mpsc::channel(256);

        let outcome = run_reply(
            llm,
            Some(tts),
            prompt(),
            SpeechParams::default(),
            CancellationToken::new(),
            tx,
            &ReplyPipelineConfig::new(),
        )
        .await;

        assert!(!outcome.cancelled);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.text, "Hi there. Bye.");

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        // First event is the first sentence's text, then its audio in full,
        // then the second sentence, then the final marker.
        let mut texts = Vec::new();
        let mut saw_audio_between = false;
        let mut audio_since_last_text = 0;
        for event in &events {
            match event {
                OutboundEvent::TextChunk { text, is_final } => {
                    if !is_final {
                        if !texts.is_empty() && audio_since_last_text > 0 {
                            saw_audio_between = true;
                        }
                        texts.push(text.clone());
                        audio_since_last_text = 0;
                    }
                }
                OutboundEvent::AudioChunk(_) => audio_since_last_text += 1,
                _ => {}
            }
        }
        assert_eq!(texts, vec!["Hi there.", " Bye."]);
        assert!(saw_audio_between, "audio for sentence 1 must precede sentence 2");

        match events.last() {
            Some(OutboundEvent::AudioChunk(_)) => {}
            other => panic!("expected trailing audio, got {other:?}"),
        }
        assert!(events.iter().any(|e| matches!(
            e,
            OutboundEvent::TextChunk { is_final: true, .. }
        )));
    }

    #[tokio::test]
    async fn test_text_only_without_tts() {
        let llm = scripted("One. Two.", 0);
        let (tx, mut rx) = mpsc::channel(64);

        let outcome = run_reply(
            llm,
            None,
            prompt(),
            SpeechParams::default(),
            CancellationToken::new(),
            tx,
            &ReplyPipelineConfig::new(),
        )
        .await;

        assert_eq!(outcome.text, "One. Two.");

        let mut partial = String::new();
        let mut finals = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                OutboundEvent::TextChunk { text, is_final: false } => partial.push_str(&text),
                OutboundEvent::TextChunk { is_final: true, .. } => finals += 1,
                OutboundEvent::AudioChunk(_) => panic!("no audio expected"),
                _ => {}
            }
        }
        // Prefix stability: partial chunks concatenate to the full reply
        assert_eq!(partial, "One. Two.");
        assert_eq!(finals, 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_enqueuing() {
        let llm = scripted("one two three four five six seven eight.", 20);
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let outcome = run_reply(
            llm,
            None,
            prompt(),
            SpeechParams::default(),
            cancel,
            tx,
            &ReplyPipelineConfig::new(),
        )
        .await;

        assert!(outcome.cancelled);
        assert!(outcome.error.is_none());

        while let Ok(event) = rx.try_recv() {
            assert!(
                !matches!(event, OutboundEvent::TextChunk { is_final: true, .. }),
                "no final marker after cancellation"
            );
        }
    }

    struct SilentLlm;

    #[async_trait::async_trait]
    impl LlmEngine for SilentLlm {
        async fn generate(&self, _prompt: &ChatPrompt) -> Result<TokenStream, ProviderError> {
            Ok(Box::pin(futures::stream::pending()))
        }
    }

    #[tokio::test]
    async fn test_first_token_deadline() {
        let (tx, _rx) = mpsc::channel(64);
        let config = ReplyPipelineConfig {
            deadlines: ProviderDeadlines {
                llm_first_token: Duration::from_millis(20),
                ..ProviderDeadlines::default()
            },
            ..ReplyPipelineConfig::new()
        };

        let outcome = run_reply(
            Arc::new(SilentLlm),
            None,
            prompt(),
            SpeechParams::default(),
            CancellationToken::new(),
            tx,
            &config,
        )
        .await;

        match outcome.error {
            Some(PipelineError::Provider(ProviderError::Timeout(_))) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
