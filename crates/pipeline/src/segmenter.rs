//! Turn segmenter
//!
//! Consumes per-window speech probabilities and produces discrete utterance
//! segments. `SpeechStarted` fires on the transition into speech, which the
//! orchestrator uses as the barge-in signal; `EndOfSpeech` closes the segment
//! after sustained silence or at the maximum segment duration.

use voice_dialog_core::SpeechSegment;

/// Segmenter configuration
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Inbound PCM sample rate in Hz
    pub sample_rate: u32,
    /// Speech probability at or above this counts as speech
    pub speech_threshold: f32,
    /// Silence run that closes an utterance
    pub eos_silence_ms: u64,
    /// Utterances are force-closed at this duration
    pub max_segment_ms: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            speech_threshold: 0.5,
            eos_silence_ms: 1200,
            max_segment_ms: 5000,
        }
    }
}

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    Idle,
    InSpeech,
}

/// Events emitted by the segmenter
#[derive(Debug)]
pub enum SegmentEvent {
    /// Speech began; triggers the barge-in check
    SpeechStarted { offset: u64 },
    /// The utterance ended, by silence or forced cut-off
    EndOfSpeech { segment: SpeechSegment, forced: bool },
}

struct PendingSegment {
    id: u64,
    samples: Vec<i16>,
    start_offset: u64,
    end_offset: u64,
}

impl PendingSegment {
    fn into_segment(self) -> SpeechSegment {
        SpeechSegment {
            id: self.id,
            samples: self.samples,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
        }
    }
}

/// VAD-decision consumer producing utterance segments
pub struct TurnSegmenter {
    config: SegmenterConfig,
    state: SegmenterState,
    current: Option<PendingSegment>,
    silence_ms: u64,
    next_id: u64,
}

impl TurnSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            state: SegmenterState::Idle,
            current: None,
            silence_ms: 0,
            next_id: 0,
        }
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    /// Feed one VAD decision.
    ///
    /// `offset` is the stream offset of the window's first sample. Windows
    /// must arrive in order; a duplicated window only stretches the current
    /// segment and cannot change the state machine's direction, since the
    /// VAD decision is per-window.
    pub fn process(&mut self, offset: u64, window: &[i16], probability: f32) -> Option<SegmentEvent> {
        let window_ms = window.len() as u64 * 1000 / self.config.sample_rate as u64;
        let is_speech = probability >= self.config.speech_threshold;

        match self.state {
            SegmenterState::Idle => {
                if !is_speech {
                    return None;
                }
                let id = self.next_id;
                self.next_id += 1;
                self.current = Some(PendingSegment {
                    id,
                    samples: window.to_vec(),
                    start_offset: offset,
                    end_offset: offset + window.len() as u64,
                });
                self.state = SegmenterState::InSpeech;
                self.silence_ms = 0;
                tracing::debug!(segment = id, offset, "speech started");
                Some(SegmentEvent::SpeechStarted { offset })
            }
            SegmenterState::InSpeech => {
                let Some(segment) = self.current.as_mut() else {
                    self.state = SegmenterState::Idle;
                    return None;
                };
                segment.samples.extend_from_slice(window);
                segment.end_offset = offset + window.len() as u64;

                if is_speech {
                    self.silence_ms = 0;
                } else {
                    self.silence_ms += window_ms;
                }

                let duration_ms =
                    segment.samples.len() as u64 * 1000 / self.config.sample_rate as u64;

                if self.silence_ms >= self.config.eos_silence_ms {
                    return self.close(false);
                }
                if duration_ms >= self.config.max_segment_ms {
                    return self.close(true);
                }
                None
            }
        }
    }

    /// Force-close the open segment, if any (push-to-talk, stream end).
    pub fn flush(&mut self) -> Option<SegmentEvent> {
        self.close(true)
    }

    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.current = None;
        self.silence_ms = 0;
    }

    fn close(&mut self, forced: bool) -> Option<SegmentEvent> {
        let segment = self.current.take()?.into_segment();
        self.state = SegmenterState::Idle;
        self.silence_ms = 0;
        tracing::debug!(
            segment = segment.id,
            samples = segment.samples.len(),
            forced,
            "end of speech"
        );
        Some(SegmentEvent::EndOfSpeech { segment, forced })
    }
}
