//! Tone-synthesis text-to-speech
//!
//! Produces a sine tone whose duration scales with the input length,
//! streamed as PCM16 chunks. Stands in for a real synthesizer in demos and
//! tests; the audio is audible and decodes to nonempty PCM.

use std::f32::consts::TAU;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use voice_dialog_core::{encode_pcm16, AudioChunk, AudioCodec};

use crate::{AudioStream, ProviderError, SpeechParams, TtsEngine};

/// Tone TTS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ToneTtsConfig {
    /// Output sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Tone frequency in Hz
    #[serde(default = "default_frequency")]
    pub frequency: f32,

    /// Chunk duration in milliseconds
    #[serde(default = "default_chunk_ms")]
    pub chunk_ms: u64,

    /// Synthesized milliseconds per input character
    #[serde(default = "default_ms_per_char")]
    pub ms_per_char: u64,

    /// Upper bound on synthesized duration per call
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,

    /// Output amplitude in [0, 1]
    #[serde(default = "default_gain")]
    pub gain: f32,

    /// Pause between emitted chunks in milliseconds
    #[serde(default)]
    pub chunk_delay_ms: u64,
}

fn default_sample_rate() -> u32 {
    16_000
}
fn default_frequency() -> f32 {
    440.0
}
fn default_chunk_ms() -> u64 {
    20
}
fn default_ms_per_char() -> u64 {
    40
}
fn default_max_duration_ms() -> u64 {
    4000
}
fn default_gain() -> f32 {
    0.2
}

impl Default for ToneTtsConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frequency: default_frequency(),
            chunk_ms: default_chunk_ms(),
            ms_per_char: default_ms_per_char(),
            max_duration_ms: default_max_duration_ms(),
            gain: default_gain(),
            chunk_delay_ms: 0,
        }
    }
}

/// TTS that hums instead of speaking
pub struct ToneTts {
    config: ToneTtsConfig,
}

impl ToneTts {
    pub fn new(config: ToneTtsConfig) -> Self {
        Self { config }
    }

    fn frequency_for(&self, params: &SpeechParams) -> f32 {
        match params.voice.as_deref() {
            Some("low") => self.config.frequency / 2.0,
            Some("high") => self.config.frequency * 2.0,
            _ => self.config.frequency,
        }
    }
}

#[async_trait]
impl TtsEngine for ToneTts {
    async fn synthesize(
        &self,
        text: &str,
        params: &SpeechParams,
    ) -> Result<AudioStream, ProviderError> {
        let char_count = text.chars().filter(|c| !c.is_whitespace()).count().max(1);
        let rate = params.rate.filter(|r| *r > 0.0).unwrap_or(1.0);
        let duration_ms = ((char_count as u64 * self.config.ms_per_char) as f32 / rate) as u64;
        let duration_ms = duration_ms.clamp(self.config.chunk_ms, self.config.max_duration_ms);

        let sample_rate = self.config.sample_rate;
        let total_samples = (duration_ms * sample_rate as u64 / 1000) as usize;
        let chunk_samples = (self.config.chunk_ms * sample_rate as u64 / 1000).max(1) as usize;
        let gain = (self.config.gain * params.volume.unwrap_or(1.0)).clamp(0.0, 1.0);
        let frequency = self.frequency_for(params);
        let delay = Duration::from_millis(self.config.chunk_delay_ms);

        let stream = futures::stream::unfold(0usize, move |position| async move {
            if position >= total_samples {
                return None;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let end = (position + chunk_samples).min(total_samples);
            let samples: Vec<i16> = (position..end)
                .map(|n| {
                    let t = n as f32 / sample_rate as f32;
                    let value = (TAU * frequency * t).sin() * gain;
                    (value * i16::MAX as f32) as i16
                })
                .collect();

            let chunk = AudioChunk {
                bytes: encode_pcm16(&samples),
                codec: AudioCodec::Pcm16,
                sample_rate,
            };
            Some((Ok(chunk), end))
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_synthesis_yields_nonempty_pcm() {
        let tts = ToneTts::new(ToneTtsConfig::default());
        let mut stream = tts
            .synthesize("Hello world.", &SpeechParams::default())
            .await
            .unwrap();

        let mut total_bytes = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            assert_eq!(chunk.codec, AudioCodec::Pcm16);
            assert_eq!(chunk.sample_rate, 16_000);
            assert!(!chunk.bytes.is_empty());
            total_bytes += chunk.bytes.len();
        }
        assert!(total_bytes > 0);
    }

    #[tokio::test]
    async fn test_duration_scales_with_text() {
        let tts = ToneTts::new(ToneTtsConfig::default());
        let short: usize = tts
            .synthesize("Hi.", &SpeechParams::default())
            .await
            .unwrap()
            .map(|c| c.unwrap().bytes.len())
            .collect::<Vec<_>>()
            .await
            .iter()
            .sum();
        let long: usize = tts
            .synthesize("A considerably longer sentence to speak.", &SpeechParams::default())
            .await
            .unwrap()
            .map(|c| c.unwrap().bytes.len())
            .collect::<Vec<_>>()
            .await
            .iter()
            .sum();
        assert!(long > short);
    }
}
