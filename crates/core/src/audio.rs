//! Audio types and PCM helpers
//!
//! The inbound contract is fixed: 16 kHz, mono, 16-bit little-endian signed
//! PCM. Anything else is the responsibility of the transport or the provider.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Bytes per PCM sample (int16).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Decode raw little-endian PCM16 bytes into samples.
///
/// Returns `InvalidFrame` when the byte length is not a multiple of the
/// sample width.
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<i16>, AudioError> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(AudioError::InvalidFrame { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode samples back into little-endian PCM16 bytes.
pub fn encode_pcm16(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Audio frame errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AudioError {
    #[error("invalid frame length {len}: not a multiple of the sample width")]
    InvalidFrame { len: usize },
}

impl AudioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AudioError::InvalidFrame { .. } => ErrorKind::InvalidFrame,
        }
    }
}

/// Output audio codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Pcm16,
    Wav,
    Mp3,
}

impl AudioCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Pcm16 => "pcm16",
            AudioCodec::Wav => "wav",
            AudioCodec::Mp3 => "mp3",
        }
    }
}

/// A chunk of synthesized audio on its way to the client
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Encoded audio bytes
    pub bytes: Vec<u8>,
    /// Codec of `bytes`
    pub codec: AudioCodec,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// One user utterance worth of audio, delimited by the segmenter
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// Segment sequence number within the session
    pub id: u64,
    /// PCM samples, in arrival order
    pub samples: Vec<i16>,
    /// Stream offset of the first sample
    pub start_offset: u64,
    /// Stream offset one past the last sample
    pub end_offset: u64,
}

impl SpeechSegment {
    /// Duration of the segment in milliseconds at the given sample rate.
    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        self.samples.len() as u64 * 1000 / sample_rate as u64
    }

    /// Stream-clock position of the segment end, in milliseconds.
    pub fn end_ms(&self, sample_rate: u32) -> u64 {
        self.end_offset * 1000 / sample_rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_round_trip() {
        let samples = vec![0i16, -1, 32767, -32768, 100];
        let bytes = encode_pcm16(&samples);
        assert_eq!(bytes.len(), samples.len() * BYTES_PER_SAMPLE);
        assert_eq!(decode_pcm16(&bytes).unwrap(), samples);
    }

    #[test]
    fn test_odd_length_rejected() {
        let err = decode_pcm16(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFrame);
    }

    #[test]
    fn test_codec_serialization() {
        assert_eq!(serde_json::to_string(&AudioCodec::Pcm16).unwrap(), "\"pcm16\"");
        assert_eq!(AudioCodec::Wav.as_str(), "wav");
    }

    #[test]
    fn test_segment_duration() {
        let segment = SpeechSegment {
            id: 0,
            samples: vec![0; 16_000],
            start_offset: 0,
            end_offset: 16_000,
        };
        assert_eq!(segment.duration_ms(16_000), 1000);
        assert_eq!(segment.end_ms(16_000), 1000);
    }
}
