//! Audio ingestion buffer
//!
//! Accumulates PCM frames of arbitrary length and hands out windows of
//! exactly `window_samples` samples in order. The window buffer is reused, so
//! the steady-state hot path does not allocate. Backlog beyond
//! `max_backlog_ms` is dropped oldest-first; offsets stay monotonic across
//! drops.

use std::collections::VecDeque;

use voice_dialog_core::audio::{AudioError, BYTES_PER_SAMPLE};

use crate::PipelineError;

/// Ingestion configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Inbound PCM sample rate in Hz
    pub sample_rate: u32,
    /// Window size handed to the VAD, in samples
    pub window_samples: usize,
    /// Unconsumed backlog beyond this is dropped oldest-first
    pub max_backlog_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            window_samples: 512,
            max_backlog_ms: 10_000,
        }
    }
}

impl IngestConfig {
    /// Duration of one window in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_samples as u64 * 1000 / self.sample_rate as u64
    }

    fn max_backlog_samples(&self) -> usize {
        (self.max_backlog_ms * self.sample_rate as u64 / 1000) as usize
    }
}

/// Per-session PCM accumulator
pub struct IngestBuffer {
    config: IngestConfig,
    pending: VecDeque<i16>,
    window: Vec<i16>,
    next_offset: u64,
}

impl IngestBuffer {
    pub fn new(config: IngestConfig) -> Self {
        let window = Vec::with_capacity(config.window_samples);
        Self {
            config,
            pending: VecDeque::new(),
            window,
            next_offset: 0,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Append one inbound frame.
    ///
    /// Returns the number of samples dropped to honor the backlog bound.
    /// A frame whose length is not a multiple of the sample width is
    /// rejected with `InvalidFrame` and leaves the buffer untouched.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<usize, PipelineError> {
        if bytes.len() % BYTES_PER_SAMPLE != 0 {
            return Err(AudioError::InvalidFrame { len: bytes.len() }.into());
        }
        self.pending.extend(
            bytes
                .chunks_exact(BYTES_PER_SAMPLE)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );

        let cap = self.config.max_backlog_samples();
        let mut dropped = 0;
        if self.pending.len() > cap {
            dropped = self.pending.len() - cap;
            self.pending.drain(..dropped);
            self.next_offset += dropped as u64;
        }
        Ok(dropped)
    }

    /// Take the next full window, if one is buffered.
    ///
    /// Returns the stream offset of the window's first sample and the window
    /// itself. The slice is valid until the next call.
    pub fn next_window(&mut self) -> Option<(u64, &[i16])> {
        let size = self.config.window_samples;
        if self.pending.len() < size {
            return None;
        }

        self.window.clear();
        self.window.extend(self.pending.drain(..size));

        let offset = self.next_offset;
        self.next_offset += size as u64;
        Some((offset, &self.window))
    }

    /// Samples buffered but not yet windowed.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_dialog_core::encode_pcm16;

    fn buffer_with(window_samples: usize, max_backlog_ms: u64) -> IngestBuffer {
        IngestBuffer::new(IngestConfig {
            sample_rate: 16_000,
            window_samples,
            max_backlog_ms,
        })
    }

    #[test]
    fn test_windows_preserve_order_and_offsets() {
        let mut buffer = buffer_with(4, 10_000);
        let samples: Vec<i16> = (0..10).collect();
        buffer.push_bytes(&encode_pcm16(&samples)).unwrap();

        let (offset, window) = buffer.next_window().unwrap();
        assert_eq!(offset, 0);
        assert_eq!(window, &[0, 1, 2, 3]);

        let (offset, window) = buffer.next_window().unwrap();
        assert_eq!(offset, 4);
        assert_eq!(window, &[4, 5, 6, 7]);

        assert!(buffer.next_window().is_none());
        assert_eq!(buffer.pending_samples(), 2);
    }

    #[test]
    fn test_partial_frames_accumulate() {
        let mut buffer = buffer_with(4, 10_000);
        buffer.push_bytes(&encode_pcm16(&[1, 2])).unwrap();
        assert!(buffer.next_window().is_none());
        buffer.push_bytes(&encode_pcm16(&[3, 4])).unwrap();
        let (_, window) = buffer.next_window().unwrap();
        assert_eq!(window, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_invalid_frame_rejected() {
        let mut buffer = buffer_with(4, 10_000);
        let err = buffer.push_bytes(&[0u8; 3]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFrame(_)));
        assert_eq!(buffer.pending_samples(), 0);
    }

    #[test]
    fn test_backlog_drops_oldest_first() {
        // 1 ms backlog at 16 kHz = 16 samples
        let mut buffer = buffer_with(4, 1);
        let samples: Vec<i16> = (0..32).collect();
        let dropped = buffer.push_bytes(&encode_pcm16(&samples)).unwrap();
        assert_eq!(dropped, 16);
        assert_eq!(buffer.pending_samples(), 16);

        // Offsets account for the dropped prefix
        let (offset, window) = buffer.next_window().unwrap();
        assert_eq!(offset, 16);
        assert_eq!(window, &[16, 17, 18, 19]);
    }

    #[test]
    fn test_window_ms() {
        let config = IngestConfig::default();
        assert_eq!(config.window_ms(), 32);
    }
}
