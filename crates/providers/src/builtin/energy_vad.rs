//! Energy-based voice activity detection
//!
//! Maps the RMS level of a window onto a speech probability. Stateless per
//! window, so duplicated frames cannot skew segmentation.

use async_trait::async_trait;
use serde::Deserialize;

use crate::{ProviderError, VadEngine};

/// Energy VAD configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EnergyVadConfig {
    /// Normalized RMS level that maps to probability 1.0
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,
}

fn default_sensitivity() -> f32 {
    0.02
}

impl Default for EnergyVadConfig {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
        }
    }
}

/// RMS-threshold VAD
pub struct EnergyVad {
    config: EnergyVadConfig,
}

impl EnergyVad {
    pub fn new(config: EnergyVadConfig) -> Self {
        Self { config }
    }

    fn rms(window: &[i16]) -> f32 {
        if window.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = window
            .iter()
            .map(|&s| {
                let normalized = s as f64 / i16::MAX as f64;
                normalized * normalized
            })
            .sum();
        (sum_sq / window.len() as f64).sqrt() as f32
    }
}

#[async_trait]
impl VadEngine for EnergyVad {
    async fn detect(&self, window: &[i16]) -> Result<f32, ProviderError> {
        let rms = Self::rms(window);
        Ok((rms / self.config.sensitivity).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_silence_is_not_speech() {
        let vad = EnergyVad::new(EnergyVadConfig::default());
        let prob = vad.detect(&[0i16; 512]).await.unwrap();
        assert_eq!(prob, 0.0);
    }

    #[tokio::test]
    async fn test_loud_window_is_speech() {
        let vad = EnergyVad::new(EnergyVadConfig::default());
        let prob = vad.detect(&[8000i16; 512]).await.unwrap();
        assert_eq!(prob, 1.0);
    }

    #[tokio::test]
    async fn test_empty_window() {
        let vad = EnergyVad::new(EnergyVadConfig::default());
        assert_eq!(vad.detect(&[]).await.unwrap(), 0.0);
    }
}
