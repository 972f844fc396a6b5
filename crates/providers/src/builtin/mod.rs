//! Built-in reference adapters
//!
//! Self-contained engines that make the server runnable end-to-end without
//! external services: an RMS-based VAD, a fixed-text ASR, a scripted
//! streaming LLM, and a tone-synthesis TTS. They double as the substrate for
//! the integration tests.

mod energy_vad;
mod fixed_asr;
mod scripted_llm;
mod tone_tts;

pub use energy_vad::{EnergyVad, EnergyVadConfig};
pub use fixed_asr::{FixedAsr, FixedAsrConfig};
pub use scripted_llm::{ScriptedLlm, ScriptedLlmConfig};
pub use tone_tts::{ToneTts, ToneTtsConfig};

use std::sync::Arc;

use crate::registry::{Registries, RegistryError};

fn parse_config<C: serde::de::DeserializeOwned + Default>(
    category: &'static str,
    name: &str,
    config: &serde_json::Value,
) -> Result<C, RegistryError> {
    if config.is_null() {
        return Ok(C::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| RegistryError::Construction {
        category,
        name: name.to_string(),
        message: e.to_string(),
    })
}

/// Install every built-in adapter into the given registries.
pub fn install(regs: &mut Registries) {
    regs.vad.register(
        "energy",
        Box::new(|cfg| {
            let parsed: EnergyVadConfig = parse_config("vad", "energy", cfg)?;
            Ok(Arc::new(EnergyVad::new(parsed)))
        }),
    );

    regs.asr.register(
        "fixed",
        Box::new(|cfg| {
            let parsed: FixedAsrConfig = parse_config("asr", "fixed", cfg)?;
            Ok(Arc::new(FixedAsr::new(parsed)))
        }),
    );

    regs.llm.register(
        "scripted",
        Box::new(|cfg| {
            let parsed: ScriptedLlmConfig = parse_config("llm", "scripted", cfg)?;
            Ok(Arc::new(ScriptedLlm::new(parsed)))
        }),
    );

    regs.tts.register(
        "tone",
        Box::new(|cfg| {
            let parsed: ToneTtsConfig = parse_config("tts", "tone", cfg)?;
            Ok(Arc::new(ToneTts::new(parsed)))
        }),
    );
}
