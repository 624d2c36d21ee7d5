//! Spoken prompts.
//!
//! * [`SpeechSynthesizer`]: async trait implemented by every TTS backend.
//! * [`CommandSynthesizer`]: external espeak-compatible program.
//! * [`SilentSynthesizer`]: logs prompts, used when narration is disabled.
//! * [`VoiceTable`]: voice settings keyed by level.
//! * [`NarrationService`]: process-wide, one narration at a time.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use therapy_coach::config::AppConfig;
//! use therapy_coach::narration::{build_synthesizer, NarrationService};
//!
//! # async fn example() {
//! let config = AppConfig::default();
//! let narrator = NarrationService::init(&config.narration, build_synthesizer(&config.narration));
//! narrator.speak("Breathe in slowly through your nose", 1, 1).await.ok();
//! # }
//! ```

pub mod service;
pub mod synth;
pub mod voice;

use std::sync::Arc;

use crate::config::NarrationConfig;

pub use service::{NarrationService, Utterance};
pub use synth::{CommandSynthesizer, NarrationError, SilentSynthesizer, SpeechSynthesizer};
pub use voice::VoiceTable;

/// Pick the synthesizer backend for `config`.
pub fn build_synthesizer(config: &NarrationConfig) -> Arc<dyn SpeechSynthesizer> {
    if config.enabled && !config.command.trim().is_empty() {
        Arc::new(CommandSynthesizer::new(config.command.trim()))
    } else {
        log::info!("narration: disabled, prompts will only be logged");
        Arc::new(SilentSynthesizer)
    }
}
