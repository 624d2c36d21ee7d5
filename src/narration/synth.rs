//! Speech-synthesis backends.
//!
//! [`CommandSynthesizer`] runs a system TTS program (espeak-ng by default)
//! once per utterance.  The child is killed when the future is dropped, so a
//! cancelled narration never leaves a process talking in the background.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::VoiceSettings;

// ---------------------------------------------------------------------------
// NarrationError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NarrationError {
    /// The synthesizer program is missing or cannot be started.
    #[error("speech synthesizer unavailable: {0}")]
    Unavailable(String),

    /// The synthesizer ran but reported a failure.
    #[error("speech synthesis failed: {0}")]
    Failed(String),

    /// A newer narration or an explicit cancel superseded this one.
    #[error("narration cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// SpeechSynthesizer trait
// ---------------------------------------------------------------------------

/// Speaks one utterance and resolves when it has finished playing.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn speak(&self, text: &str, voice: &VoiceSettings) -> Result<(), NarrationError>;
}

// ---------------------------------------------------------------------------
// CommandSynthesizer
// ---------------------------------------------------------------------------

/// espeak-ng default speed in words per minute.
const BASE_WPM: f32 = 175.0;
/// espeak-ng default pitch on its 0–99 scale.
const BASE_PITCH: f32 = 50.0;

/// Speaks through an external espeak-compatible program.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Command-line arguments for one utterance.
    fn args(text: &str, voice: &VoiceSettings) -> Vec<String> {
        let wpm = (BASE_WPM * voice.rate).round().clamp(80.0, 450.0) as u32;
        let pitch = (BASE_PITCH * voice.pitch).round().clamp(0.0, 99.0) as u32;

        let mut args = vec![
            "-s".to_string(),
            wpm.to_string(),
            "-p".to_string(),
            pitch.to_string(),
        ];
        if let Some(name) = voice.voice.as_deref().filter(|v| !v.is_empty()) {
            args.push("-v".into());
            args.push(name.to_string());
        }
        args.push("--".into());
        args.push(text.to_string());
        args
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn speak(&self, text: &str, voice: &VoiceSettings) -> Result<(), NarrationError> {
        let output = tokio::process::Command::new(&self.program)
            .args(Self::args(text, voice))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    NarrationError::Unavailable(format!("'{}' not found", self.program))
                } else {
                    NarrationError::Unavailable(e.to_string())
                }
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(NarrationError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// SilentSynthesizer
// ---------------------------------------------------------------------------

/// Logs prompts instead of speaking them.  Used when narration is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSynthesizer;

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    async fn speak(&self, text: &str, _voice: &VoiceSettings) -> Result<(), NarrationError> {
        log::info!("narration (silent): {text}");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_scale_rate_and_pitch() {
        let voice = VoiceSettings {
            rate: 0.8,
            pitch: 1.0,
            voice: Some("en-us".into()),
        };
        let args = CommandSynthesizer::args("Hold", &voice);
        assert_eq!(args, vec!["-s", "140", "-p", "50", "-v", "en-us", "--", "Hold"]);
    }

    #[test]
    fn args_clamp_extremes_and_skip_empty_voice() {
        let voice = VoiceSettings {
            rate: 0.1,
            pitch: 5.0,
            voice: Some(String::new()),
        };
        let args = CommandSynthesizer::args("-s", &voice);
        assert_eq!(args, vec!["-s", "80", "-p", "99", "--", "-s"]);
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let synth = CommandSynthesizer::new("therapy-coach-no-such-tts-binary");
        let err = synth
            .speak("hello", &VoiceSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NarrationError::Unavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn silent_synthesizer_always_succeeds() {
        assert!(SilentSynthesizer
            .speak("Breathe in", &VoiceSettings::default())
            .await
            .is_ok());
    }
}
