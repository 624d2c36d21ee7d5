//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every section is `#[serde(default)]` so a partially written
//! `settings.toml` still loads.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// ApiConfig
// ---------------------------------------------------------------------------

/// Connection settings for the clinic backend (assessment + progress).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL including the `/api` prefix, without a trailing slash.
    pub base_url: String,
    /// Maximum seconds to wait for any single request.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".into(),
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingConfig
// ---------------------------------------------------------------------------

/// Microphone and auto-stop settings.
///
/// Fluency items carry their own `expected_duration`, which replaces the
/// timeout for that exercise kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Auto-stop for articulation trials.
    pub articulation_secs: u64,
    /// Auto-stop for expressive language responses.
    pub language_secs: u64,
    /// Input device name; `None` means the system default.
    pub device: Option<String>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            articulation_secs: 10,
            language_secs: 30,
            device: None,
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceSettings / NarrationConfig
// ---------------------------------------------------------------------------

/// Speech-synthesis parameters for one difficulty level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// Relative speaking rate; `1.0` is the synthesizer's normal speed.
    pub rate: f32,
    /// Relative pitch; `1.0` is the synthesizer's default pitch.
    pub pitch: f32,
    /// Voice name passed to the synthesizer; `None` keeps its default.
    pub voice: Option<String>,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            rate: 0.85,
            pitch: 1.0,
            voice: None,
        }
    }
}

/// Narration (text-to-speech) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    /// When `false` the silent synthesizer is used and prompts are only logged.
    pub enabled: bool,
    /// External TTS program invoked once per utterance.
    pub command: String,
    /// Pause between repeats of the same utterance.
    pub repeat_pause_ms: u64,
    /// Upper bound for one utterance; a hung synthesizer is abandoned after this.
    pub utterance_timeout_secs: u64,
    /// Voice table keyed by level number (as a string key so it maps to a
    /// TOML table).  Isolated sounds are slow, connected speech is faster.
    pub voices: BTreeMap<String, VoiceSettings>,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        let voices = [(1, 0.7), (2, 0.75), (3, 0.8), (4, 0.85), (5, 0.9)]
            .into_iter()
            .map(|(level, rate)| {
                (
                    level.to_string(),
                    VoiceSettings {
                        rate,
                        ..VoiceSettings::default()
                    },
                )
            })
            .collect();

        Self {
            enabled: true,
            command: "espeak-ng".into(),
            repeat_pause_ms: 800,
            utterance_timeout_secs: 15,
            voices,
        }
    }
}

// ---------------------------------------------------------------------------
// BreathingConfig
// ---------------------------------------------------------------------------

/// Phase durations of the guided-breathing warm-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreathingConfig {
    pub inhale_secs: u64,
    pub hold_secs: u64,
    pub exhale_secs: u64,
    pub ready_secs: u64,
    /// Delay between the end of the sequence and the automatic recording start.
    pub handoff_delay_ms: u64,
}

impl Default for BreathingConfig {
    fn default() -> Self {
        Self {
            inhale_secs: 3,
            hold_secs: 2,
            exhale_secs: 4,
            ready_secs: 1,
            handoff_delay_ms: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// ScoringConfig
// ---------------------------------------------------------------------------

/// Pass thresholds and trial caps per exercise kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub articulation_threshold: f64,
    pub language_threshold: f64,
    pub fluency_threshold: f64,
    pub articulation_trials: usize,
    pub language_trials: usize,
    pub fluency_trials: usize,
    /// Test mode: substitute a pseudo-random score when the assessment
    /// backend is unreachable.  Never enable against a real clinic backend.
    pub synthetic_fallback: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            articulation_threshold: 0.5,
            language_threshold: 0.7,
            fluency_threshold: 0.7,
            articulation_trials: 3,
            language_trials: 1,
            fluency_trials: 1,
            synthetic_fallback: false,
        }
    }
}

// ---------------------------------------------------------------------------
// HotkeyConfig
// ---------------------------------------------------------------------------

/// Global key bindings used by the terminal driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    /// Starts a trial, or stops the recording while one is running.
    pub primary_key: String,
    /// Resets a failed item so it can be attempted again.
    pub retry_key: String,
    /// Ends the session.
    pub quit_key: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            primary_key: "F9".into(),
            retry_key: "F10".into(),
            quit_key: "Escape".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use therapy_coach::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Write it back so the patient has a file to edit
/// let path = config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub recording: RecordingConfig,
    pub narration: NarrationConfig,
    pub breathing: BreathingConfig,
    pub scoring: ScoringConfig,
    pub hotkey: HotkeyConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.  Returns the path written.
    pub fn save(&self) -> Result<std::path::PathBuf> {
        let path = AppPaths::new().settings_file;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl NarrationConfig {
    pub fn repeat_pause(&self) -> Duration {
        Duration::from_millis(self.repeat_pause_ms)
    }

    pub fn utterance_timeout(&self) -> Duration {
        Duration::from_secs(self.utterance_timeout_secs)
    }
}

impl BreathingConfig {
    pub fn handoff_delay(&self) -> Duration {
        Duration::from_millis(self.handoff_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
