//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for each subsystem,
//! `AppPaths` for cross-platform data directories, TOML persistence via
//! `AppConfig::load` / `AppConfig::save`, and the persisted `LoginSession`.

pub mod login;
pub mod paths;
pub mod settings;

pub use login::LoginSession;
pub use paths::AppPaths;
pub use settings::{
    ApiConfig, AppConfig, BreathingConfig, HotkeyConfig, NarrationConfig, RecordingConfig,
    ScoringConfig, VoiceSettings,
};
