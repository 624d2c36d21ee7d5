//! Cross-platform application paths using the `dirs` crate.
//!
//! Config dir (settings + persisted login):
//!   Windows: %APPDATA%\therapy-coach\
//!   macOS:   ~/Library/Application Support/therapy-coach/
//!   Linux:   ~/.config/therapy-coach/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml` and `session.json`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Full path to `session.json` (bearer token of the logged-in patient).
    pub session_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "therapy-coach";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            session_file: config_dir.join("session.json"),
            config_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
