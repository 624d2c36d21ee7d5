//! Persisted login session (`session.json`).
//!
//! The login flow itself lives in the web front end; this crate only reads
//! the bearer token and user id it left behind, the same way the browser
//! pages read them from local storage.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

/// Credentials of the signed-in patient.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginSession {
    /// JWT sent as `Authorization: Bearer …`.
    pub token: Option<String>,
    /// Backend user id, sent as `patient_id` with articulation recordings.
    pub user_id: Option<String>,
}

impl LoginSession {
    /// Load from the platform `session.json`; a missing file is an anonymous
    /// session.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().session_file)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Token with blank values treated as absent.
    pub fn bearer(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.trim().is_empty())
    }
}
