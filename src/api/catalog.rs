//! Exercise catalogs served by the backend.
//!
//! ```text
//! GET /fluency-exercises/active                    → fluency levels
//! GET /language-exercises/active?mode=expressive   → expressive levels
//! GET /receptive-exercises/active                  → multiple-choice levels
//! ```
//!
//! All three answer `{ success, exercises_by_level: { "<n>": { name, exercises } } }`.
//! Articulation catalogs are built in and never fetched.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::session::{Catalog, ChoiceOption, ExerciseItem, ExerciseKind, LanguageMode, Level};

use super::client::{ApiClient, ApiError};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    exercises_by_level: BTreeMap<String, LevelDto>,
}

#[derive(Debug, Deserialize)]
struct LevelDto {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    exercises: Vec<ExerciseDto>,
}

/// Superset of the fluency, expressive and receptive exercise shapes.
#[derive(Debug, Deserialize)]
struct ExerciseDto {
    #[serde(default, alias = "exercise_id")]
    id: Option<String>,
    #[serde(default, rename = "_id")]
    object_id: Option<String>,
    #[serde(rename = "type", default)]
    exercise_type: String,
    #[serde(default)]
    instruction: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default, rename = "expectedDuration", alias = "expected_duration")]
    expected_duration: Option<u32>,
    #[serde(default, rename = "expectedKeywords", alias = "expected_keywords")]
    expected_keywords: Vec<String>,
    #[serde(default, rename = "minWords", alias = "min_words")]
    min_words: Option<u32>,
    #[serde(default)]
    options: Vec<ChoiceOption>,
    #[serde(default)]
    breathing: Option<bool>,
    #[serde(default)]
    story: Option<String>,
}

fn default_true() -> bool {
    true
}

const DEFAULT_MIN_WORDS: u32 = 5;

impl ExerciseDto {
    fn into_item(self, kind: &ExerciseKind, level: u32, index: usize) -> ExerciseItem {
        let id = self
            .id
            .or(self.object_id)
            .unwrap_or_else(|| format!("level{level}-{}", index + 1));
        let target = self.target.or(self.prompt).unwrap_or_default();

        ExerciseItem {
            id,
            exercise_type: self.exercise_type,
            instruction: self.instruction,
            target,
            expected_duration: self.expected_duration,
            expected_keywords: self.expected_keywords,
            min_words: self.min_words.unwrap_or(DEFAULT_MIN_WORDS),
            options: self.options,
            // Fluency items warm up unless the therapist turned it off.
            breathing: self
                .breathing
                .unwrap_or(matches!(kind, ExerciseKind::Fluency)),
            story: self.story,
        }
    }
}

fn default_level_name(kind: &ExerciseKind, level: u32) -> String {
    match (kind, level) {
        (ExerciseKind::Language { mode: LanguageMode::Receptive }, 1) => "Vocabulary".into(),
        (ExerciseKind::Language { mode: LanguageMode::Receptive }, 2) => "Directions".into(),
        (ExerciseKind::Language { mode: LanguageMode::Receptive }, 3) => "Comprehension".into(),
        _ => format!("Level {level}"),
    }
}

impl CatalogResponse {
    fn into_catalog(self, kind: ExerciseKind) -> Result<Catalog, ApiError> {
        if !self.success {
            return Err(ApiError::Rejected(
                self.message.unwrap_or_else(|| "catalog unavailable".into()),
            ));
        }

        let mut levels = Vec::with_capacity(self.exercises_by_level.len());
        for (key, dto) in self.exercises_by_level {
            let number: u32 = key
                .trim()
                .parse()
                .map_err(|_| ApiError::Parse(format!("level key '{key}' is not a number")))?;
            let items = dto
                .exercises
                .into_iter()
                .enumerate()
                .map(|(i, e)| e.into_item(&kind, number, i))
                .collect();
            levels.push(Level {
                number,
                name: dto.name.unwrap_or_else(|| default_level_name(&kind, number)),
                items,
            });
        }

        let catalog = Catalog::new(kind, levels);
        if catalog.is_empty() {
            return Err(ApiError::Rejected("catalog has no active exercises".into()));
        }
        Ok(catalog)
    }
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

impl ApiClient {
    /// Load the catalog for `kind`.
    ///
    /// Articulation catalogs are built in; an unknown sound is rejected
    /// without touching the network.
    pub async fn fetch_catalog(&self, kind: &ExerciseKind) -> Result<Catalog, ApiError> {
        let path = match kind {
            ExerciseKind::Articulation { sound } => {
                return Catalog::articulation(sound)
                    .ok_or_else(|| ApiError::Rejected(format!("no exercises for sound '{sound}'")));
            }
            ExerciseKind::Fluency => "fluency-exercises/active".to_string(),
            ExerciseKind::Language {
                mode: LanguageMode::Expressive,
            } => "language-exercises/active?mode=expressive".to_string(),
            ExerciseKind::Language {
                mode: LanguageMode::Receptive,
            } => "receptive-exercises/active".to_string(),
        };

        let response: CatalogResponse = self.get_json(&path).await?;
        let catalog = response.into_catalog(kind.clone())?;
        log::info!(
            "api: {} catalog with {} levels, {} items",
            kind.label(),
            catalog.levels().len(),
            catalog.item_count()
        );
        Ok(catalog)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
