//! Speech assessment requests.
//!
//! | Kind         | Endpoint                          | Composite                |
//! |--------------|-----------------------------------|--------------------------|
//! | Articulation | `POST /articulation/record`       | `scores.computed_score`  |
//! | Expressive   | `POST /language/assess-expressive`| `score`                  |
//! | Fluency      | `POST /fluency/assess`            | `fluency_score / 100`    |
//!
//! All three are multipart forms with the recording in the `audio` field.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::audio::AudioPayload;

use super::client::{ApiClient, ApiError};

// ---------------------------------------------------------------------------
// Request / result types
// ---------------------------------------------------------------------------

/// Form fields that accompany the recording.
#[derive(Debug, Clone, PartialEq)]
pub enum AssessmentRequest {
    Articulation {
        patient_id: String,
        sound_id: String,
        level: u32,
        target: String,
        /// 1-based trial number.
        trial: u32,
    },
    Expressive {
        exercise_id: String,
        exercise_type: String,
        expected_keywords: Vec<String>,
        min_words: u32,
    },
    Fluency {
        target_text: String,
        /// Seconds.
        expected_duration: u32,
        exercise_type: String,
    },
}

impl AssessmentRequest {
    pub fn endpoint(&self) -> &'static str {
        match self {
            AssessmentRequest::Articulation { .. } => "articulation/record",
            AssessmentRequest::Expressive { .. } => "language/assess-expressive",
            AssessmentRequest::Fluency { .. } => "fluency/assess",
        }
    }

    fn form(&self, audio: &AudioPayload) -> Result<Form, ApiError> {
        let part = Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name.clone())
            .mime_str(&audio.mime)
            .map_err(|e| ApiError::Request(e.to_string()))?;
        let form = Form::new().part("audio", part);

        Ok(match self {
            AssessmentRequest::Articulation {
                patient_id,
                sound_id,
                level,
                target,
                trial,
            } => form
                .text("patient_id", patient_id.clone())
                .text("sound_id", sound_id.clone())
                .text("level", level.to_string())
                .text("target", target.clone())
                .text("trial", trial.to_string()),
            AssessmentRequest::Expressive {
                exercise_id,
                exercise_type,
                expected_keywords,
                min_words,
            } => form
                .text("exercise_id", exercise_id.clone())
                .text("exercise_type", exercise_type.clone())
                .text(
                    "expected_keywords",
                    serde_json::to_string(expected_keywords)
                        .map_err(|e| ApiError::Request(e.to_string()))?,
                )
                .text("min_words", min_words.to_string()),
            AssessmentRequest::Fluency {
                target_text,
                expected_duration,
                exercise_type,
            } => form
                .text("target_text", target_text.clone())
                .text("expected_duration", expected_duration.to_string())
                .text("exercise_type", exercise_type.clone()),
        })
    }
}

/// Scored response, normalised across exercise kinds.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Assessment {
    /// Pass/fail metric in `[0.0, 1.0]`.
    pub composite: f64,
    /// Named sub-scores as returned by the server (pronunciation, accuracy,
    /// speaking rate, …).
    pub sub_scores: BTreeMap<String, f64>,
    pub transcription: String,
    pub feedback: Option<String>,
    pub key_phrases: Vec<String>,
    /// `true` when the score was made up because the server was unreachable.
    pub synthetic: bool,
}

// ---------------------------------------------------------------------------
// Assessor trait
// ---------------------------------------------------------------------------

/// Scores one recording.
#[async_trait]
pub trait Assessor: Send + Sync {
    async fn assess(
        &self,
        request: &AssessmentRequest,
        audio: &AudioPayload,
    ) -> Result<Assessment, ApiError>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ArticulationScores {
    computed_score: Option<f64>,
    pronunciation_score: Option<f64>,
    accuracy_score: Option<f64>,
    completeness_score: Option<f64>,
    fluency_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ArticulationResponse {
    #[serde(default)]
    scores: ArticulationScores,
    #[serde(default)]
    transcription: Option<String>,
    #[serde(default)]
    feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExpressiveResponse {
    score: f64,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    transcription: Option<String>,
    #[serde(default)]
    key_phrases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FluencyResponse {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    transcription: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    speaking_rate: Option<f64>,
    #[serde(default)]
    fluency_score: Option<f64>,
    #[serde(default)]
    pause_count: Option<f64>,
    #[serde(default)]
    disfluencies: serde_json::Value,
}

fn default_true() -> bool {
    true
}

fn insert_some(map: &mut BTreeMap<String, f64>, key: &str, value: Option<f64>) {
    if let Some(v) = value {
        map.insert(key.to_string(), v);
    }
}

impl From<ArticulationResponse> for Assessment {
    fn from(r: ArticulationResponse) -> Self {
        let mut sub_scores = BTreeMap::new();
        insert_some(&mut sub_scores, "pronunciation", r.scores.pronunciation_score);
        insert_some(&mut sub_scores, "accuracy", r.scores.accuracy_score);
        insert_some(&mut sub_scores, "completeness", r.scores.completeness_score);
        insert_some(&mut sub_scores, "fluency", r.scores.fluency_score);

        Assessment {
            composite: r.scores.computed_score.unwrap_or(0.0).clamp(0.0, 1.0),
            sub_scores,
            transcription: r.transcription.unwrap_or_default(),
            feedback: r.feedback,
            key_phrases: Vec::new(),
            synthetic: false,
        }
    }
}

impl From<ExpressiveResponse> for Assessment {
    fn from(r: ExpressiveResponse) -> Self {
        let mut sub_scores = BTreeMap::new();
        sub_scores.insert("score".to_string(), r.score);

        Assessment {
            composite: r.score.clamp(0.0, 1.0),
            sub_scores,
            transcription: r.transcription.unwrap_or_default(),
            feedback: r.feedback,
            key_phrases: r.key_phrases,
            synthetic: false,
        }
    }
}

impl TryFrom<FluencyResponse> for Assessment {
    type Error = ApiError;

    fn try_from(r: FluencyResponse) -> Result<Self, ApiError> {
        if !r.success {
            return Err(ApiError::Rejected(
                r.error.unwrap_or_else(|| "fluency assessment failed".into()),
            ));
        }
        let fluency = r
            .fluency_score
            .ok_or_else(|| ApiError::Parse("missing fluency_score".into()))?;

        let disfluencies = match &r.disfluencies {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::Array(items) => Some(items.len() as f64),
            _ => None,
        };

        let mut sub_scores = BTreeMap::new();
        sub_scores.insert("fluency".to_string(), fluency);
        insert_some(&mut sub_scores, "duration", r.duration);
        insert_some(&mut sub_scores, "speaking_rate", r.speaking_rate);
        insert_some(&mut sub_scores, "pause_count", r.pause_count);
        insert_some(&mut sub_scores, "disfluencies", disfluencies);

        Ok(Assessment {
            composite: (fluency / 100.0).clamp(0.0, 1.0),
            sub_scores,
            transcription: r.transcription.unwrap_or_default(),
            feedback: None,
            key_phrases: Vec::new(),
            synthetic: false,
        })
    }
}

// ---------------------------------------------------------------------------
// ApiClient as Assessor
// ---------------------------------------------------------------------------

#[async_trait]
impl Assessor for ApiClient {
    async fn assess(
        &self,
        request: &AssessmentRequest,
        audio: &AudioPayload,
    ) -> Result<Assessment, ApiError> {
        let form = request.form(audio)?;
        let path = request.endpoint();

        let assessment: Assessment = match request {
            AssessmentRequest::Articulation { .. } => self
                .post_form::<ArticulationResponse>(path, form)
                .await?
                .into(),
            AssessmentRequest::Expressive { .. } => self
                .post_form::<ExpressiveResponse>(path, form)
                .await?
                .into(),
            AssessmentRequest::Fluency { .. } => self
                .post_form::<FluencyResponse>(path, form)
                .await?
                .try_into()?,
        };

        log::info!(
            "api: {path} → composite {:.2} ({} bytes, canonical = {})",
            assessment.composite,
            audio.bytes.len(),
            audio.canonical
        );
        Ok(assessment)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
