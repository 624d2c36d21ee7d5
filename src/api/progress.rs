//! Resumable progress checkpoints.
//!
//! After every completed item the session pushes a [`ProgressUpdate`]; on
//! start it loads the last [`Checkpoint`] so the patient resumes where they
//! left off.
//!
//! | Scope        | Load                                       | Save                        |
//! |--------------|--------------------------------------------|-----------------------------|
//! | Articulation | `GET /articulation/progress/{user}/{sound}`| `POST /articulation/progress`|
//! | Language     | `GET /language/progress/{mode}`            | `POST /language/progress`   |
//! | Fluency      | `GET /fluency/progress`                    | `POST /fluency/progress`    |

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::{ExerciseKind, LanguageMode};

use super::client::{ApiClient, ApiError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which progress record a session reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProgressScope {
    Articulation { sound: String },
    Language { mode: LanguageMode },
    Fluency,
}

impl From<&ExerciseKind> for ProgressScope {
    fn from(kind: &ExerciseKind) -> Self {
        match kind {
            ExerciseKind::Articulation { sound } => ProgressScope::Articulation {
                sound: sound.clone(),
            },
            ExerciseKind::Language { mode } => ProgressScope::Language { mode: *mode },
            ExerciseKind::Fluency => ProgressScope::Fluency,
        }
    }
}

/// Resume position.
///
/// `level: None` means `item_index` counts items across all levels laid end
/// to end (the language record stores a single running index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub level: Option<u32>,
    pub item_index: usize,
}

/// One completed item, plus where the session goes next.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressUpdate {
    pub level: u32,
    pub item_index: usize,
    /// Position of the item across all levels.
    pub flat_index: usize,
    pub exercise_id: String,
    /// Mean composite of the item's trials.
    pub score: f64,
    pub passed: bool,
    pub sub_scores: BTreeMap<String, f64>,
    pub transcription: String,
    /// Chosen option text for multiple-choice items.
    pub answer: Option<String>,
    /// Level to resume at; one past the last level once the program is done.
    pub next_level: u32,
    pub next_item: usize,
    pub next_flat: usize,
}

impl ProgressUpdate {
    fn body(&self, scope: &ProgressScope, user_id: Option<&str>) -> Value {
        let sub = |key: &str| self.sub_scores.get(key).copied();
        match scope {
            ProgressScope::Articulation { sound } => json!({
                "patient_id": user_id,
                "sound_id": sound,
                "level": self.level,
                "exercise_index": self.item_index,
                "exercise_id": self.exercise_id,
                "score": self.score,
                "passed": self.passed,
                "next_level": self.next_level,
                "next_exercise": self.next_item,
            }),
            ProgressScope::Language { mode } => {
                let mut body = json!({
                    "mode": mode.as_str(),
                    "exercise_index": self.flat_index,
                    "exercise_id": self.exercise_id,
                    "is_correct": self.passed,
                    "score": self.score,
                    "next_exercise": self.next_flat,
                });
                match &self.answer {
                    Some(answer) => body["user_answer"] = json!(answer),
                    None => body["transcription"] = json!(self.transcription),
                }
                body
            }
            ProgressScope::Fluency => json!({
                "level": self.level,
                "exercise_index": self.item_index,
                "exercise_id": self.exercise_id,
                "speaking_rate": sub("speaking_rate"),
                "fluency_score": sub("fluency"),
                "pause_count": sub("pause_count"),
                "disfluencies": sub("disfluencies"),
                "passed": self.passed,
                "next_level": self.next_level,
                "next_exercise": self.next_item,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressStore trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Last checkpoint, or `None` for a first session.
    async fn load(&self, scope: &ProgressScope) -> Result<Option<Checkpoint>, ApiError>;

    async fn save(&self, scope: &ProgressScope, update: &ProgressUpdate) -> Result<(), ApiError>;
}

// ---------------------------------------------------------------------------
// ApiClient as ProgressStore
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProgressResponse {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    has_progress: Option<bool>,
    #[serde(default)]
    current_level: Option<u32>,
    #[serde(default)]
    current_exercise: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ProgressResponse {
    fn into_checkpoint(self, scope: &ProgressScope) -> Result<Option<Checkpoint>, ApiError> {
        if !self.success {
            return Err(ApiError::Rejected(
                self.message.unwrap_or_else(|| "progress unavailable".into()),
            ));
        }
        let has_progress = self
            .has_progress
            .unwrap_or(self.current_level.is_some() || self.current_exercise.is_some());
        if !has_progress {
            return Ok(None);
        }

        let item_index = self.current_exercise.unwrap_or(0);
        let checkpoint = match scope {
            ProgressScope::Language { .. } => Checkpoint {
                level: None,
                item_index,
            },
            _ => Checkpoint {
                level: Some(self.current_level.unwrap_or(1)),
                item_index,
            },
        };
        Ok(Some(checkpoint))
    }
}

impl ApiClient {
    fn progress_load_path(&self, scope: &ProgressScope) -> Result<String, ApiError> {
        Ok(match scope {
            ProgressScope::Articulation { sound } => {
                let user = self.user_id().ok_or(ApiError::Unauthorized)?;
                format!("articulation/progress/{user}/{sound}")
            }
            ProgressScope::Language { mode } => format!("language/progress/{mode}"),
            ProgressScope::Fluency => "fluency/progress".into(),
        })
    }

    fn progress_save_path(scope: &ProgressScope) -> &'static str {
        match scope {
            ProgressScope::Articulation { .. } => "articulation/progress",
            ProgressScope::Language { .. } => "language/progress",
            ProgressScope::Fluency => "fluency/progress",
        }
    }
}

#[async_trait]
impl ProgressStore for ApiClient {
    async fn load(&self, scope: &ProgressScope) -> Result<Option<Checkpoint>, ApiError> {
        let path = self.progress_load_path(scope)?;
        let response: ProgressResponse = self.get_json(&path).await?;
        let checkpoint = response.into_checkpoint(scope)?;
        log::info!("api: {scope:?} checkpoint {checkpoint:?}");
        Ok(checkpoint)
    }

    async fn save(&self, scope: &ProgressScope, update: &ProgressUpdate) -> Result<(), ApiError> {
        let body = update.body(scope, self.user_id());
        let response: SaveResponse = self
            .post_json(Self::progress_save_path(scope), &body)
            .await?;
        if !response.success {
            return Err(ApiError::Rejected(
                response.message.unwrap_or_else(|| "progress not saved".into()),
            ));
        }
        log::debug!(
            "api: saved {scope:?} item {} (next {}/{})",
            update.exercise_id,
            update.next_level,
            update.next_item
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryProgressStore
// ---------------------------------------------------------------------------

/// In-process store; used offline and in tests.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: Mutex<HashMap<ProgressScope, Vec<ProgressUpdate>>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing checkpoint.
    pub fn with_checkpoint(scope: ProgressScope, level: u32, item_index: usize) -> Self {
        let store = Self::new();
        if let Ok(mut records) = store.records.lock() {
            records.insert(
                scope,
                vec![ProgressUpdate {
                    next_level: level,
                    next_item: item_index,
                    ..ProgressUpdate::default()
                }],
            );
        }
        store
    }

    /// Every update saved for `scope`, oldest first.
    pub fn updates(&self, scope: &ProgressScope) -> Vec<ProgressUpdate> {
        self.records
            .lock()
            .map(|r| r.get(scope).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self, scope: &ProgressScope) -> Result<Option<Checkpoint>, ApiError> {
        let records = self
            .records
            .lock()
            .map_err(|_| ApiError::Request("progress store poisoned".into()))?;
        Ok(records.get(scope).and_then(|u| u.last()).map(|last| Checkpoint {
            level: Some(last.next_level),
            item_index: last.next_item,
        }))
    }

    async fn save(&self, scope: &ProgressScope, update: &ProgressUpdate) -> Result<(), ApiError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| ApiError::Request("progress store poisoned".into()))?;
        records.entry(scope.clone()).or_default().push(update.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::api_client;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn update() -> ProgressUpdate {
        let mut sub_scores = BTreeMap::new();
        sub_scores.insert("fluency".to_string(), 82.0);
        sub_scores.insert("speaking_rate".to_string(), 118.0);
        sub_scores.insert("pause_count".to_string(), 2.0);
        sub_scores.insert("disfluencies".to_string(), 1.0);
        ProgressUpdate {
            level: 2,
            item_index: 1,
            flat_index: 4,
            exercise_id: "phrase-2".into(),
            score: 0.82,
            passed: true,
            sub_scores,
            transcription: "good morning".into(),
            answer: None,
            next_level: 2,
            next_item: 2,
            next_flat: 5,
        }
    }

    #[tokio::test]
    async fn fluency_checkpoint_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/fluency/progress"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "has_progress": true,
                "current_level": 3,
                "current_exercise": 2
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/fluency/progress"))
            .and(body_partial_json(json!({
                "level": 2,
                "exercise_index": 1,
                "exercise_id": "phrase-2",
                "fluency_score": 82.0,
                "speaking_rate": 118.0,
                "passed": true,
                "next_exercise": 2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = api_client(&server, Some("tok"));
        let checkpoint = client.load(&ProgressScope::Fluency).await.expect("load");
        assert_eq!(
            checkpoint,
            Some(Checkpoint {
                level: Some(3),
                item_index: 2
            })
        );
        client
            .save(&ProgressScope::Fluency, &update())
            .await
            .expect("save");
    }

    #[tokio::test]
    async fn language_checkpoint_is_a_running_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/language/progress/receptive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "has_progress": true,
                "current_exercise": 7,
                "exercises": []
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/language/progress"))
            .and(body_partial_json(json!({
                "mode": "receptive",
                "exercise_index": 4,
                "is_correct": false,
                "user_answer": "Banana",
                "next_exercise": 5
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let scope = ProgressScope::Language {
            mode: LanguageMode::Receptive,
        };
        let client = api_client(&server, None);
        assert_eq!(
            client.load(&scope).await.expect("load"),
            Some(Checkpoint {
                level: None,
                item_index: 7
            })
        );

        let mut answered = update();
        answered.passed = false;
        answered.score = 0.0;
        answered.answer = Some("Banana".into());
        client.save(&scope, &answered).await.expect("save");
    }

    #[tokio::test]
    async fn no_progress_means_fresh_start() {
        let server = MockServer::start().await;
        Mock::given(path("/api/language/progress/expressive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "has_progress": false,
                "current_exercise": 0,
                "exercises": []
            })))
            .mount(&server)
            .await;

        let scope = ProgressScope::Language {
            mode: LanguageMode::Expressive,
        };
        assert_eq!(api_client(&server, None).load(&scope).await.expect("load"), None);
    }

    #[tokio::test]
    async fn articulation_progress_is_per_patient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/articulation/progress/patient-7/r"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "patient_id": "patient-7",
                "sound_id": "r",
                "current_level": 4,
                "level_scores": {"1": 0.9},
                "total_attempts": 12
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/articulation/progress"))
            .and(body_partial_json(json!({
                "patient_id": "patient-7",
                "sound_id": "r",
                "level": 2,
                "score": 0.82
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let scope = ProgressScope::Articulation { sound: "r".into() };
        let client = api_client(&server, None);
        assert_eq!(
            client.load(&scope).await.expect("load"),
            Some(Checkpoint {
                level: Some(4),
                item_index: 0
            })
        );
        client.save(&scope, &update()).await.expect("save");
    }

    #[tokio::test]
    async fn rejected_save_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(path("/api/fluency/progress"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "message": "Invalid level"
            })))
            .mount(&server)
            .await;

        let err = api_client(&server, None)
            .save(&ProgressScope::Fluency, &update())
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Rejected("Invalid level".into()));
    }

    #[tokio::test]
    async fn memory_store_resumes_from_last_update() {
        let store = MemoryProgressStore::new();
        assert_eq!(store.load(&ProgressScope::Fluency).await.expect("load"), None);

        store
            .save(&ProgressScope::Fluency, &update())
            .await
            .expect("save");
        assert_eq!(
            store.load(&ProgressScope::Fluency).await.expect("load"),
            Some(Checkpoint {
                level: Some(2),
                item_index: 2
            })
        );
        assert_eq!(store.updates(&ProgressScope::Fluency).len(), 1);

        let seeded = MemoryProgressStore::with_checkpoint(ProgressScope::Fluency, 4, 1);
        assert_eq!(
            seeded.load(&ProgressScope::Fluency).await.expect("load"),
            Some(Checkpoint {
                level: Some(4),
                item_index: 1
            })
        );
    }
}
