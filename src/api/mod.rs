//! Clinic backend: scoring, catalogs and progress.
//!
//! ```text
//! ExerciseSession ──▶ Assessor ──────▶ ApiClient ──▶ POST /articulation/record …
//!        │                 ▲
//!        │      SyntheticScoreAssessor (optional)
//!        └──────▶ ProgressStore ─────▶ ApiClient ──▶ GET/POST …/progress
//! ```

pub mod assess;
pub mod catalog;
pub mod client;
pub mod fallback;
pub mod progress;

pub use assess::{Assessment, AssessmentRequest, Assessor};
pub use client::{ApiClient, ApiError};
pub use fallback::SyntheticScoreAssessor;
pub use progress::{Checkpoint, MemoryProgressStore, ProgressScope, ProgressStore, ProgressUpdate};
