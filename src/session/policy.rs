//! Per-kind exercise rules: pass threshold, trial cap, recording timeout and
//! what gets narrated before a trial.
//!
//! | Kind         | Threshold | Trials | Timeout                 | Failed item |
//! |--------------|-----------|--------|-------------------------|-------------|
//! | Articulation | 0.5       | 3      | 10 s                    | retry       |
//! | Language     | 0.7       | 1      | 30 s                    | move on     |
//! | Fluency      | 0.7       | 1      | item `expectedDuration` | move on     |

use std::time::Duration;

use crate::config::AppConfig;
use crate::narration::Utterance;

use super::catalog::{ExerciseItem, ExerciseKind};

/// Scores this close below the threshold still pass; absorbs float noise in
/// the mean.
const SCORE_EPSILON: f64 = 1e-9;

/// Silence between the instruction and the cue of a language item.
const CUE_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct ExercisePolicy {
    /// Minimum mean composite, inclusive.
    pub threshold: f64,
    /// Trials per item before the mean is taken.
    pub trial_cap: usize,
    /// Recording limit when the item does not set its own.
    pub record_timeout: Duration,
    /// `false` moves on after a failed item instead of asking for a retry.
    pub retry_on_fail: bool,
}

impl ExercisePolicy {
    pub fn for_kind(kind: &ExerciseKind, config: &AppConfig) -> Self {
        let scoring = &config.scoring;
        let recording = &config.recording;
        match kind {
            ExerciseKind::Articulation { .. } => Self {
                threshold: scoring.articulation_threshold,
                trial_cap: scoring.articulation_trials.max(1),
                record_timeout: Duration::from_secs(recording.articulation_secs),
                retry_on_fail: true,
            },
            // Language and fluency record the result and move on; a retry
            // is optional, never a gate.
            ExerciseKind::Language { .. } => Self {
                threshold: scoring.language_threshold,
                trial_cap: scoring.language_trials.max(1),
                record_timeout: Duration::from_secs(recording.language_secs),
                retry_on_fail: false,
            },
            ExerciseKind::Fluency => Self {
                threshold: scoring.fluency_threshold,
                trial_cap: scoring.fluency_trials.max(1),
                record_timeout: Duration::from_secs(recording.language_secs),
                retry_on_fail: false,
            },
        }
    }

    /// `mean >= threshold`.
    pub fn passes(&self, mean: f64) -> bool {
        mean + SCORE_EPSILON >= self.threshold
    }

    pub fn timeout_for(&self, item: &ExerciseItem) -> Duration {
        match item.expected_duration {
            Some(secs) if secs > 0 => Duration::from_secs(u64::from(secs)),
            _ => self.record_timeout,
        }
    }
}

/// Arithmetic mean; `0.0` for no scores.
pub fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

/// What is read aloud before the patient responds.
pub fn narration_script(kind: &ExerciseKind, item: &ExerciseItem) -> Vec<Utterance> {
    match kind {
        // Model the target for the patient to imitate.
        ExerciseKind::Articulation { .. } => vec![Utterance::new(&item.target)],
        ExerciseKind::Fluency => non_empty(vec![Utterance::new(&item.instruction)]),
        ExerciseKind::Language { .. } if item.is_multiple_choice() => non_empty(vec![
            Utterance::new(&item.instruction).pause_after(CUE_PAUSE),
            Utterance::new(item.cue()).repeat(2),
        ]),
        ExerciseKind::Language { .. } => {
            let mut script = vec![Utterance::new(&item.instruction).pause_after(CUE_PAUSE)];
            if let Some(story) = &item.story {
                script.push(Utterance::new(story).pause_after(CUE_PAUSE));
            }
            script.push(Utterance::new(&item.target));
            non_empty(script)
        }
    }
}

fn non_empty(script: Vec<Utterance>) -> Vec<Utterance> {
    script
        .into_iter()
        .filter(|u| !u.text.trim().is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
