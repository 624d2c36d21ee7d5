//! Session state machine.
//!
//! ```text
//! AwaitingStart ──start──▶ Narrating ──▶ Breathing (optional) ──▶ Recording ──▶ Processing ──▶ Scored
//!       ▲                                                                                        │
//!       ├──── error (permission / no audio / request) ◀──────────────────────────────────────────┤
//!       ├──── more trials left ◀─────────────────────────────────────────────────────────────────┤
//!       ├──── Advancing (next item / level) ◀──── mean ≥ threshold ◀─────────────────────────────┤
//!       └──── retry() ◀── Retrying ◀──────────── mean < threshold ◀──────────────────────────────┤
//!                                         Finished ◀── last item of last level passed ◀─────────┘
//! ```
//!
//! [`SessionPhase`] is the only record of what the session is doing, so
//! narration, breathing and recording can never be active together.

use std::collections::BTreeMap;

use crate::api::Assessment;

// ---------------------------------------------------------------------------
// SessionPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Waiting for the patient to start the next trial.
    #[default]
    AwaitingStart,
    Narrating,
    Breathing,
    Recording,
    /// Encoding and waiting for the assessment.
    Processing,
    /// A trial result has just been recorded.
    Scored,
    /// Moving to the next item or level.
    Advancing,
    /// The item's mean fell short; waiting for [`retry`](super::ExerciseSession::retry).
    Retrying,
    /// Every level is done.
    Finished,
}

/// The component currently holding the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Narrating,
    Breathing,
    Recording,
    Processing,
}

impl SessionPhase {
    /// `true` while input other than stop/quit must be ignored.
    pub fn is_busy(&self) -> bool {
        !matches!(self.activity(), Activity::Idle)
    }

    pub fn activity(&self) -> Activity {
        match self {
            SessionPhase::Narrating => Activity::Narrating,
            SessionPhase::Breathing => Activity::Breathing,
            SessionPhase::Recording => Activity::Recording,
            SessionPhase::Processing | SessionPhase::Scored | SessionPhase::Advancing => {
                Activity::Processing
            }
            SessionPhase::AwaitingStart | SessionPhase::Retrying | SessionPhase::Finished => {
                Activity::Idle
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::AwaitingStart => "Ready",
            SessionPhase::Narrating => "Listen",
            SessionPhase::Breathing => "Breathe",
            SessionPhase::Recording => "Recording",
            SessionPhase::Processing => "Scoring",
            SessionPhase::Scored => "Scored",
            SessionPhase::Advancing => "Next",
            SessionPhase::Retrying => "Try again",
            SessionPhase::Finished => "Finished",
        }
    }
}

// ---------------------------------------------------------------------------
// TrialResult
// ---------------------------------------------------------------------------

/// One scored attempt.  Never changed after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    /// 1-based.
    pub trial: usize,
    pub composite: f64,
    pub sub_scores: BTreeMap<String, f64>,
    pub transcription: String,
    pub feedback: Option<String>,
    /// This trial alone met the threshold.
    pub passed: bool,
    pub synthetic: bool,
    /// Chosen option text for multiple-choice items.
    pub answer: Option<String>,
}

impl TrialResult {
    pub fn from_assessment(trial: usize, assessment: Assessment, threshold_met: bool) -> Self {
        Self {
            trial,
            composite: assessment.composite,
            sub_scores: assessment.sub_scores,
            transcription: assessment.transcription,
            feedback: assessment.feedback,
            passed: threshold_met,
            synthetic: assessment.synthetic,
            answer: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Position and per-item progress.  Owned by the session controller.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub level: u32,
    pub item_index: usize,
    /// Results for the current item, oldest first.
    pub results: Vec<TrialResult>,
    pub phase: SessionPhase,
}

impl SessionState {
    pub fn new(level: u32, item_index: usize) -> Self {
        Self {
            level,
            item_index,
            results: Vec::new(),
            phase: SessionPhase::AwaitingStart,
        }
    }

    /// Trials completed on the current item.
    pub fn trial(&self) -> usize {
        self.results.len()
    }

    /// Move to a new item, dropping every per-item result.
    pub fn advance_to(&mut self, level: u32, item_index: usize) {
        self.level = level;
        self.item_index = item_index;
        self.results.clear();
        self.phase = SessionPhase::AwaitingStart;
    }

    /// Start the current item over.
    pub fn reset_item(&mut self) {
        self.results.clear();
        self.phase = SessionPhase::AwaitingStart;
    }

    pub fn composites(&self) -> Vec<f64> {
        self.results.iter().map(|r| r.composite).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_idle_phases_accept_input() {
        assert!(!SessionPhase::AwaitingStart.is_busy());
        assert!(!SessionPhase::Retrying.is_busy());
        assert!(!SessionPhase::Finished.is_busy());
        assert!(SessionPhase::Narrating.is_busy());
        assert!(SessionPhase::Breathing.is_busy());
        assert!(SessionPhase::Recording.is_busy());
        assert!(SessionPhase::Processing.is_busy());
    }

    #[test]
    fn activity_is_a_projection_of_phase() {
        assert_eq!(SessionPhase::Scored.activity(), Activity::Processing);
        assert_eq!(SessionPhase::Breathing.activity(), Activity::Breathing);
        assert_eq!(SessionPhase::default().activity(), Activity::Idle);
    }

    #[test]
    fn reset_keeps_position() {
        let mut state = SessionState::new(2, 1);
        state.results.push(TrialResult::from_assessment(1, Assessment::default(), false));
        state.phase = SessionPhase::Retrying;

        state.reset_item();
        assert_eq!((state.level, state.item_index, state.trial()), (2, 1, 0));
        assert_eq!(state.phase, SessionPhase::AwaitingStart);

        state.results.push(TrialResult::from_assessment(1, Assessment::default(), true));
        state.advance_to(3, 0);
        assert_eq!((state.level, state.item_index, state.trial()), (3, 0, 0));
    }
}
