//! Guided-breathing warm-up.
//!
//! ```text
//! Inhale (3 s) ─▶ Hold (2 s) ─▶ Exhale (4 s) ─▶ Ready (1 s) ─▶ Complete ─(500 ms)─▶ hand-off
//! ```
//!
//! Each phase speaks its prompt on entry and counts down once per second.
//! The prompt is bounded by the phase length, so a slow or failing
//! synthesizer never stretches or skips a phase.  Only cancellation ends the
//! sequence early.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::BreathingConfig;
use crate::narration::NarrationService;

// ---------------------------------------------------------------------------
// BreathPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreathPhase {
    Inhale,
    Hold,
    Exhale,
    Ready,
    Complete,
}

impl BreathPhase {
    /// Timed phases in the order they run.
    pub const SEQUENCE: [BreathPhase; 4] = [
        BreathPhase::Inhale,
        BreathPhase::Hold,
        BreathPhase::Exhale,
        BreathPhase::Ready,
    ];

    /// Prompt spoken on entry.
    pub fn prompt(&self) -> Option<&'static str> {
        match self {
            BreathPhase::Inhale => Some("Breathe in slowly through your nose"),
            BreathPhase::Hold => Some("Hold"),
            BreathPhase::Exhale => Some("Now breathe out slowly through your mouth"),
            BreathPhase::Ready => Some("Get ready to speak"),
            BreathPhase::Complete => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BreathPhase::Inhale => "Breathe in",
            BreathPhase::Hold => "Hold",
            BreathPhase::Exhale => "Breathe out",
            BreathPhase::Ready => "Get ready",
            BreathPhase::Complete => "Go",
        }
    }
}

// ---------------------------------------------------------------------------
// BreathingSchedule
// ---------------------------------------------------------------------------

/// Phase lengths in whole seconds plus the hand-off delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreathingSchedule {
    pub inhale_secs: u64,
    pub hold_secs: u64,
    pub exhale_secs: u64,
    pub ready_secs: u64,
    pub handoff_delay: Duration,
}

impl BreathingSchedule {
    pub fn from_config(config: &BreathingConfig) -> Self {
        Self {
            inhale_secs: config.inhale_secs,
            hold_secs: config.hold_secs,
            exhale_secs: config.exhale_secs,
            ready_secs: config.ready_secs,
            handoff_delay: config.handoff_delay(),
        }
    }

    pub fn secs(&self, phase: BreathPhase) -> u64 {
        match phase {
            BreathPhase::Inhale => self.inhale_secs,
            BreathPhase::Hold => self.hold_secs,
            BreathPhase::Exhale => self.exhale_secs,
            BreathPhase::Ready => self.ready_secs,
            BreathPhase::Complete => 0,
        }
    }

    /// Time from start to hand-off.
    pub fn total(&self) -> Duration {
        let secs: u64 = BreathPhase::SEQUENCE.iter().map(|p| self.secs(*p)).sum();
        Duration::from_secs(secs) + self.handoff_delay
    }
}

impl Default for BreathingSchedule {
    fn default() -> Self {
        Self::from_config(&BreathingConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Events / errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreathingEvent {
    PhaseStarted { phase: BreathPhase, secs: u64 },
    /// Countdown value shown during `phase`; emitted once per second.
    Tick { phase: BreathPhase, remaining: u64 },
    Complete,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SequencerError {
    #[error("breathing sequence cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// BreathingSequencer
// ---------------------------------------------------------------------------

pub struct BreathingSequencer {
    narrator: Arc<NarrationService>,
    schedule: BreathingSchedule,
}

impl BreathingSequencer {
    pub fn new(narrator: Arc<NarrationService>, schedule: BreathingSchedule) -> Self {
        Self { narrator, schedule }
    }

    pub fn schedule(&self) -> &BreathingSchedule {
        &self.schedule
    }

    /// Run every phase, then wait the hand-off delay.
    ///
    /// Returning `Ok` means the caller should start recording now.
    pub async fn run<F>(
        &self,
        level: u32,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<(), SequencerError>
    where
        F: FnMut(BreathingEvent) + Send,
    {
        let sequence = async {
            for phase in BreathPhase::SEQUENCE {
                self.run_phase(phase, level, &mut on_event).await;
            }
            log::debug!("breathing: Complete");
            on_event(BreathingEvent::Complete);
            tokio::time::sleep(self.schedule.handoff_delay).await;
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SequencerError::Cancelled),
            _ = sequence => Ok(()),
        };

        if outcome.is_err() {
            self.narrator.cancel_all();
            log::debug!("breathing: cancelled");
        }
        outcome
    }

    async fn run_phase<F>(&self, phase: BreathPhase, level: u32, on_event: &mut F)
    where
        F: FnMut(BreathingEvent) + Send,
    {
        let secs = self.schedule.secs(phase);
        log::debug!("breathing: {phase:?} ({secs}s)");
        on_event(BreathingEvent::PhaseStarted { phase, secs });

        let phase_len = Duration::from_secs(secs);
        let narrate = async {
            if let Some(prompt) = phase.prompt() {
                // Bounded by the phase; the next prompt supersedes it anyway.
                let _ = tokio::time::timeout(phase_len, self.narrator.speak(prompt, 1, level)).await;
            }
        };
        let countdown = async {
            for remaining in (1..=secs).rev() {
                on_event(BreathingEvent::Tick { phase, remaining });
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        };

        tokio::join!(narrate, countdown);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
