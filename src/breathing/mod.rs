//! Guided breathing before fluency recordings.

pub mod sequencer;

pub use sequencer::{
    BreathPhase, BreathingEvent, BreathingSchedule, BreathingSequencer, SequencerError,
};
