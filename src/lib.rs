//! Therapy coach: guided articulation, language and fluency exercises.
//!
//! A session narrates each exercise item, optionally runs a paced breathing
//! sequence, records the patient, normalises the recording to 16 kHz mono
//! WAV and submits it to the clinic backend for scoring.  Item results
//! decide whether the patient repeats, moves on, or levels up, and progress
//! is checkpointed after every completed item.

pub mod api;
pub mod audio;
pub mod breathing;
pub mod config;
pub mod hotkey;
pub mod narration;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;
