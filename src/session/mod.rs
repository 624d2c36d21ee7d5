//! Guided exercise sessions.
//!
//! * [`Catalog`]: levels of [`ExerciseItem`]s for one [`ExerciseKind`].
//! * [`ExercisePolicy`]: threshold, trial cap and recording limit per kind.
//! * [`ExerciseSession`]: narration → breathing → recording → scoring →
//!   advancing, with progress checkpoints after every completed item.
//!
//! # Quick start
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use therapy_coach::session::*;
//! # async fn example(catalog: Catalog, policy: ExercisePolicy, components: SessionComponents) -> anyhow::Result<()> {
//! let (mut session, mut events) = ExerciseSession::new(catalog, policy, "patient-7", components)?;
//! session.resume().await?;
//! let (handle, done) = session.spawn();
//! handle.send(SessionCommand::Start);
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! done.await?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod controller;
pub mod policy;
pub mod state;

pub use catalog::{Catalog, ChoiceOption, ExerciseItem, ExerciseKind, LanguageMode, Level, NextPosition};
pub use controller::{
    ExerciseSession, ItemOutcome, ItemVerdict, SessionCommand, SessionComponents, SessionError,
    SessionEvent, SessionHandle, TrialOutcome,
};
pub use policy::{mean, narration_script, ExercisePolicy};
pub use state::{Activity, SessionPhase, SessionState, TrialResult};
