//! Exercise session controller.
//!
//! [`ExerciseSession`] owns one recorder, shares the process-wide narrator
//! and walks the catalog item by item:
//!
//! ```text
//! run_trial()
//!   ├─ Narrating   narration_script(item)          (cancellable)
//!   ├─ Breathing   BreathingSequencer::run          (item.breathing only)
//!   ├─ Recording   Recorder::record(limit, stop)    (manual stop / timeout)
//!   ├─ Processing  prepare_payload → Assessor
//!   └─ Scored      TrialResult → mean after trial cap → Advancing | Retrying | Finished
//! ```
//!
//! Multiple-choice items skip recording: [`present`](ExerciseSession::present)
//! narrates the cue and [`answer`](ExerciseSession::answer) scores the chosen
//! option.
//!
//! Every failure returns the session to `AwaitingStart` without counting a
//! trial.  [`ExerciseSession::run`] drives the session from a
//! [`SessionCommand`] channel, which is how the terminal driver uses it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{
    ApiError, Assessment, AssessmentRequest, Assessor, Checkpoint, ProgressScope, ProgressStore,
    ProgressUpdate,
};
use crate::audio::{prepare_payload, Recorder, RecorderError};
use crate::breathing::{BreathingEvent, BreathingSequencer};
use crate::narration::NarrationService;

use super::catalog::{Catalog, ExerciseItem, ExerciseKind, NextPosition};
use super::policy::{mean, narration_script, ExercisePolicy};
use super::state::{SessionPhase, SessionState, TrialResult};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is busy ({0})")]
    Busy(&'static str),

    #[error("all levels are complete")]
    Finished,

    #[error("no exercise at level {level}, item {item_index}")]
    NoItem { level: u32, item_index: usize },

    #[error("session cancelled")]
    Cancelled,

    #[error("{0}")]
    WrongInput(&'static str),

    #[error("the current item is not waiting for a retry")]
    NotRetrying,

    #[error("option {0} does not exist")]
    UnknownOption(u32),

    #[error(transparent)]
    Recording(#[from] RecorderError),

    #[error("assessment failed: {0}")]
    Assessment(#[from] ApiError),

    #[error("could not load progress: {0}")]
    Progress(ApiError),
}

// ---------------------------------------------------------------------------
// Events / commands
// ---------------------------------------------------------------------------

/// How an item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Moved to `(level, item_index)`.
    Advanced { level: u32, item_index: usize },
    /// Mean below threshold; waiting for a retry.
    Retry,
    /// That was the last item of the last level.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemVerdict {
    pub mean: f64,
    pub passed: bool,
    pub outcome: ItemOutcome,
}

/// Result of one trial; `verdict` is set once the trial cap is reached.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    pub result: TrialResult,
    pub verdict: Option<ItemVerdict>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Phase(SessionPhase),
    ItemReady {
        level: u32,
        item_index: usize,
        item: ExerciseItem,
    },
    Breathing(BreathingEvent),
    RecordingStarted { trial: usize, limit: Duration },
    TrialScored(TrialResult),
    Verdict(ItemVerdict),
    Finished,
    /// A recoverable failure the patient should be told about.
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Start a trial, or narrate a multiple-choice item.  Stops an active
    /// recording.
    Start,
    /// Stop the active recording early.
    Stop,
    /// Replay the narration for the current item.
    Replay,
    /// Answer a multiple-choice item.
    Answer(u32),
    Retry,
    Quit,
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// Everything a session needs besides its catalog.
pub struct SessionComponents {
    pub recorder: Recorder,
    pub narrator: Arc<NarrationService>,
    pub breathing: BreathingSequencer,
    pub assessor: Arc<dyn Assessor>,
    pub progress: Arc<dyn ProgressStore>,
}

// ---------------------------------------------------------------------------
// ExerciseSession
// ---------------------------------------------------------------------------

pub struct ExerciseSession {
    catalog: Catalog,
    policy: ExercisePolicy,
    scope: ProgressScope,
    patient_id: String,
    state: SessionState,
    recorder: Recorder,
    narrator: Arc<NarrationService>,
    breathing: BreathingSequencer,
    assessor: Arc<dyn Assessor>,
    progress: Arc<dyn ProgressStore>,
    events: mpsc::UnboundedSender<SessionEvent>,
    phase_tx: watch::Sender<SessionPhase>,
    cancel: CancellationToken,
}

impl ExerciseSession {
    /// Start at the first item of the first level.
    pub fn new(
        catalog: Catalog,
        policy: ExercisePolicy,
        patient_id: impl Into<String>,
        components: SessionComponents,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        let level = catalog.first_level().ok_or(SessionError::NoItem {
            level: 0,
            item_index: 0,
        })?;
        let (events, events_rx) = mpsc::unbounded_channel();
        let (phase_tx, _) = watch::channel(SessionPhase::AwaitingStart);
        let scope = ProgressScope::from(&catalog.kind);

        log::info!(
            "session: {} with {} items, pass at {:.2} over {} trial(s)",
            catalog.kind.label(),
            catalog.item_count(),
            policy.threshold,
            policy.trial_cap
        );

        let session = Self {
            catalog,
            policy,
            scope,
            patient_id: patient_id.into(),
            state: SessionState::new(level, 0),
            recorder: components.recorder,
            narrator: components.narrator,
            breathing: components.breathing,
            assessor: components.assessor,
            progress: components.progress,
            events,
            phase_tx,
            cancel: CancellationToken::new(),
        };
        Ok((session, events_rx))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn current_item(&self) -> Option<&ExerciseItem> {
        self.catalog.item(self.state.level, self.state.item_index)
    }

    /// Watch the phase, e.g. to gate input.
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    /// Stop narration, breathing and recording at the next await point.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.narrator.cancel_all();
    }

    // -----------------------------------------------------------------------
    // Resume
    // -----------------------------------------------------------------------

    /// Move to the last saved checkpoint, if any.  The item is announced
    /// once [`run`](Self::run) starts.
    pub async fn resume(&mut self) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let checkpoint = self
            .progress
            .load(&self.scope)
            .await
            .map_err(SessionError::Progress)?;

        let Some(checkpoint) = checkpoint else {
            log::info!("session: no saved progress, starting from the beginning");
            return Ok(());
        };

        match self.resolve(checkpoint) {
            Some((level, item_index)) => {
                log::info!("session: resuming at level {level}, item {}", item_index + 1);
                self.state.advance_to(level, item_index);
                self.set_phase(SessionPhase::AwaitingStart);
            }
            None => {
                log::info!("session: saved progress is past the last level");
                self.finish();
            }
        }
        Ok(())
    }

    /// Catalog position for `checkpoint`; `None` when it lies past the end.
    fn resolve(&self, checkpoint: Checkpoint) -> Option<(u32, usize)> {
        let Some(level) = checkpoint.level else {
            return self.catalog.position_at(checkpoint.item_index);
        };
        if self.catalog.item(level, checkpoint.item_index).is_some() {
            return Some((level, checkpoint.item_index));
        }
        // Unknown level, or an index past its end: next level up.
        self.catalog
            .levels()
            .iter()
            .find(|l| l.number > level)
            .map(|l| (l.number, 0))
    }

    // -----------------------------------------------------------------------
    // Trials
    // -----------------------------------------------------------------------

    /// Narrate, breathe if the item asks for it, record, score.
    ///
    /// `stop_rx` ends the recording early.
    pub async fn run_trial(
        &mut self,
        stop_rx: &mut mpsc::UnboundedReceiver<()>,
    ) -> Result<TrialOutcome, SessionError> {
        let item = self.ready_item()?.clone();
        if item.is_multiple_choice() {
            return Err(SessionError::WrongInput(
                "this item is answered by choosing an option",
            ));
        }

        match self.attempt(&item, stop_rx).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.abandon(err)),
        }
    }

    /// Narrate the current item without recording.
    pub async fn present(&mut self) -> Result<(), SessionError> {
        let item = self.ready_item()?.clone();
        let result = self.narrate(&item).await;
        self.set_phase(SessionPhase::AwaitingStart);
        result.map_err(|err| self.abandon(err))
    }

    /// Score a multiple-choice answer: 1.0 for the correct option, else 0.0.
    pub async fn answer(&mut self, option_id: u32) -> Result<TrialOutcome, SessionError> {
        let item = self.ready_item()?.clone();
        if !item.is_multiple_choice() {
            return Err(SessionError::WrongInput("this item is answered by recording"));
        }
        let option = item
            .option(option_id)
            .ok_or(SessionError::UnknownOption(option_id))?;

        let composite = if option.correct { 1.0 } else { 0.0 };
        let assessment = Assessment {
            composite,
            transcription: option.text.clone(),
            ..Assessment::default()
        };
        let mut result = TrialResult::from_assessment(
            self.state.trial() + 1,
            assessment,
            self.policy.passes(composite),
        );
        result.answer = Some(option.text.clone());
        log::info!(
            "session: answered '{}' ({})",
            option.text,
            if option.correct { "correct" } else { "incorrect" }
        );
        Ok(self.record_result(result).await)
    }

    /// Start a failed item over.  Only valid in `Retrying`.
    pub fn retry(&mut self) -> Result<(), SessionError> {
        if self.state.phase != SessionPhase::Retrying {
            return Err(SessionError::NotRetrying);
        }
        self.state.reset_item();
        self.set_phase(SessionPhase::AwaitingStart);
        self.announce_item();
        Ok(())
    }

    async fn attempt(
        &mut self,
        item: &ExerciseItem,
        stop_rx: &mut mpsc::UnboundedReceiver<()>,
    ) -> Result<TrialOutcome, SessionError> {
        let trial = self.state.trial() + 1;
        let level = self.state.level;

        self.narrate(item).await?;

        if item.breathing {
            self.set_phase(SessionPhase::Breathing);
            let events = self.events.clone();
            self.breathing
                .run(level, &self.cancel, move |e| {
                    let _ = events.send(SessionEvent::Breathing(e));
                })
                .await
                .map_err(|_| SessionError::Cancelled)?;
        }

        self.set_phase(SessionPhase::Recording);
        let limit = self.policy.timeout_for(item);
        self.emit(SessionEvent::RecordingStarted { trial, limit });
        while stop_rx.try_recv().is_ok() {}

        let (capture, reason) = self
            .recorder
            .record(limit, stop_rx, &self.cancel)
            .await
            .map_err(|err| match err {
                RecorderError::Cancelled => SessionError::Cancelled,
                other => SessionError::Recording(other),
            })?;
        log::debug!("session: recording ended ({reason:?})");

        self.set_phase(SessionPhase::Processing);
        let payload = prepare_payload(capture).await;
        let request = self.request_for(item, trial);
        let assessment = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
            result = self.assessor.assess(&request, &payload) => result?,
        };

        let passed = self.policy.passes(assessment.composite);
        let result = TrialResult::from_assessment(trial, assessment, passed);
        Ok(self.record_result(result).await)
    }

    async fn narrate(&mut self, item: &ExerciseItem) -> Result<(), SessionError> {
        let script = narration_script(&self.catalog.kind, item);
        if script.is_empty() {
            return Ok(());
        }
        self.set_phase(SessionPhase::Narrating);

        let spoken = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
            spoken = self.narrator.speak_script(&script, self.state.level) => spoken,
        };
        if let Err(err) = spoken {
            if self.cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            log::warn!("session: narration interrupted ({err})");
        }
        Ok(())
    }

    fn request_for(&self, item: &ExerciseItem, trial: usize) -> AssessmentRequest {
        match &self.catalog.kind {
            ExerciseKind::Articulation { sound } => AssessmentRequest::Articulation {
                patient_id: self.patient_id.clone(),
                sound_id: sound.clone(),
                level: self.state.level,
                target: item.target.clone(),
                trial: trial as u32,
            },
            ExerciseKind::Language { .. } => AssessmentRequest::Expressive {
                exercise_id: item.id.clone(),
                exercise_type: item.exercise_type.clone(),
                expected_keywords: item.expected_keywords.clone(),
                min_words: item.min_words,
            },
            ExerciseKind::Fluency => AssessmentRequest::Fluency {
                target_text: item.target.clone(),
                expected_duration: item
                    .expected_duration
                    .unwrap_or(self.policy.record_timeout.as_secs() as u32),
                exercise_type: item.exercise_type.clone(),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Scoring / advancing
    // -----------------------------------------------------------------------

    async fn record_result(&mut self, result: TrialResult) -> TrialOutcome {
        self.set_phase(SessionPhase::Scored);
        log::info!(
            "session: trial {}/{} scored {:.2}{}",
            result.trial,
            self.policy.trial_cap,
            result.composite,
            if result.synthetic { " (synthetic)" } else { "" }
        );
        self.emit(SessionEvent::TrialScored(result.clone()));
        self.state.results.push(result.clone());

        if self.state.trial() < self.policy.trial_cap {
            self.set_phase(SessionPhase::AwaitingStart);
            return TrialOutcome {
                result,
                verdict: None,
            };
        }

        let verdict = self.conclude_item().await;
        TrialOutcome {
            result,
            verdict: Some(verdict),
        }
    }

    async fn conclude_item(&mut self) -> ItemVerdict {
        let mean = mean(&self.state.composites());
        let passed = self.policy.passes(mean);

        if !passed && self.policy.retry_on_fail {
            log::info!(
                "session: mean {mean:.2} below {:.2}, item needs a retry",
                self.policy.threshold
            );
            let verdict = ItemVerdict {
                mean,
                passed,
                outcome: ItemOutcome::Retry,
            };
            self.state.results.clear();
            self.set_phase(SessionPhase::Retrying);
            self.emit(SessionEvent::Verdict(verdict));
            return verdict;
        }

        self.set_phase(SessionPhase::Advancing);
        let (level, item_index) = (self.state.level, self.state.item_index);
        let (next_level, next_item, outcome) = match self.catalog.next_position(level, item_index) {
            NextPosition::SameLevel { item_index } => (
                level,
                item_index,
                ItemOutcome::Advanced { level, item_index },
            ),
            NextPosition::NextLevel { level } => (
                level,
                0,
                ItemOutcome::Advanced {
                    level,
                    item_index: 0,
                },
            ),
            NextPosition::Finished => (
                self.catalog.last_level().unwrap_or(level) + 1,
                0,
                ItemOutcome::Finished,
            ),
        };

        self.save_progress(mean, passed, next_level, next_item).await;

        let verdict = ItemVerdict {
            mean,
            passed,
            outcome,
        };
        self.emit(SessionEvent::Verdict(verdict));

        match outcome {
            ItemOutcome::Advanced { level: next, item_index } => {
                if next != level {
                    log::info!("session: level {level} complete, moving to level {next}");
                }
                self.state.advance_to(next, item_index);
                self.set_phase(SessionPhase::AwaitingStart);
                self.announce_item();
            }
            ItemOutcome::Finished | ItemOutcome::Retry => self.finish(),
        }
        verdict
    }

    async fn save_progress(&mut self, mean: f64, passed: bool, next_level: u32, next_item: usize) {
        let (level, item_index) = (self.state.level, self.state.item_index);
        let flat_index = self.catalog.flat_index(level, item_index).unwrap_or(0);
        let last = self.state.results.last();

        let update = ProgressUpdate {
            level,
            item_index,
            flat_index,
            exercise_id: self
                .current_item()
                .map(|i| i.id.clone())
                .unwrap_or_default(),
            score: mean,
            passed,
            sub_scores: last.map(|r| r.sub_scores.clone()).unwrap_or_default(),
            transcription: last.map(|r| r.transcription.clone()).unwrap_or_default(),
            answer: last.and_then(|r| r.answer.clone()),
            next_level,
            next_item,
            next_flat: flat_index + 1,
        };

        if let Err(err) = self.progress.save(&self.scope, &update).await {
            log::warn!("session: progress not saved: {err}");
            self.emit(SessionEvent::Error(format!("progress not saved: {err}")));
        }
    }

    fn finish(&mut self) {
        self.state.results.clear();
        self.set_phase(SessionPhase::Finished);
        log::info!("session: {} complete", self.catalog.kind.label());
        self.emit(SessionEvent::Finished);
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn ensure_idle(&self) -> Result<(), SessionError> {
        match self.state.phase {
            SessionPhase::Finished => Err(SessionError::Finished),
            phase if phase.is_busy() => Err(SessionError::Busy(phase.label())),
            _ => Ok(()),
        }
    }

    fn ready_item(&self) -> Result<&ExerciseItem, SessionError> {
        self.ensure_idle()?;
        if self.state.phase == SessionPhase::Retrying {
            return Err(SessionError::WrongInput("retry the item first"));
        }
        self.current_item().ok_or(SessionError::NoItem {
            level: self.state.level,
            item_index: self.state.item_index,
        })
    }

    /// Return to `AwaitingStart` after a failed attempt.
    fn abandon(&mut self, err: SessionError) -> SessionError {
        self.recorder.abort();
        self.set_phase(SessionPhase::AwaitingStart);
        match &err {
            SessionError::Cancelled => log::debug!("session: attempt cancelled"),
            other => {
                log::error!("session: {other}");
                self.emit(SessionEvent::Error(other.to_string()));
            }
        }
        err
    }

    fn announce_item(&self) {
        if let Some(item) = self.current_item() {
            self.emit(SessionEvent::ItemReady {
                level: self.state.level,
                item_index: self.state.item_index,
                item: item.clone(),
            });
        }
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.state.phase != phase {
            log::debug!("session: {:?} → {phase:?}", self.state.phase);
        }
        self.state.phase = phase;
        self.phase_tx.send_replace(phase);
        self.emit(SessionEvent::Phase(phase));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------------
    // Command loop
    // -----------------------------------------------------------------------

    /// Spawn [`run`](Self::run) and return a handle for sending commands.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<SessionPhase>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            commands: tx,
            phase: self.subscribe(),
        };
        (handle, tokio::spawn(self.run(rx)))
    }

    /// Process commands until `Quit`, the channel closes or the program is
    /// finished.  Returns the final phase.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) -> SessionPhase {
        let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
        let cancel = self.cancel.clone();
        let phase_rx = self.subscribe();
        let mut input = Input {
            commands: &mut commands,
            stop_tx: &stop_tx,
            phase: &phase_rx,
            cancel: &cancel,
            open: true,
        };

        if self.state.phase != SessionPhase::Finished {
            self.announce_item();
        }

        while self.state.phase != SessionPhase::Finished {
            let Some(command) = input.next().await else {
                break;
            };
            let multiple_choice = self
                .current_item()
                .map(ExerciseItem::is_multiple_choice)
                .unwrap_or(false);

            let result = match command {
                SessionCommand::Start if multiple_choice => input.drive(self.present()).await,
                SessionCommand::Start => input.drive(self.run_trial(&mut stop_rx)).await.map(|_| ()),
                SessionCommand::Replay => input.drive(self.present()).await,
                SessionCommand::Answer(id) => self.answer(id).await.map(|_| ()),
                SessionCommand::Retry => self.retry(),
                SessionCommand::Stop => {
                    log::debug!("session: not recording, stop ignored");
                    Ok(())
                }
                SessionCommand::Quit => break,
            };

            match result {
                Err(SessionError::Cancelled) => break,
                Err(err) => log::debug!("session: {command:?} rejected: {err}"),
                Ok(()) => {}
            }
        }

        self.cancel();
        log::info!("session: ended in {:?}", self.state.phase);
        self.state.phase
    }
}

impl Drop for ExerciseSession {
    fn drop(&mut self) {
        if self.state.phase.is_busy() {
            self.cancel();
        } else {
            self.cancel.cancel();
        }
    }
}

/// Command input while a session step is running.
struct Input<'a> {
    commands: &'a mut mpsc::UnboundedReceiver<SessionCommand>,
    stop_tx: &'a mpsc::UnboundedSender<()>,
    phase: &'a watch::Receiver<SessionPhase>,
    cancel: &'a CancellationToken,
    open: bool,
}

impl Input<'_> {
    async fn next(&mut self) -> Option<SessionCommand> {
        if !self.open {
            return None;
        }
        let command = self.commands.recv().await;
        self.open = command.is_some();
        command
    }

    /// Await `step`, routing stop and quit commands to it meanwhile.
    async fn drive<T, F>(&mut self, step: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, SessionError>>,
    {
        tokio::pin!(step);
        loop {
            tokio::select! {
                outcome = &mut step => return outcome,
                command = self.commands.recv(), if self.open => match command {
                    Some(SessionCommand::Start | SessionCommand::Stop)
                        if *self.phase.borrow() == SessionPhase::Recording =>
                    {
                        let _ = self.stop_tx.send(());
                    }
                    Some(SessionCommand::Quit) => self.cancel.cancel(),
                    None => {
                        self.open = false;
                        self.cancel.cancel();
                    }
                    Some(other) => log::debug!(
                        "session: busy ({}), {other:?} ignored",
                        self.phase.borrow().label()
                    ),
                },
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Sends commands to a spawned session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    phase: watch::Receiver<SessionPhase>,
}

impl SessionHandle {
    /// `false` once the session has ended.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Wait until the phase satisfies `pred`.
    pub async fn wait_for(&mut self, pred: impl FnMut(&SessionPhase) -> bool) -> Option<SessionPhase> {
        self.phase.wait_for(pred).await.ok().map(|p| *p)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MemoryProgressStore, SyntheticScoreAssessor};
    use crate::audio::CaptureDevice;
    use crate::breathing::BreathingSchedule;
    use crate::config::{AppConfig, NarrationConfig};
    use crate::session::catalog::{ChoiceOption, LanguageMode, Level};
    use crate::testing::{voice_chunk, DeniedDevice, ScriptedAssessor, ScriptedDevice, ScriptedSynth};
    use async_trait::async_trait;

    fn item(id: &str) -> ExerciseItem {
        ExerciseItem {
            id: id.into(),
            exercise_type: "word".into(),
            instruction: format!("Say {id}"),
            target: id.into(),
            ..ExerciseItem::default()
        }
    }

    fn level(number: u32, items: Vec<ExerciseItem>) -> Level {
        Level {
            number,
            name: format!("Level {number}"),
            items,
        }
    }

    /// Two levels: [sun, sock] then [sip].
    fn articulation() -> Catalog {
        Catalog::new(
            ExerciseKind::Articulation { sound: "s".into() },
            vec![
                level(1, vec![item("sun"), item("sock")]),
                level(2, vec![item("sip")]),
            ],
        )
    }

    fn receptive() -> Catalog {
        let choice = |id, text: &str, correct| ChoiceOption {
            id,
            text: text.into(),
            correct,
        };
        let vocab = |id: &str, target: &str| ExerciseItem {
            id: id.into(),
            exercise_type: "vocabulary".into(),
            instruction: "Listen and choose".into(),
            target: target.into(),
            options: vec![choice(1, "Apple", true), choice(2, "Banana", false)],
            ..ExerciseItem::default()
        };
        Catalog::new(
            ExerciseKind::Language {
                mode: LanguageMode::Receptive,
            },
            vec![level(1, vec![vocab("vocab-1", "apple"), vocab("vocab-2", "apple")])],
        )
    }

    struct Rig {
        session: ExerciseSession,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        store: Arc<MemoryProgressStore>,
        synth: Arc<ScriptedSynth>,
    }

    fn rig(
        catalog: Catalog,
        device: Arc<dyn CaptureDevice>,
        assessor: Arc<dyn Assessor>,
        store: Arc<MemoryProgressStore>,
    ) -> Rig {
        let synth = Arc::new(ScriptedSynth::instant());
        let narrator = NarrationService::init(&NarrationConfig::default(), synth.clone());
        let policy = ExercisePolicy::for_kind(&catalog.kind, &AppConfig::default());
        let components = SessionComponents {
            recorder: Recorder::new(device),
            breathing: BreathingSequencer::new(narrator.clone(), BreathingSchedule::default()),
            narrator,
            assessor,
            progress: store.clone(),
        };
        let (session, events) =
            ExerciseSession::new(catalog, policy, "patient-7", components).expect("session");
        Rig {
            session,
            events,
            store,
            synth,
        }
    }

    fn scored(composites: &[f64]) -> Rig {
        rig(
            articulation(),
            Arc::new(ScriptedDevice::new(vec![voice_chunk()])),
            Arc::new(ScriptedAssessor::scores(composites)),
            Arc::new(MemoryProgressStore::new()),
        )
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(e) = events.try_recv() {
            out.push(e);
        }
        out
    }

    async fn trial(session: &mut ExerciseSession) -> Result<TrialOutcome, SessionError> {
        let (_stop_tx, mut stop_rx) = mpsc::unbounded_channel();
        session.run_trial(&mut stop_rx).await
    }

    fn scope_s() -> ProgressScope {
        ProgressScope::Articulation { sound: "s".into() }
    }

    // ---- scoring and advancing ---

    #[tokio::test(start_paused = true)]
    async fn inclusive_mean_passes_and_advances() {
        let mut rig = scored(&[0.4, 0.5, 0.6]);

        let first = trial(&mut rig.session).await.expect("trial 1");
        assert!(first.verdict.is_none());
        assert_eq!(rig.session.state().trial(), 1);
        trial(&mut rig.session).await.expect("trial 2");
        let third = trial(&mut rig.session).await.expect("trial 3");

        let verdict = third.verdict.expect("verdict");
        assert!(verdict.passed);
        assert!((verdict.mean - 0.5).abs() < 1e-9);
        assert_eq!(
            verdict.outcome,
            ItemOutcome::Advanced {
                level: 1,
                item_index: 1
            }
        );

        let state = rig.session.state();
        assert_eq!((state.level, state.item_index, state.trial()), (1, 1, 0));
        assert_eq!(state.phase, SessionPhase::AwaitingStart);

        let saved = rig.store.updates(&scope_s());
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].exercise_id, "sun");
        assert!(saved[0].passed);
        assert_eq!((saved[0].next_level, saved[0].next_item), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn low_mean_retries_same_item() {
        let mut rig = scored(&[0.2, 0.3, 0.4]);
        for _ in 0..3 {
            trial(&mut rig.session).await.expect("trial");
        }

        let state = rig.session.state();
        assert_eq!(state.phase, SessionPhase::Retrying);
        assert_eq!((state.level, state.item_index, state.trial()), (1, 0, 0));
        assert!(rig.store.updates(&scope_s()).is_empty());

        assert!(matches!(
            trial(&mut rig.session).await,
            Err(SessionError::WrongInput(_))
        ));
        rig.session.retry().expect("retry");
        assert_eq!(rig.session.phase(), SessionPhase::AwaitingStart);
        assert_eq!(rig.session.current_item().map(|i| i.id.as_str()), Some("sun"));
        assert!(matches!(rig.session.retry(), Err(SessionError::NotRetrying)));
    }

    #[tokio::test(start_paused = true)]
    async fn level_end_moves_up_then_program_finishes() {
        let mut rig = scored(&[0.9]);
        rig.session.state.advance_to(1, 1);

        for _ in 0..3 {
            trial(&mut rig.session).await.expect("trial");
        }
        assert_eq!((rig.session.state().level, rig.session.state().item_index), (2, 0));

        let mut last = None;
        for _ in 0..3 {
            last = Some(trial(&mut rig.session).await.expect("trial"));
        }
        assert_eq!(
            last.and_then(|o| o.verdict).map(|v| v.outcome),
            Some(ItemOutcome::Finished)
        );
        assert_eq!(rig.session.phase(), SessionPhase::Finished);
        assert!(matches!(
            trial(&mut rig.session).await,
            Err(SessionError::Finished)
        ));

        let saved = rig.store.updates(&scope_s());
        assert_eq!(saved.last().map(|u| u.next_level), Some(3));
        assert!(drain(&mut rig.events).contains(&SessionEvent::Finished));
    }

    #[tokio::test(start_paused = true)]
    async fn trial_requests_carry_sound_and_trial_number() {
        let assessor = Arc::new(ScriptedAssessor::scores(&[0.7]));
        let mut rig = rig(
            articulation(),
            Arc::new(ScriptedDevice::new(vec![voice_chunk()])),
            assessor.clone(),
            Arc::new(MemoryProgressStore::new()),
        );
        trial(&mut rig.session).await.expect("trial 1");
        trial(&mut rig.session).await.expect("trial 2");

        let trials: Vec<u32> = assessor
            .requests()
            .iter()
            .map(|r| match r {
                AssessmentRequest::Articulation {
                    sound_id,
                    target,
                    patient_id,
                    trial,
                    ..
                } => {
                    assert_eq!((sound_id.as_str(), target.as_str()), ("s", "sun"));
                    assert_eq!(patient_id, "patient-7");
                    *trial
                }
                other => panic!("unexpected request {other:?}"),
            })
            .collect();
        assert_eq!(trials, vec![1, 2]);
        // Target modelled before each trial.
        assert_eq!(rig.synth.spoken(), vec!["sun", "sun"]);
    }

    // ---- failures ---

    #[tokio::test(start_paused = true)]
    async fn silent_capture_is_not_a_trial() {
        let assessor = Arc::new(ScriptedAssessor::scores(&[1.0]));
        let mut rig = rig(
            articulation(),
            Arc::new(ScriptedDevice::new(vec![])),
            assessor.clone(),
            Arc::new(MemoryProgressStore::new()),
        );

        let err = trial(&mut rig.session).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Recording(RecorderError::NoAudioCaptured)
        ));
        assert_eq!(rig.session.phase(), SessionPhase::AwaitingStart);
        assert_eq!(rig.session.state().trial(), 0);
        assert!(assessor.requests().is_empty());
        assert!(drain(&mut rig.events)
            .iter()
            .any(|e| matches!(e, SessionEvent::Error(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_microphone_is_surfaced() {
        let mut rig = rig(
            articulation(),
            Arc::new(DeniedDevice),
            Arc::new(ScriptedAssessor::scores(&[1.0])),
            Arc::new(MemoryProgressStore::new()),
        );
        let err = trial(&mut rig.session).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Recording(RecorderError::PermissionDenied(_))
        ));
        assert_eq!(rig.session.phase(), SessionPhase::AwaitingStart);
    }

    #[tokio::test(start_paused = true)]
    async fn request_failure_is_not_counted() {
        let mut rig = rig(
            articulation(),
            Arc::new(ScriptedDevice::new(vec![voice_chunk()])),
            Arc::new(ScriptedAssessor::new(vec![Err(ApiError::Timeout)])),
            Arc::new(MemoryProgressStore::new()),
        );
        let err = trial(&mut rig.session).await.unwrap_err();
        assert!(matches!(err, SessionError::Assessment(ApiError::Timeout)));
        assert_eq!(rig.session.state().trial(), 0);
        assert_eq!(rig.session.phase(), SessionPhase::AwaitingStart);
    }

    #[tokio::test(start_paused = true)]
    async fn synthetic_fallback_scores_unreachable_backend() {
        let inner = ScriptedAssessor::new(vec![Err(ApiError::Request("refused".into()))]);
        let mut rig = rig(
            articulation(),
            Arc::new(ScriptedDevice::new(vec![voice_chunk()])),
            Arc::new(SyntheticScoreAssessor::new(inner)),
            Arc::new(MemoryProgressStore::new()),
        );
        let outcome = trial(&mut rig.session).await.expect("trial");
        assert!(outcome.result.synthetic);
        assert!(outcome.result.passed);
        assert_eq!(rig.session.state().trial(), 1);
    }

    // ---- resume ---

    #[tokio::test(start_paused = true)]
    async fn resume_restores_checkpoint() {
        let store = Arc::new(MemoryProgressStore::with_checkpoint(scope_s(), 1, 1));
        let mut rig = rig(
            articulation(),
            Arc::new(ScriptedDevice::new(vec![voice_chunk()])),
            Arc::new(ScriptedAssessor::scores(&[1.0])),
            store,
        );
        rig.session.resume().await.expect("resume");
        assert_eq!((rig.session.state().level, rig.session.state().item_index), (1, 1));
        assert_eq!(rig.session.current_item().map(|i| i.id.as_str()), Some("sock"));
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoint_past_last_level_is_finished() {
        let store = Arc::new(MemoryProgressStore::with_checkpoint(scope_s(), 3, 0));
        let mut rig = rig(
            articulation(),
            Arc::new(ScriptedDevice::new(vec![voice_chunk()])),
            Arc::new(ScriptedAssessor::scores(&[1.0])),
            store,
        );
        rig.session.resume().await.expect("resume");
        assert_eq!(rig.session.phase(), SessionPhase::Finished);
    }

    /// Store holding a single running-index checkpoint.
    struct RunningIndex(usize);

    #[async_trait]
    impl ProgressStore for RunningIndex {
        async fn load(&self, _scope: &ProgressScope) -> Result<Option<Checkpoint>, ApiError> {
            Ok(Some(Checkpoint {
                level: None,
                item_index: self.0,
            }))
        }

        async fn save(&self, _scope: &ProgressScope, _u: &ProgressUpdate) -> Result<(), ApiError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn running_index_maps_across_levels() {
        let mut rig = scored(&[1.0]);
        rig.session.progress = Arc::new(RunningIndex(2)) as Arc<dyn ProgressStore>;
        rig.session.resume().await.expect("resume");
        assert_eq!((rig.session.state().level, rig.session.state().item_index), (2, 0));

        let mut rig = scored(&[1.0]);
        rig.session.progress = Arc::new(RunningIndex(3)) as Arc<dyn ProgressStore>;
        rig.session.resume().await.expect("resume");
        assert_eq!(rig.session.phase(), SessionPhase::Finished);
    }

    // ---- multiple choice ---

    #[tokio::test(start_paused = true)]
    async fn receptive_answers_score_and_move_on() {
        let store = Arc::new(MemoryProgressStore::new());
        let mut rig = rig(
            receptive(),
            Arc::new(ScriptedDevice::new(vec![])),
            Arc::new(ScriptedAssessor::scores(&[])),
            store.clone(),
        );

        rig.session.present().await.expect("present");
        assert_eq!(
            rig.synth.spoken(),
            vec!["Listen and choose", "Find the apple", "Find the apple"]
        );
        assert!(matches!(
            trial(&mut rig.session).await,
            Err(SessionError::WrongInput(_))
        ));
        assert!(matches!(
            rig.session.answer(9).await,
            Err(SessionError::UnknownOption(9))
        ));

        let wrong = rig.session.answer(2).await.expect("answer");
        assert_eq!(wrong.result.composite, 0.0);
        let verdict = wrong.verdict.expect("verdict");
        assert!(!verdict.passed);
        assert_eq!(
            verdict.outcome,
            ItemOutcome::Advanced {
                level: 1,
                item_index: 1
            }
        );

        let right = rig.session.answer(1).await.expect("answer");
        assert_eq!(right.result.composite, 1.0);
        assert_eq!(rig.session.phase(), SessionPhase::Finished);

        let saved = store.updates(&ProgressScope::Language {
            mode: LanguageMode::Receptive,
        });
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].answer.as_deref(), Some("Banana"));
        assert_eq!((saved[0].flat_index, saved[0].next_flat), (0, 1));
    }

    // ---- breathing ---

    #[tokio::test(start_paused = true)]
    async fn fluency_breathes_before_recording() {
        let catalog = Catalog::new(
            ExerciseKind::Fluency,
            vec![level(
                1,
                vec![ExerciseItem {
                    breathing: true,
                    expected_duration: Some(5),
                    ..item("Mmm")
                }],
            )],
        );
        let mut rig = rig(
            catalog,
            Arc::new(ScriptedDevice::new(vec![voice_chunk()])),
            Arc::new(ScriptedAssessor::scores(&[0.8])),
            Arc::new(MemoryProgressStore::new()),
        );

        let started = tokio::time::Instant::now();
        trial(&mut rig.session).await.expect("trial");
        // 10.5 s breathing + 5 s recording limit.
        assert!(started.elapsed() >= Duration::from_millis(15_500));

        let events = drain(&mut rig.events);
        let breath_done = events
            .iter()
            .position(|e| *e == SessionEvent::Breathing(BreathingEvent::Complete))
            .expect("breathing completed");
        let recording = events
            .iter()
            .position(|e| matches!(e, SessionEvent::RecordingStarted { .. }))
            .expect("recording started");
        assert!(breath_done < recording);
        assert!(events.contains(&SessionEvent::RecordingStarted {
            trial: 1,
            limit: Duration::from_secs(5)
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fluency_item_still_moves_on() {
        let catalog = Catalog::new(
            ExerciseKind::Fluency,
            vec![level(1, vec![item("Mmm"), item("Moo")])],
        );
        let mut rig = rig(
            catalog,
            Arc::new(ScriptedDevice::new(vec![voice_chunk()])),
            Arc::new(ScriptedAssessor::scores(&[0.5])),
            Arc::new(MemoryProgressStore::new()),
        );

        let outcome = trial(&mut rig.session).await.expect("trial");
        let verdict = outcome.verdict.expect("single-trial verdict");
        assert!(!verdict.passed);
        assert_eq!(
            verdict.outcome,
            ItemOutcome::Advanced {
                level: 1,
                item_index: 1
            }
        );
        assert_eq!(rig.session.phase(), SessionPhase::AwaitingStart);
        assert_eq!(rig.session.current_item().map(|i| i.id.as_str()), Some("Moo"));

        let saved = rig.store.updates(&ProgressScope::Fluency);
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].exercise_id, "Mmm");
        assert!(!saved[0].passed);
        assert_eq!((saved[0].next_level, saved[0].next_item), (1, 1));
    }

    // ---- command loop ---

    async fn next_matching(
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        loop {
            let event = events.recv().await.expect("event");
            if pred(&event) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_command_ends_recording_early() {
        let Rig {
            session,
            mut events,
            ..
        } = scored(&[0.9]);
        let (handle, join) = session.spawn();

        assert!(handle.send(SessionCommand::Start));
        next_matching(&mut events, |e| {
            matches!(e, SessionEvent::RecordingStarted { .. })
        })
        .await;
        let started = tokio::time::Instant::now();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.send(SessionCommand::Stop));

        next_matching(&mut events, |e| matches!(e, SessionEvent::TrialScored(_))).await;
        assert!(started.elapsed() < Duration::from_secs(10));

        handle.send(SessionCommand::Quit);
        assert_eq!(join.await.expect("join"), SessionPhase::AwaitingStart);
    }

    #[tokio::test(start_paused = true)]
    async fn quit_mid_recording_releases_microphone() {
        let device = Arc::new(ScriptedDevice::new(vec![voice_chunk()]));
        let Rig {
            session,
            mut events,
            ..
        } = rig(
            articulation(),
            device.clone(),
            Arc::new(ScriptedAssessor::scores(&[0.9])),
            Arc::new(MemoryProgressStore::new()),
        );
        let (mut handle, join) = session.spawn();

        handle.send(SessionCommand::Start);
        handle
            .wait_for(|p| *p == SessionPhase::Recording)
            .await
            .expect("recording");
        assert!(device.is_open());

        handle.send(SessionCommand::Quit);
        join.await.expect("join");
        assert!(!device.is_open());
        assert!(!drain(&mut events)
            .iter()
            .any(|e| matches!(e, SessionEvent::TrialScored(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_session_ignores_answers() {
        let Rig {
            session,
            mut events,
            ..
        } = scored(&[0.9]);
        let (handle, join) = session.spawn();

        handle.send(SessionCommand::Start);
        next_matching(&mut events, |e| {
            matches!(e, SessionEvent::RecordingStarted { .. })
        })
        .await;
        handle.send(SessionCommand::Retry);
        handle.send(SessionCommand::Answer(1));
        handle.send(SessionCommand::Stop);

        let scored = next_matching(&mut events, |e| matches!(e, SessionEvent::TrialScored(_))).await;
        assert!(matches!(scored, SessionEvent::TrialScored(r) if r.trial == 1));

        drop(handle);
        join.await.expect("join");
    }
}
