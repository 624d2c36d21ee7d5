//! Process-wide narration service.
//!
//! At most one narration is active at a time.  Starting a new one cancels
//! the previous one (last caller wins); the superseded call resolves with
//! [`NarrationError::Cancelled`].
//!
//! ```text
//! speak_script([instruction, cue ×2])
//!   ├─ utterance 1 ─ pause_after
//!   └─ utterance 2 ─ repeat_pause ─ utterance 2
//! ```
//!
//! Synthesizer failures and hung utterances never stall the caller: each
//! utterance is bounded by `utterance_timeout` and its error is logged, and
//! the script carries on.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::NarrationConfig;

use super::synth::{NarrationError, SpeechSynthesizer};
use super::voice::VoiceTable;

// ---------------------------------------------------------------------------
// Utterance
// ---------------------------------------------------------------------------

/// One step of a narration script.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    /// Times the text is spoken, separated by the service's repeat pause.
    pub repeat: u32,
    /// Silence after the last repeat, before the next utterance.
    pub pause_after: Duration,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            repeat: 1,
            pause_after: Duration::ZERO,
        }
    }

    pub fn repeat(mut self, times: u32) -> Self {
        self.repeat = times;
        self
    }

    pub fn pause_after(mut self, pause: Duration) -> Self {
        self.pause_after = pause;
        self
    }
}

// ---------------------------------------------------------------------------
// NarrationService
// ---------------------------------------------------------------------------

struct ActiveNarration {
    generation: u64,
    token: CancellationToken,
}

/// Shared speech-synthesis front end.  Create once with [`init`](Self::init)
/// and hand the `Arc` to every session.
pub struct NarrationService {
    synth: Arc<dyn SpeechSynthesizer>,
    voices: VoiceTable,
    repeat_pause: Duration,
    utterance_timeout: Duration,
    root: CancellationToken,
    active: Mutex<Option<ActiveNarration>>,
    next_generation: Mutex<u64>,
    speaking: watch::Sender<bool>,
}

impl NarrationService {
    pub fn init(config: &NarrationConfig, synth: Arc<dyn SpeechSynthesizer>) -> Arc<Self> {
        let (speaking, _) = watch::channel(false);
        log::info!(
            "narration: initialised (repeat pause {} ms, utterance timeout {} s)",
            config.repeat_pause_ms,
            config.utterance_timeout_secs
        );
        Arc::new(Self {
            synth,
            voices: VoiceTable::from_config(config),
            repeat_pause: config.repeat_pause(),
            utterance_timeout: config.utterance_timeout(),
            root: CancellationToken::new(),
            active: Mutex::new(None),
            next_generation: Mutex::new(0),
            speaking,
        })
    }

    /// `true` while a narration is in progress.
    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    /// Watch the speaking flag, e.g. to gate input controls.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.speaking.subscribe()
    }

    /// Speak `text` `repeat` times with the voice for `level`.
    pub async fn speak(&self, text: &str, repeat: u32, level: u32) -> Result<(), NarrationError> {
        self.speak_script(&[Utterance::new(text).repeat(repeat)], level)
            .await
    }

    /// Speak a sequence of utterances as one narration.
    ///
    /// Resolves `Ok` once the script has been played, even if individual
    /// utterances failed; resolves [`NarrationError::Cancelled`] when
    /// superseded, cancelled or after [`shutdown`](Self::shutdown).
    pub async fn speak_script(
        &self,
        script: &[Utterance],
        level: u32,
    ) -> Result<(), NarrationError> {
        let (generation, token) = self.begin();
        // Clears the slot even when the caller drops this future.
        let _guard = FinishGuard {
            service: self,
            generation,
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(NarrationError::Cancelled),
            _ = self.play(script, level) => Ok(()),
        };

        if result.is_err() {
            log::debug!("narration: #{generation} cancelled");
        }
        result
    }

    /// Stop the current narration and any pending repeat immediately.
    pub fn cancel_all(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.take() {
            current.token.cancel();
            log::debug!("narration: cancel_all (#{})", current.generation);
        }
        self.speaking.send_replace(false);
    }

    /// Cancel everything and refuse further narration.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.cancel_all();
        log::info!("narration: shut down");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn begin(&self) -> (u64, CancellationToken) {
        let generation = {
            let mut next = self
                .next_generation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        let token = self.root.child_token();

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = active.replace(ActiveNarration {
            generation,
            token: token.clone(),
        }) {
            log::debug!("narration: #{} superseded by #{generation}", previous.generation);
            previous.token.cancel();
        }
        self.speaking.send_replace(true);
        (generation, token)
    }

    fn finish(&self, generation: u64) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().map(|a| a.generation) == Some(generation) {
            *active = None;
            self.speaking.send_replace(false);
        }
    }

    async fn play(&self, script: &[Utterance], level: u32) {
        let voice = self.voices.for_level(level);

        for utterance in script {
            let times = utterance.repeat.max(1);
            for i in 0..times {
                if i > 0 {
                    tokio::time::sleep(self.repeat_pause).await;
                }
                match tokio::time::timeout(
                    self.utterance_timeout,
                    self.synth.speak(&utterance.text, &voice),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => log::warn!("narration: '{}': {err}", utterance.text),
                    Err(_) => log::warn!(
                        "narration: '{}' did not finish within {:?}",
                        utterance.text,
                        self.utterance_timeout
                    ),
                }
            }
            if !utterance.pause_after.is_zero() {
                tokio::time::sleep(utterance.pause_after).await;
            }
        }
    }
}

struct FinishGuard<'a> {
    service: &'a NarrationService,
    generation: u64,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.service.finish(self.generation);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
