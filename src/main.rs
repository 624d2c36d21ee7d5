//! Terminal driver for guided therapy sessions.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] and the persisted [`LoginSession`].
//! 3. Create the tokio runtime.
//! 4. Fetch the exercise catalog for the chosen exercise.
//! 5. Build recorder, narration, breathing, scoring and progress components.
//! 6. Resume from the saved checkpoint and spawn the session.
//! 7. Start the global key listener; stdin lines work as a fallback.
//! 8. Print session events until the program finishes or the patient quits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use therapy_coach::{
    api::{ApiClient, Assessor, MemoryProgressStore, ProgressStore, SyntheticScoreAssessor},
    audio::{CpalDevice, Recorder},
    breathing::{BreathingEvent, BreathingSchedule, BreathingSequencer},
    config::{AppConfig, AppPaths, LoginSession},
    hotkey::{ControlEvent, KeyListener, KeyMap},
    narration::{build_synthesizer, NarrationService},
    session::{
        ExerciseKind, ExercisePolicy, ExerciseSession, ItemOutcome, ItemVerdict, LanguageMode,
        SessionCommand, SessionComponents, SessionEvent, SessionHandle, SessionPhase,
    },
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "therapy-coach", version, about = "Guided speech-therapy exercises")]
struct Cli {
    /// Settings file to use instead of the platform `settings.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Login file to use instead of the platform `session.json`.
    #[arg(long, global = true)]
    login: Option<PathBuf>,

    /// Override `api.base_url`.
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Practise one speech sound, from isolation up to sentences.
    Articulation {
        /// One of s, r, l, k, th.
        sound: String,
    },
    /// Receptive (listen and choose) or expressive (speak) language work.
    Language { mode: LanguageMode },
    /// Breathing-paced fluency practice.
    Fluency,
    /// List audio input devices.
    Devices,
    /// Write the effective settings to `settings.toml` for editing.
    InitConfig {
        /// Replace an existing settings file.
        #[arg(long)]
        force: bool,
    },
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    // 2. Configuration
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        }),
    };
    if let Some(url) = cli.api_url {
        config.api.base_url = url;
    }

    let kind = match cli.command {
        Command::Devices => {
            let names = CpalDevice::input_device_names().context("listing input devices")?;
            for name in names {
                println!("{name}");
            }
            return Ok(());
        }
        Command::InitConfig { force } => {
            let path = init_config(&config, cli.config.as_deref(), force)?;
            println!("Settings written to {}", path.display());
            return Ok(());
        }
        Command::Articulation { sound } => ExerciseKind::Articulation { sound },
        Command::Language { mode } => ExerciseKind::Language { mode },
        Command::Fluency => ExerciseKind::Fluency,
    };

    let login = match &cli.login {
        Some(path) => LoginSession::load_from(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => LoginSession::load().unwrap_or_default(),
    };

    // 3. Runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("creating tokio runtime")?;

    rt.block_on(run(kind, config, login))
}

/// Persist `config` to `path`, or to the platform `settings.toml` when no
/// path was given.  An existing file is kept unless `force` is set.
fn init_config(config: &AppConfig, path: Option<&Path>, force: bool) -> Result<PathBuf> {
    if let Some(path) = path {
        if path.exists() && !force {
            bail!("{} already exists (pass --force to replace it)", path.display());
        }
        config
            .save_to(path)
            .with_context(|| format!("writing {}", path.display()))?;
        return Ok(path.to_path_buf());
    }
    if AppPaths::new().settings_file.exists() && !force {
        bail!("settings.toml already exists (pass --force to replace it)");
    }
    config.save().context("writing settings.toml")
}

async fn run(kind: ExerciseKind, config: AppConfig, login: LoginSession) -> Result<()> {
    log::info!("therapy-coach: starting {} session", kind.label());
    let client = ApiClient::from_config(&config.api, &login);
    if !client.is_authenticated() {
        log::warn!("therapy-coach: not signed in, scoring requests will likely be refused");
    }

    // 4. Catalog
    let catalog = client
        .fetch_catalog(&kind)
        .await
        .with_context(|| format!("loading {} exercises", kind.label()))?;

    // 5. Components
    let narrator = NarrationService::init(&config.narration, build_synthesizer(&config.narration));
    let assessor: Arc<dyn Assessor> = if config.scoring.synthetic_fallback {
        log::warn!("therapy-coach: synthetic scores enabled for unreachable backend");
        Arc::new(SyntheticScoreAssessor::new(client.clone()))
    } else {
        Arc::new(client.clone())
    };
    let progress: Arc<dyn ProgressStore> = if client.user_id().is_some() {
        Arc::new(client.clone())
    } else {
        log::warn!("therapy-coach: no user id, progress is kept for this run only");
        Arc::new(MemoryProgressStore::new())
    };
    let components = SessionComponents {
        recorder: Recorder::new(Arc::new(CpalDevice::new(config.recording.device.clone()))),
        narrator: Arc::clone(&narrator),
        breathing: BreathingSequencer::new(
            Arc::clone(&narrator),
            BreathingSchedule::from_config(&config.breathing),
        ),
        assessor,
        progress,
    };

    // 6. Session
    let policy = ExercisePolicy::for_kind(&kind, &config);
    let patient_id = client.user_id().unwrap_or("guest").to_string();
    let (mut session, mut events) = ExerciseSession::new(catalog, policy, patient_id, components)?;
    if let Err(e) = session.resume().await {
        log::warn!("therapy-coach: could not load saved progress ({e}); starting from the beginning");
    }
    let (handle, done) = session.spawn();

    // 7. Controls
    let (control_tx, mut controls) = mpsc::unbounded_channel();
    let _listener = match KeyMap::from_config(&config.hotkey) {
        Ok(keys) => KeyListener::start(keys, control_tx.clone())
            .map_err(|e| log::warn!("therapy-coach: key listener unavailable ({e})"))
            .ok(),
        Err(e) => {
            log::warn!("therapy-coach: {e}; use stdin controls");
            None
        }
    };
    tokio::spawn(read_stdin(control_tx));
    println!(
        "Controls: {} / Enter = start or stop, {} / r = retry or replay, {} / q = quit, 1-9 = answer",
        config.hotkey.primary_key, config.hotkey.retry_key, config.hotkey.quit_key
    );

    // 8. Event loop
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            Some(control) = controls.recv() => {
                if !forward(&handle, control) {
                    break;
                }
            }
        }
    }

    let phase = done.await.context("session task panicked")?;
    narrator.shutdown();
    log::info!("therapy-coach: session ended ({})", phase.label());
    Ok(())
}

// ---------------------------------------------------------------------------
// Controls
// ---------------------------------------------------------------------------

/// Translate a key press into a session command.  `false` once the session
/// is gone.
fn forward(handle: &SessionHandle, control: ControlEvent) -> bool {
    let command = match control {
        ControlEvent::Primary => SessionCommand::Start,
        ControlEvent::Retry if handle.phase() == SessionPhase::Retrying => SessionCommand::Retry,
        ControlEvent::Retry => SessionCommand::Replay,
        ControlEvent::Quit => SessionCommand::Quit,
        ControlEvent::Answer(id) => SessionCommand::Answer(id),
    };
    handle.send(command)
}

async fn read_stdin(tx: mpsc::UnboundedSender<ControlEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let control = match line.trim() {
            "" => ControlEvent::Primary,
            "r" | "R" => ControlEvent::Retry,
            "q" | "Q" => ControlEvent::Quit,
            digit => match digit.parse::<u32>() {
                Ok(id) => ControlEvent::Answer(id),
                Err(_) => continue,
            },
        };
        if tx.send(control).is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Phase(phase) => log::debug!("phase: {}", phase.label()),
        SessionEvent::ItemReady {
            level,
            item_index,
            item,
        } => {
            println!();
            println!("Level {level}, item {}: {}", item_index + 1, item.instruction);
            if !item.target.is_empty() {
                println!("  Target: {}", item.target);
            }
            for option in &item.options {
                println!("  [{}] {}", option.id, option.text);
            }
        }
        SessionEvent::Breathing(BreathingEvent::PhaseStarted { phase, secs }) => {
            println!("  {} ({secs}s)", phase.label());
        }
        SessionEvent::Breathing(BreathingEvent::Tick { remaining, .. }) => {
            log::debug!("breathing: {remaining}");
        }
        SessionEvent::Breathing(BreathingEvent::Complete) => println!("  Now speak."),
        SessionEvent::RecordingStarted { trial, limit } => {
            println!("  Recording trial {trial} (up to {}s)...", limit.as_secs());
        }
        SessionEvent::TrialScored(result) => {
            let note = if result.synthetic { " (offline)" } else { "" };
            println!("  Score {:.0}%{note}", result.composite * 100.0);
            if !result.transcription.is_empty() {
                println!("  Heard: {}", result.transcription);
            }
            if let Some(feedback) = &result.feedback {
                println!("  {feedback}");
            }
        }
        SessionEvent::Verdict(verdict) => {
            let summary = verdict_summary(verdict);
            println!("  Average {:.0}%: {summary}", verdict.mean * 100.0);
        }
        SessionEvent::Finished => println!("\nAll levels complete. Well done!"),
        SessionEvent::Error(message) => println!("  ! {message}"),
    }
}

fn verdict_summary(verdict: &ItemVerdict) -> String {
    let result = if verdict.passed { "passed" } else { "below target" };
    match verdict.outcome {
        ItemOutcome::Advanced { level, .. } => format!("{result}, on to level {level}"),
        ItemOutcome::Retry => format!("{result}, press retry to try again"),
        ItemOutcome::Finished => result.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
