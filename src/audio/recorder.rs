//! Recording lifecycle.
//!
//! ```text
//! Idle ──start()──▶ Requesting ──device opened──▶ Recording ──stop()──▶ Finalizing ──▶ Idle
//!                      └──access denied──▶ Idle
//! ```
//!
//! [`Recorder::record`] wraps the whole cycle for the session controller:
//! it starts the device, accumulates chunks until a manual stop, the
//! timeout or cancellation, and returns one finalised [`AudioCapture`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::capture::{AudioChunk, CaptureDevice, CaptureError, CaptureHandle};
use super::wav::{write_pcm16, WavSpec};

// ---------------------------------------------------------------------------
// RecorderError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RecorderError {
    /// No microphone, or the OS refused access.  The user retries manually.
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    /// The capture finished without a single sample.
    #[error("no audio was captured, please try again")]
    NoAudioCaptured,

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("no recording in progress")]
    NotRecording,

    #[error("recording cancelled")]
    Cancelled,

    /// The captured samples could not be framed as WAV.
    #[error("could not store the recording: {0}")]
    Encode(String),

    #[error(transparent)]
    Device(CaptureError),
}

impl From<CaptureError> for RecorderError {
    fn from(err: CaptureError) -> Self {
        if err.is_access_denied() {
            RecorderError::PermissionDenied(err.to_string())
        } else {
            RecorderError::Device(err)
        }
    }
}

// ---------------------------------------------------------------------------
// RecorderState / AudioCapture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Idle,
    Requesting,
    Recording,
    Finalizing,
}

/// Why a recording ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Manual,
    Timeout,
}

/// One finalised recording.  Never empty.
#[derive(Debug, Clone)]
pub struct AudioCapture {
    bytes: Vec<u8>,
    mime: String,
    duration: Duration,
}

impl AudioCapture {
    /// Wrap already-encoded bytes.
    ///
    /// # Errors
    ///
    /// [`RecorderError::NoAudioCaptured`] when `bytes` is empty.
    pub fn new(
        bytes: Vec<u8>,
        mime: impl Into<String>,
        duration: Duration,
    ) -> Result<Self, RecorderError> {
        if bytes.is_empty() {
            return Err(RecorderError::NoAudioCaptured);
        }
        Ok(Self {
            bytes,
            mime: mime.into(),
            duration,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Serialise captured chunks at their native rate and channel count.
fn finalize(chunks: Vec<AudioChunk>) -> Result<AudioCapture, RecorderError> {
    let Some(first) = chunks.first() else {
        return Err(RecorderError::NoAudioCaptured);
    };
    let spec = WavSpec {
        channels: first.channels.max(1),
        sample_rate: first.sample_rate,
    };

    let samples: Vec<f32> = chunks.into_iter().flat_map(|c| c.samples).collect();
    if samples.is_empty() || spec.sample_rate == 0 {
        return Err(RecorderError::NoAudioCaptured);
    }

    let frames = samples.len() / spec.channels as usize;
    let duration = Duration::from_secs_f64(frames as f64 / spec.sample_rate as f64);
    let wav = write_pcm16(&samples, spec).map_err(|e| RecorderError::Encode(e.to_string()))?;
    AudioCapture::new(wav, "audio/wav", duration)
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

struct ActiveCapture {
    // Dropped before `rx` is drained so no chunk arrives after finalising.
    handle: CaptureHandle,
    rx: mpsc::UnboundedReceiver<AudioChunk>,
    chunks: Vec<AudioChunk>,
}

/// Owns one capture device for the lifetime of a session.
pub struct Recorder {
    device: Arc<dyn CaptureDevice>,
    state: RecorderState,
    active: Option<ActiveCapture>,
}

impl Recorder {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            state: RecorderState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Open the microphone and begin accumulating chunks.
    pub fn start(&mut self) -> Result<(), RecorderError> {
        if self.state != RecorderState::Idle {
            return Err(RecorderError::AlreadyRecording);
        }

        self.state = RecorderState::Requesting;
        log::debug!("recorder: Idle → Requesting");

        let (tx, rx) = mpsc::unbounded_channel();
        match self.device.open(tx) {
            Ok(handle) => {
                self.active = Some(ActiveCapture {
                    handle,
                    rx,
                    chunks: Vec::new(),
                });
                self.state = RecorderState::Recording;
                log::debug!("recorder: Requesting → Recording");
                Ok(())
            }
            Err(err) => {
                self.state = RecorderState::Idle;
                let err = RecorderError::from(err);
                log::error!("recorder: {err}");
                Err(err)
            }
        }
    }

    /// Stop the device and finalise everything captured so far.
    pub fn stop(&mut self) -> Result<AudioCapture, RecorderError> {
        let Some(active) = self.active.take() else {
            return Err(RecorderError::NotRecording);
        };
        self.state = RecorderState::Finalizing;
        log::debug!("recorder: Recording → Finalizing");

        let ActiveCapture {
            handle,
            mut rx,
            mut chunks,
        } = active;
        drop(handle);
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }

        let result = finalize(chunks);
        self.state = RecorderState::Idle;
        match &result {
            Ok(capture) => log::info!(
                "recorder: captured {:.2}s ({} bytes)",
                capture.duration().as_secs_f64(),
                capture.bytes().len()
            ),
            Err(err) => log::warn!("recorder: {err}"),
        }
        result
    }

    /// Release the device and discard any captured audio.
    pub fn abort(&mut self) {
        if self.active.take().is_some() {
            log::debug!("recorder: aborted");
        }
        self.state = RecorderState::Idle;
    }

    /// Record until `stop_rx` yields, `timeout` elapses or `cancel` fires.
    ///
    /// A closed `stop_rx` disables manual stop; the timeout still applies.
    pub async fn record(
        &mut self,
        timeout: Duration,
        stop_rx: &mut mpsc::UnboundedReceiver<()>,
        cancel: &CancellationToken,
    ) -> Result<(AudioCapture, StopReason), RecorderError> {
        self.start()?;

        enum Step {
            Chunk(AudioChunk),
            Stop(StopReason),
            Cancelled,
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            let Some(active) = self.active.as_mut() else {
                return Err(RecorderError::NotRecording);
            };

            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                Some(()) = stop_rx.recv() => Step::Stop(StopReason::Manual),
                _ = &mut deadline => Step::Stop(StopReason::Timeout),
                Some(chunk) = active.rx.recv() => Step::Chunk(chunk),
            };

            match step {
                Step::Chunk(chunk) => active.chunks.push(chunk),
                Step::Stop(reason) => {
                    log::debug!("recorder: stop ({reason:?})");
                    return self.stop().map(|capture| (capture, reason));
                }
                Step::Cancelled => {
                    self.abort();
                    return Err(RecorderError::Cancelled);
                }
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
