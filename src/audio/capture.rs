//! Microphone capture via `cpal`.
//!
//! [`CaptureDevice`] is the seam the [`Recorder`](super::Recorder) talks to.
//! [`CpalDevice`] is the real implementation: it opens the input stream on a
//! dedicated thread (a `cpal::Stream` is not `Send` on every platform) and
//! forwards every hardware buffer as an [`AudioChunk`] over an unbounded
//! tokio channel.  The returned [`CaptureHandle`] is a RAII guard; dropping
//! it stops the stream and joins the thread, after which the sender side of
//! the channel is closed.

use std::sync::mpsc as std_mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the cpal callback.
///
/// Samples are interleaved `f32` in the range `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of this chunk in Hz (e.g. 44100, 48000, 16000).
    pub sample_rate: u32,
    /// Number of interleaved channels (1 = mono, 2 = stereo, …).
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening the input stream.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device '{0}' not found")]
    DeviceNotFound(String),

    #[error("failed to list input devices: {0}")]
    Enumerate(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("unsupported sample format {0:?}")]
    SampleFormat(cpal::SampleFormat),

    #[error("capture thread failed: {0}")]
    Thread(String),
}

impl CaptureError {
    /// `true` when the failure means "no usable microphone": nothing is
    /// plugged in, the configured device is gone, or the OS refused access.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            CaptureError::NoDevice
                | CaptureError::DeviceNotFound(_)
                | CaptureError::DefaultConfig(cpal::DefaultStreamConfigError::DeviceNotAvailable)
                | CaptureError::BuildStream(cpal::BuildStreamError::DeviceNotAvailable)
                | CaptureError::PlayStream(cpal::PlayStreamError::DeviceNotAvailable)
        )
    }
}

// ---------------------------------------------------------------------------
// CaptureHandle
// ---------------------------------------------------------------------------

/// RAII guard that keeps an input stream alive.
///
/// Dropping it runs the device's stop routine exactly once.  Once the drop
/// returns, the device sends no further chunks.
pub struct CaptureHandle {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureHandle {
    /// Handle whose drop runs `stop`.
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// Handle with nothing to release.
    pub fn detached() -> Self {
        Self { stop: None }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("active", &self.stop.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// CaptureDevice
// ---------------------------------------------------------------------------

/// A source of microphone audio.
pub trait CaptureDevice: Send + Sync {
    /// Open the device and start sending chunks to `tx`.
    ///
    /// Implementations must stop sending once the returned handle is dropped.
    fn open(&self, tx: mpsc::UnboundedSender<AudioChunk>) -> Result<CaptureHandle, CaptureError>;
}

// ---------------------------------------------------------------------------
// CpalDevice
// ---------------------------------------------------------------------------

/// Microphone capture built on top of `cpal`.
///
/// # Example
///
/// ```rust,no_run
/// use therapy_coach::audio::{CaptureDevice, CpalDevice};
///
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
/// let device = CpalDevice::new(None);
/// let handle = device.open(tx).unwrap();
/// // ... later
/// drop(handle); // stream stopped, `rx` will yield `None` once drained
/// ```
#[derive(Debug, Clone, Default)]
pub struct CpalDevice {
    /// Input device name; `None` picks the host default.
    device_name: Option<String>,
}

impl CpalDevice {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    /// Names of the input devices on the default host.
    pub fn input_device_names() -> Result<Vec<String>, CaptureError> {
        Ok(cpal::default_host()
            .input_devices()?
            .filter_map(|d| d.name().ok())
            .collect())
    }
}

impl CaptureDevice for CpalDevice {
    fn open(&self, tx: mpsc::UnboundedSender<AudioChunk>) -> Result<CaptureHandle, CaptureError> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_name = self.device_name.clone();

        let thread = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let stream = match start_stream(device_name.as_deref(), tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Returns on an explicit stop or when the handle is gone.
                let _ = stop_rx.recv();
                drop(stream);
                log::debug!("capture: stream closed");
            })
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(CaptureError::Thread(
                    "capture thread exited before the stream started".into(),
                ));
            }
        }

        Ok(CaptureHandle::new(move || {
            let _ = stop_tx.send(());
            if thread.join().is_err() {
                log::error!("capture: audio thread panicked");
            }
        }))
    }
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    match name {
        None => host.default_input_device().ok_or(CaptureError::NoDevice),
        Some(wanted) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceNotFound(wanted.to_string())),
    }
}

/// Open and start the input stream; runs on the capture thread.
fn start_stream(
    device_name: Option<&str>,
    tx: mpsc::UnboundedSender<AudioChunk>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = find_device(&host, device_name)?;
    let supported = device.default_input_config()?;

    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    log::info!(
        "capture: opening '{}' at {} Hz, {} ch, {:?}",
        device.name().unwrap_or_else(|_| "unknown".into()),
        config.sample_rate.0,
        config.channels,
        format
    );

    let stream = match format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, tx)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, tx)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, tx)?,
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, tx)?,
        other => return Err(CaptureError::SampleFormat(other)),
    };

    stream.play()?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: mpsc::UnboundedSender<AudioChunk>,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let chunk = AudioChunk {
                samples: data.iter().map(|&s| s.to_sample::<f32>()).collect(),
                sample_rate,
                channels,
            };
            // Ignore send errors; the receiver may have been dropped.
            let _ = tx.send(chunk);
        },
        |err: cpal::StreamError| {
            log::error!("capture: cpal stream error: {err}");
        },
        None,
    )?;
    Ok(stream)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
