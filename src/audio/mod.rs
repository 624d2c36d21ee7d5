//! Audio pipeline: microphone capture → finalised recording → canonical WAV.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → AudioChunk (mpsc) → Recorder → AudioCapture
//!           → decode (symphonia) → first channel → resample_to_16k (rubato)
//!           → quantize → 44-byte RIFF/WAVE → AudioPayload
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use therapy_coach::audio::{prepare_payload, CpalDevice, Recorder};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut recorder = Recorder::new(Arc::new(CpalDevice::new(None)));
//! let (_stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel();
//! let (capture, _reason) = recorder
//!     .record(Duration::from_secs(10), &mut stop_rx, &CancellationToken::new())
//!     .await?;
//! let payload = prepare_payload(capture).await;
//! println!("{} bytes, canonical = {}", payload.bytes.len(), payload.canonical);
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod decode;
pub mod encoder;
pub mod recorder;
pub mod resample;
pub mod wav;

pub use capture::{AudioChunk, CaptureDevice, CaptureError, CaptureHandle, CpalDevice};
pub use decode::{decode, DecodeError, DecodedAudio};
pub use encoder::{encode_canonical, payload_for, prepare_payload, AudioPayload};
pub use recorder::{AudioCapture, Recorder, RecorderError, RecorderState, StopReason};
pub use resample::{resample_to, resample_to_16k, TARGET_RATE};
pub use wav::{quantize, write_pcm16, WavSpec};
