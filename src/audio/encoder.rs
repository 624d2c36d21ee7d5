//! Canonical re-encoding of a recording for assessment.
//!
//! ```text
//! AudioCapture ─decode─▶ first channel ─resample─▶ 16 kHz ─quantise─▶ WAV (44-byte header)
//!                  └──DecodeError──▶ original bytes, unchanged
//! ```
//!
//! Decoding and resampling are CPU-bound and run on the blocking pool in
//! [`prepare_payload`].

use super::decode::{decode, DecodeError};
use super::recorder::AudioCapture;
use super::resample::resample_to_16k;
use super::wav::{write_pcm16, WavSpec};

/// Bytes sent to the assessment service as the `audio` form field.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime: String,
    /// `false` when the original container is sent because re-encoding failed.
    pub canonical: bool,
}

impl AudioPayload {
    fn canonical(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            file_name: "recording.wav".into(),
            mime: "audio/wav".into(),
            canonical: true,
        }
    }

    fn raw(capture: AudioCapture) -> Self {
        let ext = match capture.mime().split(';').next().unwrap_or_default().trim() {
            "audio/wav" | "audio/wave" | "audio/x-wav" => "wav",
            "audio/ogg" => "ogg",
            "audio/mpeg" => "mp3",
            "audio/flac" => "flac",
            _ => "webm",
        };
        let mime = capture.mime().to_string();
        Self {
            file_name: format!("recording.{ext}"),
            mime,
            bytes: capture.into_bytes(),
            canonical: false,
        }
    }
}

/// Decode, resample and re-serialise a capture as 16 kHz mono PCM16 WAV.
pub fn encode_canonical(capture: &AudioCapture) -> Result<Vec<u8>, DecodeError> {
    let decoded = decode(capture.bytes(), Some(capture.mime()))?;
    let samples = resample_to_16k(&decoded.samples, decoded.sample_rate)?;
    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }
    log::debug!(
        "encoder: {} Hz x {} ch, {:.2}s → {} frames @ 16 kHz",
        decoded.sample_rate,
        decoded.channels,
        decoded.duration_secs(),
        samples.len()
    );
    Ok(write_pcm16(&samples, WavSpec::CANONICAL)?)
}

/// [`encode_canonical`] with the degraded-mode policy applied: on a decode
/// failure the original capture is submitted as-is.
pub fn payload_for(capture: AudioCapture) -> AudioPayload {
    match encode_canonical(&capture) {
        Ok(bytes) => AudioPayload::canonical(bytes),
        Err(err) => {
            log::warn!(
                "encoder: {err}; submitting original {} ({} bytes)",
                capture.mime(),
                capture.bytes().len()
            );
            AudioPayload::raw(capture)
        }
    }
}

/// Run [`payload_for`] on the blocking thread pool.
pub async fn prepare_payload(capture: AudioCapture) -> AudioPayload {
    let fallback = capture.clone();
    match tokio::task::spawn_blocking(move || payload_for(capture)).await {
        Ok(payload) => payload,
        Err(err) => {
            log::error!("encoder: task failed: {err}; submitting original audio");
            AudioPayload::raw(fallback)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
