//! Test doubles shared by the unit tests of several modules.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use wiremock::MockServer;

use crate::api::{ApiClient, ApiError, Assessment, AssessmentRequest, Assessor};
use crate::audio::{AudioChunk, AudioPayload, CaptureDevice, CaptureError, CaptureHandle};
use crate::config::{ApiConfig, LoginSession, VoiceSettings};
use crate::narration::{NarrationError, SpeechSynthesizer};

// ---------------------------------------------------------------------------
// Capture devices
// ---------------------------------------------------------------------------

/// Delivers the same chunks every time it is opened.
pub struct ScriptedDevice {
    chunks: Vec<AudioChunk>,
    opens: AtomicUsize,
    open: Arc<AtomicBool>,
}

impl ScriptedDevice {
    pub fn new(chunks: Vec<AudioChunk>) -> Self {
        Self {
            chunks,
            opens: AtomicUsize::new(0),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl CaptureDevice for ScriptedDevice {
    fn open(&self, tx: mpsc::UnboundedSender<AudioChunk>) -> Result<CaptureHandle, CaptureError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
        for chunk in &self.chunks {
            let _ = tx.send(chunk.clone());
        }
        let open = Arc::clone(&self.open);
        Ok(CaptureHandle::new(move || {
            drop(tx);
            open.store(false, Ordering::SeqCst);
        }))
    }
}

/// No microphone available.
pub struct DeniedDevice;

impl CaptureDevice for DeniedDevice {
    fn open(&self, _tx: mpsc::UnboundedSender<AudioChunk>) -> Result<CaptureHandle, CaptureError> {
        Err(CaptureError::NoDevice)
    }
}

/// One short mono chunk of non-silent audio.
pub fn voice_chunk() -> AudioChunk {
    AudioChunk {
        samples: (0..1_600).map(|i| ((i as f32) * 0.05).sin() * 0.3).collect(),
        sample_rate: 16_000,
        channels: 1,
    }
}

// ---------------------------------------------------------------------------
// Speech synthesizer
// ---------------------------------------------------------------------------

/// Records what it was asked to say; each utterance takes `latency`.
pub struct ScriptedSynth {
    latency: Duration,
    fail: bool,
    spoken: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
}

impl ScriptedSynth {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            fail: false,
            spoken: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        }
    }

    pub fn instant() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Fails every utterance immediately.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::instant()
        }
    }

    /// Utterances that were started, in order.
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    /// Utterances that ran to completion.
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynth {
    async fn speak(&self, text: &str, _voice: &VoiceSettings) -> Result<(), NarrationError> {
        self.spoken.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(NarrationError::Failed("scripted failure".into()));
        }
        tokio::time::sleep(self.latency).await;
        self.finished.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Assessor
// ---------------------------------------------------------------------------

/// Answers assessments from a queue; the last entry repeats once the
/// queue is drained.
pub struct ScriptedAssessor {
    results: Mutex<Vec<Result<Assessment, ApiError>>>,
    requests: Mutex<Vec<AssessmentRequest>>,
}

impl ScriptedAssessor {
    pub fn new(results: Vec<Result<Assessment, ApiError>>) -> Self {
        Self {
            results: Mutex::new(results),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Successful assessments with the given composites.
    pub fn scores(composites: &[f64]) -> Self {
        Self::new(
            composites
                .iter()
                .map(|c| {
                    Ok(Assessment {
                        composite: *c,
                        ..Assessment::default()
                    })
                })
                .collect(),
        )
    }

    pub fn requests(&self) -> Vec<AssessmentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Assessor for ScriptedAssessor {
    async fn assess(
        &self,
        request: &AssessmentRequest,
        _audio: &AudioPayload,
    ) -> Result<Assessment, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut results = self.results.lock().unwrap();
        match results.len() {
            0 => Err(ApiError::Request("no scripted result".into())),
            1 => results[0].clone(),
            _ => results.remove(0),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Client pointed at `server`, signed in as `patient-7`.
pub fn api_client(server: &MockServer, token: Option<&str>) -> ApiClient {
    let config = ApiConfig {
        base_url: format!("{}/api/", server.uri()),
        timeout_secs: 5,
    };
    let login = LoginSession {
        token: token.map(str::to_string),
        user_id: Some("patient-7".into()),
    };
    ApiClient::from_config(&config, &login)
}

/// Multipart bodies are matched as text, so the payload stays ASCII.
pub fn ascii_payload() -> AudioPayload {
    AudioPayload {
        bytes: b"RIFF-test-audio".to_vec(),
        file_name: "recording.wav".into(),
        mime: "audio/wav".into(),
        canonical: true,
    }
}
