//! Synthetic-score fallback: wraps any [`Assessor`] and makes up a passing
//! score when the backend cannot be reached.
//!
//! Only built when `scoring.synthetic_fallback` is on.  It lets a session be
//! walked end to end without a scoring server; every made-up result carries
//! `synthetic: true` so it is never mistaken for a real measurement.

use async_trait::async_trait;
use rand::Rng;

use crate::audio::AudioPayload;

use super::assess::{Assessment, AssessmentRequest, Assessor};
use super::client::ApiError;

/// Lowest synthetic composite; the span above it is random.
pub const SYNTHETIC_FLOOR: f64 = 0.85;
const SYNTHETIC_SPAN: f64 = 0.15;

// ---------------------------------------------------------------------------
// SyntheticScoreAssessor
// ---------------------------------------------------------------------------

pub struct SyntheticScoreAssessor<A: Assessor> {
    inner: A,
}

impl<A: Assessor> SyntheticScoreAssessor<A> {
    pub fn new(inner: A) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

/// Errors that mean "no score available" rather than "the patient's answer
/// was refused".
fn is_unreachable(err: &ApiError) -> bool {
    matches!(
        err,
        ApiError::Request(_) | ApiError::Timeout | ApiError::Status { .. }
    )
}

fn synthetic_assessment() -> Assessment {
    let composite = SYNTHETIC_FLOOR + rand::thread_rng().gen::<f64>() * SYNTHETIC_SPAN;
    Assessment {
        composite: composite.min(1.0),
        synthetic: true,
        ..Assessment::default()
    }
}

#[async_trait]
impl<A: Assessor> Assessor for SyntheticScoreAssessor<A> {
    async fn assess(
        &self,
        request: &AssessmentRequest,
        audio: &AudioPayload,
    ) -> Result<Assessment, ApiError> {
        match self.inner.assess(request, audio).await {
            Ok(assessment) => Ok(assessment),
            Err(err) if is_unreachable(&err) => {
                let assessment = synthetic_assessment();
                log::warn!(
                    "assess: {} failed ({err}); using synthetic score {:.2}",
                    request.endpoint(),
                    assessment.composite
                );
                Ok(assessment)
            }
            Err(err) => Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
