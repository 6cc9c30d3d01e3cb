//! Expression inference.
//!
//! The model itself is an external capability behind [`ExpressionDetector`].
//! [`InferenceSession`] owns the one request that may be outstanding against
//! it and refuses a second caller with [`InferenceError::Busy`] instead of
//! queueing, so a slow stale result can never land after a fresh one.

mod http;

pub use http::HttpExpressionDetector;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{ExpressionScoreSet, Frame};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("an inference request is already in flight")]
    Busy,

    #[error("no face detected in frame")]
    NoFaceDetected,

    #[error("expression model unavailable: {0}")]
    ModelUnavailable(String),
}

/// One face found in a frame, with its expression scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub expressions: ExpressionScoreSet,
}

/// Face detection plus expression classification.
#[async_trait]
pub trait ExpressionDetector: Send + Sync {
    /// Make the model usable. Called once before any `detect`.
    async fn load(&self) -> Result<(), InferenceError>;

    /// Run the model on a frame. An empty result means no face was found.
    async fn detect(&self, frame: &Frame) -> Result<Vec<FaceDetection>, InferenceError>;
}

/// Clears the in-flight flag however the request ends, including the
/// request future being dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn try_enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct InferenceSession {
    detector: Arc<dyn ExpressionDetector>,
    loaded: AtomicBool,
    in_flight: AtomicBool,
}

impl InferenceSession {
    pub fn new(detector: Arc<dyn ExpressionDetector>) -> Self {
        Self {
            detector,
            loaded: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Load the model. Repeated calls after a success are no-ops.
    pub async fn load(&self) -> Result<(), InferenceError> {
        if self.is_loaded() {
            return Ok(());
        }
        match self.detector.load().await {
            Ok(()) => {
                self.loaded.store(true, Ordering::Release);
                info!("expression model loaded");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "expression model failed to load");
                Err(e)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Score the expressions of the first face in `frame`.
    ///
    /// No retries: `NoFaceDetected` goes straight back to the caller.
    pub async fn infer(&self, frame: &Frame) -> Result<ExpressionScoreSet, InferenceError> {
        if !self.is_loaded() {
            return Err(InferenceError::ModelUnavailable(
                "model has not been loaded".to_string(),
            ));
        }

        let _in_flight = match InFlight::try_enter(&self.in_flight) {
            Some(guard) => guard,
            None => {
                debug!("inference rejected: request already in flight");
                return Err(InferenceError::Busy);
            }
        };

        let detections = self.detector.detect(frame).await?;
        debug!(faces = detections.len(), "inference complete");

        detections
            .into_iter()
            .map(|d| d.expressions)
            .find(|scores| !scores.is_empty())
            .ok_or(InferenceError::NoFaceDetected)
    }
}
