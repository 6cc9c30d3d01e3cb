use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{ExpressionDetector, FaceDetection, InferenceError};
use crate::telemetry::inject_trace_context;
use crate::types::Frame;

#[derive(Debug, Serialize)]
struct DetectRequest {
    width: u32,
    height: u32,
    /// Raw frame bytes, base64.
    frame: String,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<FaceDetection>,
}

/// Client for an expression-model service.
///
/// `GET /health` answers once the weights are resident; `POST /detect`
/// takes a frame and returns one entry per face found.
pub struct HttpExpressionDetector {
    client: Client,
    base_url: String,
}

impl HttpExpressionDetector {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> InferenceError {
    InferenceError::ModelUnavailable(format!("{context}: {err}"))
}

#[async_trait]
impl ExpressionDetector for HttpExpressionDetector {
    #[instrument(skip(self), fields(url = %self.base_url))]
    async fn load(&self) -> Result<(), InferenceError> {
        let url = format!("{}/health", self.base_url);
        let response = inject_trace_context(self.client.get(&url))
            .send()
            .await
            .map_err(|e| unavailable("model service unreachable", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::ModelUnavailable(format!(
                "model service health returned {status}"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, frame), fields(width = frame.dimensions.width, height = frame.dimensions.height))]
    async fn detect(&self, frame: &Frame) -> Result<Vec<FaceDetection>, InferenceError> {
        let body = DetectRequest {
            width: frame.dimensions.width,
            height: frame.dimensions.height,
            frame: BASE64.encode(&frame.data),
        };

        let url = format!("{}/detect", self.base_url);
        let response = inject_trace_context(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| unavailable("model service unreachable", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            tracing::warn!(%status, error_body = %error_body, "detect request failed");
            return Err(InferenceError::ModelUnavailable(format!(
                "model service returned {status}"
            )));
        }

        let parsed: DetectResponse = response
            .json()
            .await
            .map_err(|e| unavailable("malformed detect response", e))?;
        Ok(parsed.detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameDimensions;
    use bytes::Bytes;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn frame() -> Frame {
        Frame {
            dimensions: FrameDimensions {
                width: 2,
                height: 1,
            },
            data: Bytes::from_static(b"abcdef"),
        }
    }

    fn detector(server: &MockServer) -> HttpExpressionDetector {
        HttpExpressionDetector::new(&server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_health_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        detector(&server).load().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_failure_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = detector(&server).load().await.unwrap_err();
        assert!(matches!(err, InferenceError::ModelUnavailable(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_detect_sends_frame_and_keeps_score_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/detect"))
            .and(body_partial_json(json!({
                "width": 2,
                "height": 1,
                "frame": BASE64.encode(b"abcdef"),
            })))
            // Raw body: the key order on the wire is what is under test.
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"detections":[{"expressions":{"surprised":0.2,"happy":0.7,"neutral":0.1}}]}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let faces = detector(&server).detect(&frame()).await.unwrap();
        assert_eq!(faces.len(), 1);
        let names: Vec<&str> = faces[0].expressions.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["surprised", "happy", "neutral"]);
    }

    #[tokio::test]
    async fn test_detect_no_faces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/detect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"detections": []})))
            .mount(&server)
            .await;

        let faces = detector(&server).detect(&frame()).await.unwrap();
        assert!(faces.is_empty());
    }

    #[tokio::test]
    async fn test_detect_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/detect"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = detector(&server).detect(&frame()).await.unwrap_err();
        assert!(matches!(err, InferenceError::ModelUnavailable(_)));
    }
}
