//! HTTP model server backend.

use std::time::Duration;

use async_trait::async_trait;
use nexus_models::{Detection, ImagePayload, InferenceTask};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::ModelExecutor;

/// Configuration for the remote executor.
#[derive(Debug, Clone)]
pub struct RemoteExecutorConfig {
    /// Base URL of the model server
    pub base_url: String,
    /// Upper bound on any single request, regardless of the job budget
    pub request_timeout: Duration,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
}

impl Default for RemoteExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl RemoteExecutorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("MODEL_SERVER_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            request_timeout: Duration::from_secs(
                std::env::var("MODEL_SERVER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            connect_timeout: Duration::from_secs(
                std::env::var("MODEL_SERVER_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct ReferenceBody<'a> {
    image_ref: &'a str,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    detections: Vec<Detection>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// Executor calling an external model server over HTTP.
///
/// `POST {base_url}/v1/models/{model_id}/{task}` with the encoded image as an
/// octet-stream body (or `{"image_ref": ..}` for stored images); the server
/// answers `{"detections": [..]}`.
pub struct RemoteExecutor {
    http: Client,
    config: RemoteExecutorConfig,
}

impl RemoteExecutor {
    /// Create a new remote executor.
    pub fn new(config: RemoteExecutorConfig) -> ExecutorResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(ExecutorError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ExecutorResult<Self> {
        Self::new(RemoteExecutorConfig::from_env())
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Check if the model server is healthy.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.config.base_url);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<HealthResponse>().await {
                    Ok(health) => health.status == "healthy" || health.status == "ok",
                    Err(e) => {
                        warn!("Model server health response unreadable: {}", e);
                        false
                    }
                }
            }
            Ok(response) => {
                warn!("Model server health check failed: {}", response.status());
                false
            }
            Err(e) => {
                warn!("Model server health check error: {}", e);
                false
            }
        }
    }

    fn endpoint(&self, model_id: &str, task: InferenceTask) -> String {
        format!(
            "{}/v1/models/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            model_id,
            task
        )
    }
}

#[async_trait]
impl ModelExecutor for RemoteExecutor {
    fn name(&self) -> &str {
        "remote"
    }

    async fn run(
        &self,
        image: &ImagePayload,
        model_id: &str,
        task: InferenceTask,
        timeout: Duration,
    ) -> ExecutorResult<Vec<Detection>> {
        if image.is_empty() {
            return Err(ExecutorError::invalid_image("empty image payload"));
        }

        let url = self.endpoint(model_id, task);
        debug!(model_id, task = %task, bytes = image.len(), "Sending inference request to {}", url);

        let request = self.http.post(&url).timeout(timeout);
        let request = match image {
            ImagePayload::Inline(bytes) => request
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes.clone()),
            ImagePayload::Reference(key) => request.json(&ReferenceBody { image_ref: key }),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecutorError::Timeout(timeout)
            } else {
                ExecutorError::Network(e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ExecutorError::ModelNotFound(model_id.to_string()));
        }
        if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::InvalidImage(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::RequestFailed(format!(
                "Model server returned {}: {}",
                status, body
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ExecutorError::Timeout(timeout)
            } else {
                ExecutorError::Network(e)
            }
        })?;
        let parsed: DetectResponse = serde_json::from_slice(&body)?;
        Ok(parsed.detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_bytes, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn executor_for(server: &MockServer) -> RemoteExecutor {
        RemoteExecutor::new(RemoteExecutorConfig::default().with_base_url(server.uri())).unwrap()
    }

    fn person() -> serde_json::Value {
        json!({
            "class_id": 0,
            "label": "person",
            "confidence": 0.91,
            "bbox": {"x": 10.0, "y": 20.0, "width": 30.0, "height": 60.0}
        })
    }

    #[test]
    fn test_config_defaults() {
        let config = RemoteExecutorConfig::default();
        assert_eq!(config.base_url, "http://localhost:8001");
        assert_eq!(config.request_timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_inline_image_posted_as_octet_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/models/yolov8n/detect"))
            .and(header_eq("content-type", "application/octet-stream"))
            .and(body_bytes(vec![1u8, 2, 3]))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "detections": [person()]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let detections = executor
            .run(
                &ImagePayload::inline(vec![1u8, 2, 3]),
                "yolov8n",
                InferenceTask::Detect,
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "person");
    }

    #[tokio::test]
    async fn test_reference_image_posted_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/models/yolov8n-seg/segment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"detections": []})))
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let detections = executor
            .run(
                &ImagePayload::reference("frames/cam-1/0001.jpg"),
                "yolov8n-seg",
                InferenceTask::Segment,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(detections.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_model_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let err = executor
            .run(
                &ImagePayload::inline(vec![1u8]),
                "missing",
                InferenceTask::Detect,
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::ModelNotFound(m) if m == "missing"));
    }

    #[tokio::test]
    async fn test_server_error_is_request_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("CUDA out of memory"))
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let err = executor
            .run(
                &ImagePayload::inline(vec![1u8]),
                "yolov8n",
                InferenceTask::Detect,
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CUDA out of memory"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"detections": []}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let err = executor
            .run(
                &ImagePayload::inline(vec![1u8]),
                "yolov8n",
                InferenceTask::Detect,
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_json_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let err = executor
            .run(
                &ImagePayload::inline(vec![1u8]),
                "yolov8n",
                InferenceTask::Detect,
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Json(_)));
    }

    #[tokio::test]
    async fn test_empty_payload_rejected_locally() {
        let executor = RemoteExecutor::new(RemoteExecutorConfig::default()).unwrap();
        let err = executor
            .run(
                &ImagePayload::inline(Vec::<u8>::new()),
                "yolov8n",
                InferenceTask::Detect,
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidImage(_)));
    }
}
