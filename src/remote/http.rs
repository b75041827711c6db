use super::backend::EmbeddingBackend;
use super::types::{
    Acknowledgement, Camera, CameraListResponse, CaptureOptions, ExtractRequest, ExtractionAck,
    ProgressSnapshot, StartCaptureRequest,
};
use crate::config::BackendConfig;
use crate::error::BackendError;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Longest slice of a non-JSON error body carried into an error message
const MAX_ERROR_BODY: usize = 200;

/// Embedding backend reached over its REST API
pub struct HttpBackend {
    base_url: String,
    client: Client,
}

impl HttpBackend {
    /// Create a client for the configured backend
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BackendError::Transport {
                operation: "client_setup".to_string(),
                details: e.to_string(),
            })?;

        Ok(Self::with_client(&config.base_url, client))
    }

    pub fn with_client(base_url: &str, client: Client) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        info!("Using embedding backend at {}", base_url);
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = request.send().await.map_err(|e| BackendError::Transport {
            operation: operation.to_string(),
            details: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                operation: operation.to_string(),
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }

        let body = response.bytes().await.map_err(|e| BackendError::Transport {
            operation: operation.to_string(),
            details: e.to_string(),
        })?;

        // Some endpoints answer with an empty body on success
        let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &body
        };

        serde_json::from_slice(body).map_err(|e| BackendError::Decode {
            operation: operation.to_string(),
            details: e.to_string(),
        })
    }
}

/// Pull the server's `detail` out of an error body
fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        match value.get("detail") {
            Some(Value::String(detail)) => return detail.clone(),
            Some(Value::Null) | None => {}
            Some(other) => return other.to_string(),
        }
        if let Some(Value::String(message)) = value.get("message") {
            return message.clone();
        }
    }

    body.trim().chars().take(MAX_ERROR_BODY).collect()
}

#[async_trait::async_trait]
impl EmbeddingBackend for HttpBackend {
    async fn list_cameras(&self) -> Result<Vec<Camera>, BackendError> {
        let request = self.client.get(self.url("/cameras/allcameras"));
        let response: CameraListResponse = self.send("list_cameras", request).await?;
        debug!("Backend listed {} cameras", response.data.len());
        Ok(response.data)
    }

    async fn begin_capture(
        &self,
        member_id: u64,
        camera_ids: &[u64],
        options: CaptureOptions,
    ) -> Result<Acknowledgement, BackendError> {
        let body = StartCaptureRequest {
            member_id,
            camera_ids,
            show_viewer: options.show_viewer,
            clear_existing: options.clear_existing,
        };
        let request = self.client.post(self.url("/embeddings/start")).json(&body);
        self.send("begin_capture", request).await
    }

    async fn end_capture(&self, reason: &str) -> Result<Acknowledgement, BackendError> {
        let request = self
            .client
            .post(self.url("/embeddings/stop"))
            .query(&[("reason", reason)]);
        self.send("end_capture", request).await
    }

    async fn begin_extraction(
        &self,
        member_id: u64,
        camera_ids: &[u64],
    ) -> Result<ExtractionAck, BackendError> {
        let body = ExtractRequest {
            member_id,
            camera_ids,
            sync: false,
        };
        let request = self.client.post(self.url("/embeddings/extract")).json(&body);
        self.send("begin_extraction", request).await
    }

    async fn fetch_progress(
        &self,
        member_id: u64,
        camera_id: u64,
    ) -> Result<ProgressSnapshot, BackendError> {
        let request = self
            .client
            .get(self.url(&format!("/embeddings/progress/{}", member_id)))
            .query(&[("camera_id", camera_id)]);
        self.send("fetch_progress", request).await
    }

    async fn remove_embeddings(
        &self,
        member_id: u64,
        camera_id: u64,
    ) -> Result<Acknowledgement, BackendError> {
        let request = self
            .client
            .delete(self.url(&format!("/embeddings/remove/{}", member_id)))
            .query(&[("camera_id", camera_id)]);
        self.send("remove_embeddings", request).await
    }

    fn backend_name(&self) -> &str {
        &self.base_url
    }
}
