use super::types::{Acknowledgement, Camera, CaptureOptions, ExtractionAck, ProgressSnapshot};
use crate::error::BackendError;

/// Request/response contract of the embedding service.
///
/// Implementations only translate calls; they hold no session state.
#[async_trait::async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Ordered camera directory, no pagination
    async fn list_cameras(&self) -> Result<Vec<Camera>, BackendError>;

    async fn begin_capture(
        &self,
        member_id: u64,
        camera_ids: &[u64],
        options: CaptureOptions,
    ) -> Result<Acknowledgement, BackendError>;

    /// Stop sample collection. The backend may treat this as a global stop.
    async fn end_capture(&self, reason: &str) -> Result<Acknowledgement, BackendError>;

    /// Queue an asynchronous extraction (never `sync`)
    async fn begin_extraction(
        &self,
        member_id: u64,
        camera_ids: &[u64],
    ) -> Result<ExtractionAck, BackendError>;

    async fn fetch_progress(
        &self,
        member_id: u64,
        camera_id: u64,
    ) -> Result<ProgressSnapshot, BackendError>;

    async fn remove_embeddings(
        &self,
        member_id: u64,
        camera_id: u64,
    ) -> Result<Acknowledgement, BackendError>;

    /// Name used in log lines
    fn backend_name(&self) -> &str;
}
