use crate::error::BackendError;
use crate::remote::{Camera, EmbeddingBackend};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Cached camera list for one session
#[derive(Debug, Default, Clone)]
pub struct CameraDirectory {
    cameras: Vec<Camera>,
    loaded_at: Option<DateTime<Utc>>,
}

impl CameraDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the camera list from the backend. Duplicate ids keep their first entry.
    pub async fn fetch(backend: &dyn EmbeddingBackend) -> Result<Vec<Camera>, BackendError> {
        debug!("Fetching camera directory from {}", backend.backend_name());

        let cameras = backend.list_cameras().await?;
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(cameras.len());

        for camera in cameras {
            if seen.insert(camera.id) {
                unique.push(camera);
            } else {
                warn!("Ignoring duplicate camera id {} in directory", camera.id);
            }
        }

        info!("Camera directory loaded with {} cameras", unique.len());
        Ok(unique)
    }

    /// Replace the snapshot
    pub fn replace(&mut self, cameras: Vec<Camera>) {
        self.cameras = cameras;
        self.loaded_at = Some(Utc::now());
    }

    pub fn clear(&mut self) {
        self.cameras.clear();
        self.loaded_at = None;
    }

    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.cameras.iter().map(|camera| camera.id)
    }

    pub fn contains(&self, camera_id: u64) -> bool {
        self.cameras.iter().any(|camera| camera.id == camera_id)
    }

    pub fn get(&self, camera_id: u64) -> Option<&Camera> {
        self.cameras.iter().find(|camera| camera.id == camera_id)
    }

    pub fn first_id(&self) -> Option<u64> {
        self.cameras.first().map(|camera| camera.id)
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}
