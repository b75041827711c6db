use crate::error::SessionError;
use std::collections::BTreeMap;
use tracing::debug;

/// Last acknowledged collecting flag per camera.
///
/// Keys are always a subset of the current camera directory; flags change
/// only after the backend has acknowledged a start, stop or removal.
#[derive(Debug, Default, Clone)]
pub struct CaptureTracker {
    flags: BTreeMap<u64, bool>,
}

impl CaptureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start over with every listed camera idle
    pub fn reset<I: IntoIterator<Item = u64>>(&mut self, camera_ids: I) {
        self.flags = camera_ids.into_iter().map(|id| (id, false)).collect();
    }

    /// Keep acknowledged flags for cameras still listed, add new ones idle
    pub fn reconcile<I: IntoIterator<Item = u64>>(&mut self, camera_ids: I) {
        let previous = std::mem::take(&mut self.flags);
        for camera_id in camera_ids {
            let collecting = previous.get(&camera_id).copied().unwrap_or(false);
            self.flags.insert(camera_id, collecting);
        }
        let dropped = previous
            .keys()
            .filter(|id| !self.flags.contains_key(id))
            .count();
        if dropped > 0 {
            debug!("Dropped capture flags for {} cameras", dropped);
        }
    }

    pub fn clear(&mut self) {
        self.flags.clear();
    }

    pub fn is_known(&self, camera_id: u64) -> bool {
        self.flags.contains_key(&camera_id)
    }

    pub fn is_collecting(&self, camera_id: u64) -> bool {
        self.flags.get(&camera_id).copied().unwrap_or(false)
    }

    /// Record an acknowledged state. Unknown cameras are ignored.
    pub fn mark(&mut self, camera_id: u64, collecting: bool) -> bool {
        match self.flags.get_mut(&camera_id) {
            Some(flag) => {
                debug!("Camera {} collecting={}", camera_id, collecting);
                *flag = collecting;
                true
            }
            None => {
                debug!(
                    "Ignoring collecting={} for camera {} outside the directory",
                    collecting, camera_id
                );
                false
            }
        }
    }

    pub fn ensure_can_start(&self, camera_id: u64) -> Result<(), SessionError> {
        self.ensure_known(camera_id)?;
        if self.is_collecting(camera_id) {
            return Err(SessionError::AlreadyCollecting { camera_id });
        }
        Ok(())
    }

    pub fn ensure_known(&self, camera_id: u64) -> Result<(), SessionError> {
        if self.is_known(camera_id) {
            Ok(())
        } else {
            Err(SessionError::UnknownCamera { camera_id })
        }
    }

    pub fn snapshot(&self) -> BTreeMap<u64, bool> {
        self.flags.clone()
    }

    pub fn collecting_cameras(&self) -> Vec<u64> {
        self.flags
            .iter()
            .filter(|(_, collecting)| **collecting)
            .map(|(id, _)| *id)
            .collect()
    }
}
