use super::types::JobPhase;
use crate::remote::ProgressSnapshot;
use tracing::{debug, info};

/// Result of feeding one progress snapshot to the job
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Snapshot recorded, keep polling
    Progress,
    /// Snapshot reported completion; the job is now `Done`
    Completed,
    /// Snapshot reported a failed extraction; the job is now `Failed`
    Failed(String),
    /// The job was not observing progress, snapshot dropped
    Ignored,
}

/// The single extraction attempt of a session, scoped to the selected camera
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    phase: JobPhase,
    last_snapshot: Option<ProgressSnapshot>,
    camera_id: Option<u64>,
}

impl Default for ExtractionJob {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionJob {
    pub fn new() -> Self {
        Self {
            phase: JobPhase::Idle,
            last_snapshot: None,
            camera_id: None,
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn last_snapshot(&self) -> Option<&ProgressSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn camera_id(&self) -> Option<u64> {
        self.camera_id
    }

    /// Start a fresh attempt. Valid from any phase; an active attempt is replaced.
    pub fn begin(&mut self, camera_id: u64) {
        debug!(
            "Extraction job for camera {} {} -> started",
            camera_id, self.phase
        );
        self.phase = JobPhase::Started;
        self.last_snapshot = None;
        self.camera_id = Some(camera_id);
    }

    pub fn mark_polling(&mut self) {
        if self.phase == JobPhase::Started {
            self.phase = JobPhase::Polling;
        }
    }

    /// Apply one snapshot from the progress feed
    pub fn apply_snapshot(&mut self, snapshot: ProgressSnapshot) -> TickOutcome {
        if !self.phase.is_active() {
            debug!("Dropping progress snapshot while job is {}", self.phase);
            return TickOutcome::Ignored;
        }

        let complete = snapshot.is_complete();
        let failed = !complete && snapshot.is_failed();
        let stage = snapshot.stage.clone();
        self.phase = JobPhase::Polling;
        self.last_snapshot = Some(snapshot);

        if complete {
            self.phase = JobPhase::Done;
            info!("Extraction for camera {:?} complete", self.camera_id);
            TickOutcome::Completed
        } else if failed {
            self.phase = JobPhase::Failed;
            TickOutcome::Failed(format!("backend reported stage '{}'", stage))
        } else {
            TickOutcome::Progress
        }
    }

    /// Move an active attempt to `Failed`. Returns false when nothing was running.
    pub fn fail(&mut self) -> bool {
        if self.phase.is_active() {
            self.phase = JobPhase::Failed;
            true
        } else {
            false
        }
    }

    /// Discard the attempt and its snapshot
    pub fn reset(&mut self) {
        if self.phase != JobPhase::Idle {
            debug!("Extraction job {} -> idle", self.phase);
        }
        *self = Self::new();
    }
}
