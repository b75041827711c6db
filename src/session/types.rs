use crate::remote::{Camera, ProgressSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The member whose embeddings a session manages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: u64,
    pub name: String,
}

impl Member {
    pub fn new<S: Into<String>>(id: u64, name: S) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("member {}", self.id)
        } else {
            self.name.clone()
        }
    }
}

/// Life cycle of one extraction attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    Idle,
    Started,
    Polling,
    Done,
    Failed,
}

impl JobPhase {
    /// True while an attempt is in flight and progress is being observed
    pub fn is_active(&self) -> bool {
        matches!(self, JobPhase::Started | JobPhase::Polling)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobPhase::Idle => "idle",
            JobPhase::Started => "started",
            JobPhase::Polling => "extracting",
            JobPhase::Done => "done",
            JobPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Everything a renderer needs to draw the session, detached from live state
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub member: Member,
    pub cameras: Vec<Camera>,
    /// When the camera directory was last loaded successfully
    pub cameras_loaded_at: Option<DateTime<Utc>>,
    pub selected: Option<u64>,
    pub collecting: BTreeMap<u64, bool>,
    pub phase: JobPhase,
    pub last_snapshot: Option<ProgressSnapshot>,
    pub busy: bool,
    pub closed: bool,
}

impl SessionView {
    pub fn selected_camera(&self) -> Option<&Camera> {
        let selected = self.selected?;
        self.cameras.iter().find(|camera| camera.id == selected)
    }

    pub fn is_collecting(&self, camera_id: u64) -> bool {
        self.collecting.get(&camera_id).copied().unwrap_or(false)
    }

    pub fn is_collecting_selected(&self) -> bool {
        self.selected
            .map(|camera_id| self.is_collecting(camera_id))
            .unwrap_or(false)
    }

    pub fn can_start(&self) -> bool {
        !self.closed && !self.busy && self.selected.is_some() && !self.is_collecting_selected()
    }

    pub fn can_stop(&self) -> bool {
        !self.closed && !self.busy && self.is_collecting_selected()
    }

    /// Extract and remove share the same gate
    pub fn can_extract(&self) -> bool {
        !self.closed && !self.busy && self.selected.is_some()
    }

    /// Progress to draw, if an attempt is running or has reported anything
    pub fn progress_percent(&self) -> Option<f64> {
        match &self.last_snapshot {
            Some(snapshot) => Some(snapshot.clamped_percent()),
            None if self.phase.is_active() => Some(0.0),
            None => None,
        }
    }
}
