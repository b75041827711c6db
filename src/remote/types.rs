use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A camera as listed by the backend directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

impl Camera {
    pub fn new<S: Into<String>>(id: u64, name: S) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Envelope returned by the camera listing endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct CameraListResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<Camera>,
}

/// Options forwarded with a begin-capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    pub show_viewer: bool,
    pub clear_existing: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            show_viewer: true,
            clear_existing: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct StartCaptureRequest<'a> {
    pub member_id: u64,
    pub camera_ids: &'a [u64],
    pub show_viewer: bool,
    pub clear_existing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ExtractRequest<'a> {
    pub member_id: u64,
    pub camera_ids: &'a [u64],
    pub sync: bool,
}

/// Plain acknowledgement carrying an optional human-readable message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    #[serde(default)]
    pub message: Option<String>,
}

impl Acknowledgement {
    pub fn with_message<S: Into<String>>(message: S) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    /// The server's message, or `fallback` when it sent none
    pub fn message_or(&self, fallback: &str) -> String {
        match self.message.as_deref() {
            Some(message) if !message.trim().is_empty() => message.to_string(),
            _ => fallback.to_string(),
        }
    }
}

/// Reply to a begin-extraction request. `status` is not a closed vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionAck {
    #[serde(default, deserialize_with = "status_as_string")]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ExtractionAck {
    pub fn new<S: Into<String>>(status: S, message: Option<String>) -> Self {
        Self {
            status: Some(status.into()),
            message,
        }
    }

    /// `started` and `ok` are the statuses the backend is known to send
    pub fn is_recognized(&self) -> bool {
        matches!(self.status.as_deref(), Some("started") | Some("ok"))
    }

    pub fn status_label(&self) -> &str {
        self.status.as_deref().unwrap_or("unknown")
    }

    pub fn message_or_default(&self) -> String {
        match self.message.as_deref() {
            Some(message) if !message.trim().is_empty() => message.to_string(),
            _ if self.is_recognized() => "Extraction started".to_string(),
            _ => format!("Extract: {}", self.status_label()),
        }
    }
}

/// One reading of the extraction progress feed for a (member, camera) pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub stage: String,
    #[serde(default, deserialize_with = "lenient_percent")]
    pub percent: f64,
    #[serde(default)]
    pub camera_id: Option<u64>,
    #[serde(default)]
    pub member_id: Option<u64>,
    /// Any additional fields the backend reports
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ProgressSnapshot {
    pub fn new<S: Into<String>>(stage: S, percent: f64) -> Self {
        Self {
            stage: stage.into(),
            percent,
            ..Default::default()
        }
    }

    pub fn for_pair(mut self, member_id: u64, camera_id: u64) -> Self {
        self.member_id = Some(member_id);
        self.camera_id = Some(camera_id);
        self
    }

    pub fn is_complete(&self) -> bool {
        self.percent >= 100.0 || self.stage == "done"
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.stage.as_str(), "failed" | "error")
    }

    /// Percent clamped into 0..=100 for display
    pub fn clamped_percent(&self) -> f64 {
        if self.percent.is_nan() {
            0.0
        } else {
            self.percent.clamp(0.0, 100.0)
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// Accepts numbers, numeric strings and null; anything else reads as 0.
fn lenient_percent<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    })
}

fn status_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
