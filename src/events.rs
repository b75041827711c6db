use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// How prominently a notification should be shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// Remote operation a failure notification refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    LoadCameras,
    StartCapture,
    StopCapture,
    Extract,
    Remove,
}

impl Operation {
    /// Message shown when the backend gave no detail of its own
    pub fn fallback_failure(&self) -> &'static str {
        match self {
            Operation::LoadCameras => "Failed to fetch cameras",
            Operation::StartCapture => "Failed to start collection",
            Operation::StopCapture => "Failed to stop collection",
            Operation::Extract => "Failed to start extraction",
            Operation::Remove => "Failed to remove embeddings",
        }
    }
}

/// Events emitted by an embedding session; each one is a single operator notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Backend acknowledged the start of sample collection
    CaptureStarted {
        camera_id: u64,
        message: String,
        timestamp: SystemTime,
    },
    /// Backend acknowledged the end of sample collection
    CaptureStopped {
        camera_id: u64,
        message: String,
        timestamp: SystemTime,
    },
    /// Backend accepted an extraction request; polling has begun
    ExtractionStarted {
        camera_id: u64,
        status: String,
        message: String,
        timestamp: SystemTime,
    },
    /// Progress feed reported completion
    ExtractionCompleted {
        member_id: u64,
        camera_id: u64,
        timestamp: SystemTime,
    },
    /// Progress feed reported a failed extraction, or the poll deadline passed
    ExtractionFailed {
        camera_id: u64,
        reason: String,
        timestamp: SystemTime,
    },
    /// Backend removed stored embeddings for a camera
    EmbeddingsRemoved {
        camera_id: u64,
        message: String,
        timestamp: SystemTime,
    },
    /// A remote call failed
    OperationFailed {
        operation: Operation,
        message: String,
        timestamp: SystemTime,
    },
    /// A request was rejected before reaching the backend
    ValidationFailed { message: String, timestamp: SystemTime },
}

impl SessionEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            SessionEvent::CaptureStarted { timestamp, .. }
            | SessionEvent::CaptureStopped { timestamp, .. }
            | SessionEvent::ExtractionStarted { timestamp, .. }
            | SessionEvent::ExtractionCompleted { timestamp, .. }
            | SessionEvent::ExtractionFailed { timestamp, .. }
            | SessionEvent::EmbeddingsRemoved { timestamp, .. }
            | SessionEvent::OperationFailed { timestamp, .. }
            | SessionEvent::ValidationFailed { timestamp, .. } => *timestamp,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SessionEvent::CaptureStarted { .. } => Severity::Success,
            SessionEvent::CaptureStopped { .. } => Severity::Info,
            SessionEvent::ExtractionStarted { .. } => Severity::Info,
            SessionEvent::ExtractionCompleted { .. } => Severity::Success,
            SessionEvent::ExtractionFailed { .. } => Severity::Error,
            SessionEvent::EmbeddingsRemoved { .. } => Severity::Success,
            SessionEvent::OperationFailed { .. } => Severity::Error,
            SessionEvent::ValidationFailed { .. } => Severity::Warning,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SessionEvent::CaptureStarted { message, .. }
            | SessionEvent::CaptureStopped { message, .. }
            | SessionEvent::ExtractionStarted { message, .. }
            | SessionEvent::EmbeddingsRemoved { message, .. }
            | SessionEvent::OperationFailed { message, .. }
            | SessionEvent::ValidationFailed { message, .. } => message.clone(),
            SessionEvent::ExtractionCompleted { .. } => "Extraction complete".to_string(),
            SessionEvent::ExtractionFailed { reason, .. } => {
                format!("Extraction failed: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::CaptureStarted { .. } => "capture_started",
            SessionEvent::CaptureStopped { .. } => "capture_stopped",
            SessionEvent::ExtractionStarted { .. } => "extraction_started",
            SessionEvent::ExtractionCompleted { .. } => "extraction_completed",
            SessionEvent::ExtractionFailed { .. } => "extraction_failed",
            SessionEvent::EmbeddingsRemoved { .. } => "embeddings_removed",
            SessionEvent::OperationFailed { .. } => "operation_failed",
            SessionEvent::ValidationFailed { .. } => "validation_failed",
        }
    }
}

/// Broadcast channel carrying session notifications to any number of observers
pub struct NotificationBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl NotificationBus {
    /// Create a new bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers reached. Having nobody listening is
    /// not a failure for a session, so callers normally ignore the error.
    pub fn publish(&self, event: SessionEvent) -> Result<usize, EventBusError> {
        match event.severity() {
            Severity::Error => error!("{}", event.description()),
            Severity::Warning => warn!("{}", event.description()),
            Severity::Success | Severity::Info => info!("{}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for NotificationBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
    /// Accept events at or above the given severity
    MinSeverity(Severity),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &SessionEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::MinSeverity(min) => rank(event.severity()) >= rank(*min),
        }
    }
}

fn rank(severity: Severity) -> u8 {
    match severity {
        Severity::Success | Severity::Info => 0,
        Severity::Warning => 1,
        Severity::Error => 2,
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<SessionEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<SessionEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<SessionEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<SessionEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
