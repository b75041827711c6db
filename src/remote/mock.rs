use super::backend::EmbeddingBackend;
use super::types::{Acknowledgement, Camera, CaptureOptions, ExtractionAck, ProgressSnapshot};
use crate::error::BackendError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

/// Remote operations a [`MockBackend`] can be scripted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    ListCameras,
    BeginCapture,
    EndCapture,
    BeginExtraction,
    FetchProgress,
    RemoveEmbeddings,
}

/// A request observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ListCameras,
    BeginCapture {
        member_id: u64,
        camera_ids: Vec<u64>,
        options: CaptureOptions,
    },
    EndCapture {
        reason: String,
    },
    BeginExtraction {
        member_id: u64,
        camera_ids: Vec<u64>,
    },
    FetchProgress {
        member_id: u64,
        camera_id: u64,
    },
    RemoveEmbeddings {
        member_id: u64,
        camera_id: u64,
    },
}

impl MockCall {
    pub fn op(&self) -> MockOp {
        match self {
            MockCall::ListCameras => MockOp::ListCameras,
            MockCall::BeginCapture { .. } => MockOp::BeginCapture,
            MockCall::EndCapture { .. } => MockOp::EndCapture,
            MockCall::BeginExtraction { .. } => MockOp::BeginExtraction,
            MockCall::FetchProgress { .. } => MockOp::FetchProgress,
            MockCall::RemoveEmbeddings { .. } => MockOp::RemoveEmbeddings,
        }
    }
}

struct MockState {
    cameras: Vec<Camera>,
    extraction_status: String,
    progress: VecDeque<Result<ProgressSnapshot, BackendError>>,
    /// Replayed into `progress` by every accepted begin-extraction call
    extraction_script: Vec<ProgressSnapshot>,
    failures: HashMap<MockOp, VecDeque<BackendError>>,
    latency: HashMap<MockOp, Duration>,
    calls: Vec<MockCall>,
}

/// Scripted in-memory embedding backend
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    /// Create a mock serving the given camera directory
    pub fn new(cameras: Vec<Camera>) -> Self {
        Self {
            state: Mutex::new(MockState {
                cameras,
                extraction_status: "started".to_string(),
                progress: VecDeque::new(),
                extraction_script: Vec::new(),
                failures: HashMap::new(),
                latency: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    /// Stand-in backend for running the console without a server
    pub fn demo() -> Self {
        let mock = Self::new(vec![
            Camera::new(1, "Front door"),
            Camera::new(2, "Lobby"),
            Camera::new(3, "Parking"),
        ]);
        mock.set_extraction_script(vec![
            ProgressSnapshot::new("extracting", 20.0),
            ProgressSnapshot::new("extracting", 45.0),
            ProgressSnapshot::new("extracting", 70.0),
            ProgressSnapshot::new("extracting", 90.0),
            ProgressSnapshot::new("done", 100.0),
        ]);
        mock.set_latency(MockOp::BeginCapture, Duration::from_millis(300));
        mock.set_latency(MockOp::BeginExtraction, Duration::from_millis(300));
        mock
    }

    pub fn set_cameras(&self, cameras: Vec<Camera>) {
        self.state.lock().cameras = cameras;
    }

    /// Status string returned by the next begin-extraction calls
    pub fn set_extraction_status<S: Into<String>>(&self, status: S) {
        self.state.lock().extraction_status = status.into();
    }

    /// Queue a progress reading; once the queue drains the feed reports idle 0%
    pub fn push_progress(&self, snapshot: ProgressSnapshot) {
        self.state.lock().progress.push_back(Ok(snapshot));
    }

    /// Progress readings queued afresh each time an extraction is accepted
    pub fn set_extraction_script(&self, script: Vec<ProgressSnapshot>) {
        self.state.lock().extraction_script = script;
    }

    /// Queue a failing progress poll
    pub fn push_progress_failure(&self, error: BackendError) {
        self.state.lock().progress.push_back(Err(error));
    }

    /// Make the next call of `op` fail with `error`
    pub fn fail_next(&self, op: MockOp, error: BackendError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Delay every response of `op` by `delay`
    pub fn set_latency(&self, op: MockOp, delay: Duration) {
        self.state.lock().latency.insert(op, delay);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, op: MockOp) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    /// Number of progress polls issued for one camera
    pub fn progress_polls_for(&self, camera_id: u64) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| {
                matches!(call, MockCall::FetchProgress { camera_id: id, .. } if *id == camera_id)
            })
            .count()
    }

    pub fn transport_error(operation: &str) -> BackendError {
        BackendError::Transport {
            operation: operation.to_string(),
            details: "connection refused".to_string(),
        }
    }

    /// Record the call and take any scripted failure for it
    fn begin(&self, call: MockCall) -> (Option<BackendError>, Duration) {
        let op = call.op();
        debug!("Mock backend received {:?}", call);

        let mut state = self.state.lock();
        state.calls.push(call);
        let failure = state.failures.get_mut(&op).and_then(VecDeque::pop_front);
        let delay = state.latency.get(&op).copied().unwrap_or(Duration::ZERO);
        (failure, delay)
    }

    async fn respond<T>(
        &self,
        call: MockCall,
        ok: impl FnOnce(&mut MockState) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let (failure, delay) = self.begin(call);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(error) => Err(error),
            None => ok(&mut *self.state.lock()),
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingBackend for MockBackend {
    async fn list_cameras(&self) -> Result<Vec<Camera>, BackendError> {
        self.respond(MockCall::ListCameras, |state| Ok(state.cameras.clone()))
            .await
    }

    async fn begin_capture(
        &self,
        member_id: u64,
        camera_ids: &[u64],
        options: CaptureOptions,
    ) -> Result<Acknowledgement, BackendError> {
        let call = MockCall::BeginCapture {
            member_id,
            camera_ids: camera_ids.to_vec(),
            options,
        };
        self.respond(call, |_| {
            Ok(Acknowledgement::with_message(format!(
                "Collection started for member {}",
                member_id
            )))
        })
        .await
    }

    async fn end_capture(&self, reason: &str) -> Result<Acknowledgement, BackendError> {
        let call = MockCall::EndCapture {
            reason: reason.to_string(),
        };
        self.respond(call, |_| Ok(Acknowledgement::default())).await
    }

    async fn begin_extraction(
        &self,
        member_id: u64,
        camera_ids: &[u64],
    ) -> Result<ExtractionAck, BackendError> {
        let call = MockCall::BeginExtraction {
            member_id,
            camera_ids: camera_ids.to_vec(),
        };
        self.respond(call, |state| {
            if !state.extraction_script.is_empty() {
                state.progress = state.extraction_script.iter().cloned().map(Ok).collect();
            }
            Ok(ExtractionAck::new(state.extraction_status.clone(), None))
        })
        .await
    }

    async fn fetch_progress(
        &self,
        member_id: u64,
        camera_id: u64,
    ) -> Result<ProgressSnapshot, BackendError> {
        let call = MockCall::FetchProgress {
            member_id,
            camera_id,
        };
        self.respond(call, |state| {
            state
                .progress
                .pop_front()
                .unwrap_or_else(|| Ok(ProgressSnapshot::new("idle", 0.0)))
                .map(|snapshot| snapshot.for_pair(member_id, camera_id))
        })
        .await
    }

    async fn remove_embeddings(
        &self,
        member_id: u64,
        camera_id: u64,
    ) -> Result<Acknowledgement, BackendError> {
        let call = MockCall::RemoveEmbeddings {
            member_id,
            camera_id,
        };
        self.respond(call, |_| Ok(Acknowledgement::with_message("Embeddings removed")))
            .await
    }

    fn backend_name(&self) -> &str {
        "mock"
    }
}
