use super::directory::CameraDirectory;
use super::job::{ExtractionJob, TickOutcome};
use super::poller::{PollControl, PollRequest, PollSink, ProgressPoller};
use super::tracker::CaptureTracker;
use super::types::{JobPhase, Member, SessionView};
use crate::config::SessionConfig;
use crate::error::{BackendError, Result, SessionError};
use crate::events::{NotificationBus, Operation, SessionEvent};
use crate::remote::{Camera, CaptureOptions, EmbeddingBackend, ProgressSnapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct SessionState {
    directory: CameraDirectory,
    tracker: CaptureTracker,
    selected: Option<u64>,
    job: ExtractionJob,
    /// Bumped whenever the current job is discarded or replaced
    epoch: u64,
    busy: bool,
    disposed: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            directory: CameraDirectory::new(),
            tracker: CaptureTracker::new(),
            selected: None,
            job: ExtractionJob::new(),
            epoch: 0,
            busy: false,
            disposed: false,
        }
    }

    /// Drop the current job; any poller still holding the old epoch goes stale
    fn discard_job(&mut self) {
        self.epoch += 1;
        self.job.reset();
    }

    fn selected_known_camera(&self) -> std::result::Result<u64, SessionError> {
        let camera_id = self.selected.ok_or(SessionError::NoCameraSelected)?;
        self.tracker.ensure_known(camera_id)?;
        Ok(camera_id)
    }

    fn apply_directory(
        &mut self,
        loaded: std::result::Result<Vec<Camera>, &BackendError>,
        keep_flags: bool,
    ) {
        match loaded {
            Ok(cameras) => {
                self.directory.replace(cameras);
                let ids: Vec<u64> = self.directory.ids().collect();
                if keep_flags {
                    self.tracker.reconcile(ids);
                } else {
                    self.tracker.reset(ids);
                }
                let selection_valid = self
                    .selected
                    .map(|camera_id| self.directory.contains(camera_id))
                    .unwrap_or(false);
                if !selection_valid {
                    self.selected = self.directory.first_id();
                }
            }
            Err(_) => {
                self.directory.clear();
                self.tracker.clear();
                self.selected = None;
            }
        }
    }
}

/// Shared between the orchestrator and its progress poller
struct SessionCore {
    session_id: Uuid,
    member: Member,
    state: Mutex<SessionState>,
    bus: NotificationBus,
}

impl SessionCore {
    fn notify(&self, event: SessionEvent) {
        if let Err(e) = self.bus.publish(event) {
            debug!("Session {} notification not delivered: {}", self.session_id, e);
        }
    }

    fn report_failure(&self, operation: Operation, error: &BackendError) {
        warn!("Session {} {:?} failed: {}", self.session_id, operation, error);
        let message = error
            .user_message()
            .unwrap_or_else(|| operation.fallback_failure())
            .to_string();
        self.notify(SessionEvent::OperationFailed {
            operation,
            message,
            timestamp: SystemTime::now(),
        });
    }

    fn reject(&self, error: SessionError) -> SessionError {
        self.notify(SessionEvent::ValidationFailed {
            message: error.to_string(),
            timestamp: SystemTime::now(),
        });
        error
    }
}

impl PollSink for SessionCore {
    fn on_snapshot(&self, generation: u64, snapshot: ProgressSnapshot) -> PollControl {
        let (outcome, camera_id) = {
            let mut state = self.state.lock();
            if state.disposed || state.epoch != generation {
                debug!("Dropping progress from superseded generation {}", generation);
                return PollControl::Stop;
            }
            let Some(camera_id) = state.job.camera_id() else {
                return PollControl::Stop;
            };
            (state.job.apply_snapshot(snapshot), camera_id)
        };

        match outcome {
            TickOutcome::Progress => PollControl::Continue,
            TickOutcome::Ignored => PollControl::Stop,
            TickOutcome::Completed => {
                self.notify(SessionEvent::ExtractionCompleted {
                    member_id: self.member.id,
                    camera_id,
                    timestamp: SystemTime::now(),
                });
                PollControl::Stop
            }
            TickOutcome::Failed(reason) => {
                self.notify(SessionEvent::ExtractionFailed {
                    camera_id,
                    reason,
                    timestamp: SystemTime::now(),
                });
                PollControl::Stop
            }
        }
    }

    fn on_poll_error(&self, generation: u64, error: &BackendError) -> PollControl {
        // Keep the last good snapshot and keep polling
        warn!(
            "Session {} progress poll failed (generation {}): {}",
            self.session_id, generation, error
        );
        PollControl::Continue
    }

    fn on_deadline(&self, generation: u64) {
        let camera_id = {
            let mut state = self.state.lock();
            if state.disposed || state.epoch != generation || !state.job.fail() {
                return;
            }
            state.job.camera_id()
        };

        if let Some(camera_id) = camera_id {
            self.notify(SessionEvent::ExtractionFailed {
                camera_id,
                reason: "no completion reported before the poll deadline".to_string(),
                timestamp: SystemTime::now(),
            });
        }
    }
}

/// Clears the in-flight flag when a gated operation ends
struct BusyGuard<'a> {
    core: &'a SessionCore,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.core.state.lock().busy = false;
    }
}

/// Drives capture and extraction for one member.
///
/// One instance per open session. Start, stop, extract, remove and reload
/// share a single in-flight gate; camera selection and disposal are always
/// accepted and take effect immediately.
pub struct SessionOrchestrator {
    core: Arc<SessionCore>,
    backend: Arc<dyn EmbeddingBackend>,
    settings: SessionConfig,
    poller: Mutex<Option<ProgressPoller>>,
}

impl SessionOrchestrator {
    /// Open a session and load the camera directory.
    ///
    /// A failed directory load leaves the session open with no cameras.
    pub async fn open(
        member: Member,
        backend: Arc<dyn EmbeddingBackend>,
        settings: SessionConfig,
        bus: NotificationBus,
    ) -> Self {
        let session_id = Uuid::new_v4();
        info!(
            "Opening embedding session {} for {} ({})",
            session_id,
            member.display_name(),
            member.id
        );

        let orchestrator = Self {
            core: Arc::new(SessionCore {
                session_id,
                member,
                state: Mutex::new(SessionState::new()),
                bus,
            }),
            backend,
            settings,
            poller: Mutex::new(None),
        };

        let loaded = CameraDirectory::fetch(orchestrator.backend.as_ref()).await;
        if let Err(e) = &loaded {
            orchestrator.core.report_failure(Operation::LoadCameras, e);
        }
        orchestrator
            .core
            .state
            .lock()
            .apply_directory(loaded.as_ref().cloned(), false);

        orchestrator
    }

    pub fn session_id(&self) -> Uuid {
        self.core.session_id
    }

    pub fn member(&self) -> &Member {
        &self.core.member
    }

    pub fn notifications(&self) -> &NotificationBus {
        &self.core.bus
    }

    pub fn selected_camera(&self) -> Option<u64> {
        self.core.state.lock().selected
    }

    pub fn phase(&self) -> JobPhase {
        self.core.state.lock().job.phase()
    }

    pub fn is_collecting(&self, camera_id: u64) -> bool {
        self.core.state.lock().tracker.is_collecting(camera_id)
    }

    pub fn is_busy(&self) -> bool {
        self.core.state.lock().busy
    }

    pub fn is_disposed(&self) -> bool {
        self.core.state.lock().disposed
    }

    /// Whether a progress poller is currently running
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .map(ProgressPoller::is_active)
            .unwrap_or(false)
    }

    /// Detached snapshot of everything a renderer needs
    pub fn view(&self) -> SessionView {
        let state = self.core.state.lock();
        SessionView {
            member: self.core.member.clone(),
            cameras: state.directory.cameras().to_vec(),
            cameras_loaded_at: state.directory.loaded_at(),
            selected: state.selected,
            collecting: state.tracker.snapshot(),
            phase: state.job.phase(),
            last_snapshot: state.job.last_snapshot().cloned(),
            busy: state.busy,
            closed: state.disposed,
        }
    }

    /// Change the selected camera, discarding the current extraction job
    pub fn select_camera(&self, camera_id: u64) -> Result<()> {
        {
            let mut state = self.core.state.lock();
            if state.disposed {
                drop(state);
                return Err(self.core.reject(SessionError::Disposed).into());
            }
            if !state.directory.contains(camera_id) {
                drop(state);
                return Err(self
                    .core
                    .reject(SessionError::UnknownCamera { camera_id })
                    .into());
            }
            if state.selected == Some(camera_id) {
                return Ok(());
            }

            debug!(
                "Session {} selecting camera {} (was {:?})",
                self.core.session_id, camera_id, state.selected
            );
            state.discard_job();
            state.selected = Some(camera_id);
        }

        self.cancel_poller();
        Ok(())
    }

    /// Ask the backend to begin collecting samples on the selected camera
    pub async fn start(&self) -> Result<String> {
        let (_guard, camera_id) = self.begin_operation(|state| {
            let camera_id = state.selected.ok_or(SessionError::NoCameraSelected)?;
            state.tracker.ensure_can_start(camera_id)?;
            Ok(camera_id)
        })?;

        let options = CaptureOptions {
            show_viewer: self.settings.show_viewer,
            clear_existing: self.settings.clear_existing,
        };

        match self
            .backend
            .begin_capture(self.core.member.id, &[camera_id], options)
            .await
        {
            Ok(ack) => {
                self.core.state.lock().tracker.mark(camera_id, true);
                let message = ack.message_or("Collection started");
                self.core.notify(SessionEvent::CaptureStarted {
                    camera_id,
                    message: message.clone(),
                    timestamp: SystemTime::now(),
                });
                Ok(message)
            }
            Err(e) => {
                self.core.report_failure(Operation::StartCapture, &e);
                Err(e.into())
            }
        }
    }

    /// Ask the backend to stop collecting on the selected camera
    pub async fn stop(&self) -> Result<String> {
        let (_guard, camera_id) = self.begin_operation(SessionState::selected_known_camera)?;

        match self.backend.end_capture(&self.settings.stop_reason).await {
            Ok(ack) => {
                self.core.state.lock().tracker.mark(camera_id, false);
                let message = ack.message_or("Collection stopped");
                self.core.notify(SessionEvent::CaptureStopped {
                    camera_id,
                    message: message.clone(),
                    timestamp: SystemTime::now(),
                });
                Ok(message)
            }
            Err(e) => {
                self.core.report_failure(Operation::StopCapture, &e);
                Err(e.into())
            }
        }
    }

    /// Request extraction for the selected camera and start observing progress.
    ///
    /// Any acknowledged status proceeds to polling. A previous attempt, finished
    /// or not, is replaced.
    pub async fn extract(&self) -> Result<String> {
        let (_guard, (camera_id, epoch_before)) = self
            .begin_operation(|state| Ok((state.selected_known_camera()?, state.epoch)))?;

        let ack = match self
            .backend
            .begin_extraction(self.core.member.id, &[camera_id])
            .await
        {
            Ok(ack) => ack,
            Err(e) => {
                let discarded = {
                    let mut state = self.core.state.lock();
                    let unchanged = !state.disposed && state.epoch == epoch_before;
                    if unchanged && state.job.phase() != JobPhase::Idle {
                        state.discard_job();
                        true
                    } else {
                        false
                    }
                };
                if discarded {
                    self.cancel_poller();
                }
                self.core.report_failure(Operation::Extract, &e);
                return Err(e.into());
            }
        };

        if !ack.is_recognized() {
            info!(
                "Extraction status '{}' not recognized, polling progress anyway",
                ack.status_label()
            );
        }
        let message = ack.message_or_default();

        {
            let mut slot = self.poller.lock();
            let generation = {
                let mut state = self.core.state.lock();
                if state.disposed || state.selected != Some(camera_id) {
                    None
                } else {
                    state.discard_job();
                    state.job.begin(camera_id);
                    state.job.mark_polling();
                    Some(state.epoch)
                }
            };

            match generation {
                Some(generation) => {
                    if let Some(previous) = slot.take() {
                        previous.cancel();
                    }
                    let request = PollRequest {
                        member_id: self.core.member.id,
                        camera_id,
                        generation,
                        interval: self.settings.poll_interval(),
                        deadline: self.settings.max_poll_duration(),
                    };
                    let sink: Arc<dyn PollSink> = self.core.clone();
                    *slot = Some(ProgressPoller::start(self.backend.clone(), sink, request));
                }
                None => debug!(
                    "Session {} moved away from camera {} during extract, not polling",
                    self.core.session_id, camera_id
                ),
            }
        }

        self.core.notify(SessionEvent::ExtractionStarted {
            camera_id,
            status: ack.status_label().to_string(),
            message: message.clone(),
            timestamp: SystemTime::now(),
        });
        Ok(message)
    }

    /// Delete stored embeddings for the selected camera.
    ///
    /// On success the camera is no longer collecting and, if it is still
    /// selected, the extraction job is discarded.
    pub async fn remove(&self) -> Result<String> {
        let (_guard, camera_id) = self.begin_operation(SessionState::selected_known_camera)?;

        match self
            .backend
            .remove_embeddings(self.core.member.id, camera_id)
            .await
        {
            Ok(ack) => {
                let discarded = {
                    let mut state = self.core.state.lock();
                    state.tracker.mark(camera_id, false);
                    if !state.disposed && state.selected == Some(camera_id) {
                        state.discard_job();
                        true
                    } else {
                        false
                    }
                };
                if discarded {
                    self.cancel_poller();
                }

                let message = ack.message_or("Embeddings removed");
                self.core.notify(SessionEvent::EmbeddingsRemoved {
                    camera_id,
                    message: message.clone(),
                    timestamp: SystemTime::now(),
                });
                Ok(message)
            }
            Err(e) => {
                self.core.report_failure(Operation::Remove, &e);
                Err(e.into())
            }
        }
    }

    /// Reload the camera directory inside a live session.
    ///
    /// Flags survive for cameras that are still listed. A failed load empties
    /// the directory, as on open.
    pub async fn reload_cameras(&self) -> Result<usize> {
        let (_guard, ()) = self.begin_operation(|_| Ok(()))?;

        let loaded = CameraDirectory::fetch(self.backend.as_ref()).await;
        let count = {
            let mut state = self.core.state.lock();
            if state.disposed {
                drop(state);
                return Err(self.core.reject(SessionError::Disposed).into());
            }
            state.discard_job();
            state.apply_directory(loaded.as_ref().cloned(), true);
            state.directory.cameras().len()
        };
        self.cancel_poller();

        match loaded {
            Ok(_) => {
                info!(
                    "Session {} reloaded {} cameras",
                    self.core.session_id, count
                );
                Ok(count)
            }
            Err(e) => {
                self.core.report_failure(Operation::LoadCameras, &e);
                Err(e.into())
            }
        }
    }

    /// Close the session. Safe to call more than once.
    pub fn dispose(&self) {
        {
            let mut state = self.core.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.discard_job();
            state.directory.clear();
            state.tracker.clear();
            state.selected = None;
        }

        self.cancel_poller();
        info!("Closed embedding session {}", self.core.session_id);
    }

    fn cancel_poller(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.cancel();
        }
    }

    /// Take the in-flight gate after checking the operation's preconditions.
    ///
    /// Rejections are published as validation notifications.
    fn begin_operation<T>(
        &self,
        check: impl FnOnce(&SessionState) -> std::result::Result<T, SessionError>,
    ) -> std::result::Result<(BusyGuard<'_>, T), SessionError> {
        let checked = {
            let mut state = self.core.state.lock();
            let checked = if state.disposed {
                Err(SessionError::Disposed)
            } else if state.busy {
                Err(SessionError::Busy)
            } else {
                check(&*state)
            };
            if checked.is_ok() {
                state.busy = true;
            }
            checked
        };

        match checked {
            Ok(value) => Ok((BusyGuard { core: &self.core }, value)),
            Err(e) => {
                debug!("Session {} rejected operation: {}", self.core.session_id, e);
                Err(self.core.reject(e))
            }
        }
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.dispose();
    }
}
