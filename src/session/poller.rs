use crate::error::BackendError;
use crate::remote::{EmbeddingBackend, ProgressSnapshot};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Whether the poller should keep going after a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    Continue,
    Stop,
}

/// Receiver of progress readings.
///
/// Every callback carries the generation the poller was created with so the
/// receiver can drop readings that belong to a superseded attempt. Callbacks
/// run synchronously on the poll task and must not cancel the poller that
/// invoked them; returning [`PollControl::Stop`] ends it instead.
pub trait PollSink: Send + Sync {
    fn on_snapshot(&self, generation: u64, snapshot: ProgressSnapshot) -> PollControl;

    fn on_poll_error(&self, generation: u64, error: &BackendError) -> PollControl;

    fn on_deadline(&self, generation: u64);
}

/// What to poll and how often
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub member_id: u64,
    pub camera_id: u64,
    pub generation: u64,
    pub interval: Duration,
    pub deadline: Option<Duration>,
}

/// Repeating progress probe for one (member, camera) pair.
///
/// The first fetch is issued immediately, then one per interval. Fetches never
/// overlap. Once [`ProgressPoller::cancel`] returns no callback will fire,
/// including for a fetch that was already in flight.
pub struct ProgressPoller {
    generation: u64,
    camera_id: u64,
    token: CancellationToken,
    live: Arc<RwLock<bool>>,
    handle: JoinHandle<()>,
}

impl ProgressPoller {
    pub fn start(
        backend: Arc<dyn EmbeddingBackend>,
        sink: Arc<dyn PollSink>,
        request: PollRequest,
    ) -> Self {
        let token = CancellationToken::new();
        let live = Arc::new(RwLock::new(true));

        debug!(
            "Starting progress poller for member {} camera {} (generation {}, every {:?})",
            request.member_id, request.camera_id, request.generation, request.interval
        );

        let handle = tokio::spawn(poll_loop(
            backend,
            sink,
            request.clone(),
            token.clone(),
            live.clone(),
        ));

        Self {
            generation: request.generation,
            camera_id: request.camera_id,
            token,
            live,
            handle,
        }
    }

    /// Stop polling. Blocks until any delivery in progress has finished.
    pub fn cancel(&self) {
        let mut live = self.live.write();
        if *live {
            debug!(
                "Cancelling progress poller for camera {} (generation {})",
                self.camera_id, self.generation
            );
        }
        *live = false;
        self.token.cancel();
    }

    pub fn is_active(&self) -> bool {
        *self.live.read() && !self.handle.is_finished()
    }
}

impl Drop for ProgressPoller {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn poll_loop(
    backend: Arc<dyn EmbeddingBackend>,
    sink: Arc<dyn PollSink>,
    request: PollRequest,
    token: CancellationToken,
    live: Arc<RwLock<bool>>,
) {
    let PollRequest {
        member_id,
        camera_id,
        generation,
        interval,
        deadline,
    } = request;

    // A deadline past the clock's range is the same as none
    let deadline = deadline.and_then(|limit| Instant::now().checked_add(limit));
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = wait_for_deadline(deadline) => {
                let gate = live.read();
                if *gate {
                    warn!(
                        "Progress for camera {} not complete before deadline, giving up",
                        camera_id
                    );
                    sink.on_deadline(generation);
                }
                break;
            }
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = backend.fetch_progress(member_id, camera_id) => result,
        };

        let control = {
            let gate = live.read();
            if !*gate {
                debug!("Discarding progress for camera {} after cancel", camera_id);
                break;
            }
            match result {
                Ok(snapshot) => sink.on_snapshot(generation, snapshot),
                Err(error) => sink.on_poll_error(generation, &error),
            }
        };

        if control == PollControl::Stop {
            break;
        }
    }

    *live.write() = false;
    debug!(
        "Progress poller for camera {} (generation {}) finished",
        camera_id, generation
    );
}
