mod directory;
mod job;
mod orchestrator;
mod poller;
mod tracker;
mod types;

#[cfg(test)]
mod tests;

pub use directory::CameraDirectory;
pub use job::{ExtractionJob, TickOutcome};
pub use orchestrator::SessionOrchestrator;
pub use poller::{PollControl, PollRequest, PollSink, ProgressPoller};
pub use tracker::CaptureTracker;
pub use types::{JobPhase, Member, SessionView};
