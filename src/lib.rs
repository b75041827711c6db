pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod remote;
pub mod session;

pub use config::EmbedcamConfig;
pub use console::SessionConsole;
pub use error::{BackendError, EmbedcamError, Result, SessionError};
pub use events::{
    EventFilter, EventReceiver, NotificationBus, Operation, SessionEvent, Severity,
};
pub use remote::{
    Acknowledgement, Camera, CaptureOptions, EmbeddingBackend, ExtractionAck, HttpBackend,
    MockBackend, ProgressSnapshot,
};
pub use session::{JobPhase, Member, SessionOrchestrator, SessionView};
