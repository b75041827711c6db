mod backend;
mod http;
mod mock;
mod types;

pub use backend::EmbeddingBackend;
pub use http::HttpBackend;
pub use mock::{MockBackend, MockCall, MockOp};
pub use types::{Acknowledgement, Camera, CaptureOptions, ExtractionAck, ProgressSnapshot};
