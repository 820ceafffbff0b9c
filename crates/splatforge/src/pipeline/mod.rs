pub mod coordinator;
pub mod error;
pub mod progress;

pub use coordinator::Coordinator;
pub use error::PipelineError;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
