//! Broadcasting of work progress for anything that wants to follow a job
//! live (CLI, a future HTTP layer).

pub mod work_progress;

pub use work_progress::{WorkPhase, WorkProgressBroadcaster, WorkProgressEvent, WorkProgressTracker};
