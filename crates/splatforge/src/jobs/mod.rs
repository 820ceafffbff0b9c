//! Job lifecycle: status enums and the transactional state machine that
//! is the only writer of work status.

pub mod machine;
pub mod status;

pub use machine::{ClaimOutcome, JobStateMachine, Outcome, TransitionError};
pub use status::{UnknownStatus, VideoStatus, WorkStatus};
