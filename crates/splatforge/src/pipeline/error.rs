use thiserror::Error;

/// Failures of the coordinator itself. Step failures (training, conversion,
/// upload) are not errors here; they end up as the work's terminal status.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("State transition failed: {0}")]
    Transition(#[from] crate::jobs::TransitionError),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
