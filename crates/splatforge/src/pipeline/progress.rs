use crate::broadcast::{WorkPhase, WorkProgressTracker};
use crate::jobs::WorkStatus;

/// Events emitted by the coordinator while it drives a work.
pub enum ProgressEvent<'a> {
    Phase { phase: WorkPhase, message: &'a str },
    /// One stdout line from the trainer or converter.
    Line { phase: WorkPhase, line: &'a str },
    OutputDir(&'a str),
    Completed { artifact_key: &'a str },
    Failed { status: WorkStatus, error: &'a str },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent<'_>);
}

/// Reporter for callers that don't follow progress.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent<'_>) {}
}

/// Bridges coordinator events onto the broadcast channel.
pub struct BroadcastProgress {
    tracker: WorkProgressTracker,
}

impl BroadcastProgress {
    pub fn new(tracker: WorkProgressTracker) -> Self {
        Self { tracker }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent<'_>) {
        match event {
            ProgressEvent::Phase { phase, message } => self.tracker.update_phase(phase, message),
            ProgressEvent::Line { phase, line } => self.tracker.output_line(phase, line),
            ProgressEvent::OutputDir(dir) => self.tracker.output_dir(dir),
            ProgressEvent::Completed { artifact_key } => self.tracker.completed(artifact_key),
            ProgressEvent::Failed { status, error } => self.tracker.failed(status, error),
        }
    }
}
