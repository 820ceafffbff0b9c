//! Work progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::jobs::WorkStatus;

/// Step of the pipeline a work is in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkPhase {
    Queued,
    Fetching,
    Training,
    Resolving,
    Uploading,
    Completed,
    Failed,
}

impl std::fmt::Display for WorkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkPhase::Queued => write!(f, "Queued"),
            WorkPhase::Fetching => write!(f, "Fetching source video"),
            WorkPhase::Training => write!(f, "Training"),
            WorkPhase::Resolving => write!(f, "Resolving artifact"),
            WorkPhase::Uploading => write!(f, "Uploading artifact"),
            WorkPhase::Completed => write!(f, "Completed"),
            WorkPhase::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkProgressEvent {
    pub work_id: i64,
    pub phase: WorkPhase,
    /// Persisted status at the time of the event.
    pub status: WorkStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Raw stdout line from an external tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkProgressEvent {
    pub fn new(work_id: i64, phase: WorkPhase, status: WorkStatus, message: &str) -> Self {
        Self {
            work_id,
            phase,
            status,
            message: message.to_string(),
            timestamp: Utc::now(),
            line: None,
            output_dir: None,
            artifact_key: None,
            error: None,
        }
    }

    /// Whether this is the last event for its work.
    pub fn is_final(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Broadcasts work progress events to any number of subscribers.
#[derive(Clone)]
pub struct WorkProgressBroadcaster {
    sender: Arc<broadcast::Sender<WorkProgressEvent>>,
}

impl WorkProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: WorkProgressEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkProgressEvent> {
        self.sender.subscribe()
    }

    pub fn tracker(&self, work_id: i64) -> WorkProgressTracker {
        WorkProgressTracker {
            work_id,
            sender: Arc::clone(&self.sender),
        }
    }
}

impl Default for WorkProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Emits events for a single work.
#[derive(Clone)]
pub struct WorkProgressTracker {
    work_id: i64,
    sender: Arc<broadcast::Sender<WorkProgressEvent>>,
}

impl WorkProgressTracker {
    pub fn work_id(&self) -> i64 {
        self.work_id
    }

    pub fn update_phase(&self, phase: WorkPhase, message: &str) {
        self.emit(WorkProgressEvent::new(
            self.work_id,
            phase,
            WorkStatus::Processing,
            message,
        ));
    }

    pub fn output_line(&self, phase: WorkPhase, line: &str) {
        let mut event = WorkProgressEvent::new(self.work_id, phase, WorkStatus::Processing, "");
        event.line = Some(line.to_string());
        self.emit(event);
    }

    pub fn output_dir(&self, dir: &str) {
        let mut event = WorkProgressEvent::new(
            self.work_id,
            WorkPhase::Training,
            WorkStatus::Processing,
            "Trainer reported output folder",
        );
        event.output_dir = Some(dir.to_string());
        self.emit(event);
    }

    pub fn completed(&self, artifact_key: &str) {
        let mut event = WorkProgressEvent::new(
            self.work_id,
            WorkPhase::Completed,
            WorkStatus::Completed,
            "Work completed",
        );
        event.artifact_key = Some(artifact_key.to_string());
        self.emit(event);
    }

    pub fn failed(&self, status: WorkStatus, error: &str) {
        let mut event = WorkProgressEvent::new(self.work_id, WorkPhase::Failed, status, "Work failed");
        event.error = Some(error.to_string());
        self.emit(event);
    }

    fn emit(&self, event: WorkProgressEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tracker_events_reach_subscribers() {
        let broadcaster = WorkProgressBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        let tracker = broadcaster.tracker(7);

        tracker.update_phase(WorkPhase::Training, "Training started");
        tracker.output_line(WorkPhase::Training, "iteration 100");
        tracker.completed("work7.splat");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.work_id, 7);
        assert_eq!(first.phase, WorkPhase::Training);
        assert!(!first.is_final());

        let line = rx.recv().await.unwrap();
        assert_eq!(line.line.as_deref(), Some("iteration 100"));

        let done = rx.recv().await.unwrap();
        assert!(done.is_final());
        assert_eq!(done.artifact_key.as_deref(), Some("work7.splat"));
    }

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = WorkProgressBroadcaster::default();
        broadcaster.tracker(1).failed(WorkStatus::ProcessFailed, "boom");
    }

    #[test]
    fn test_event_serialization() {
        let mut event =
            WorkProgressEvent::new(3, WorkPhase::Failed, WorkStatus::SplatFailed, "Work failed");
        event.error = Some("no precursor".into());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["workId"], 3);
        assert_eq!(json["status"], "splat_failed");
        assert_eq!(json["phase"], "failed");
        assert!(json.get("line").is_none());
    }
}
