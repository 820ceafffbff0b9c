//! The single writer of work lifecycle fields.
//!
//! Each transition is one short `BEGIN IMMEDIATE` transaction: the write lock
//! is taken before the status is read, so two callers racing on the same row
//! serialize and the loser observes the winner's committed state.

use std::time::Duration;

use rusqlite::{params, OptionalExtension, TransactionBehavior};
use thiserror::Error;

use super::status::{VideoStatus, WorkStatus};
use crate::db::{now_timestamp, Database, DatabaseError};

/// Error detail recorded for canceled works.
pub const CANCELED_DETAIL: &str = "canceled";

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("Work {0} not found")]
    NotFound(i64),

    #[error("Work {id} is already {status}")]
    AlreadyTerminal { id: i64, status: WorkStatus },

    #[error("Illegal transition for work {id}: {from} -> {to}")]
    IllegalTransition {
        id: i64,
        from: WorkStatus,
        to: WorkStatus,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for TransitionError {
    fn from(e: rusqlite::Error) -> Self {
        TransitionError::Database(DatabaseError::Sqlite(e))
    }
}

/// Result of an attempt to move a work into `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// Someone else got there first; nothing was written.
    AlreadyClaimed(WorkStatus),
}

/// How a processing work ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed { status: WorkStatus, error: String },
    Canceled,
}

impl Outcome {
    pub fn failed(status: WorkStatus, error: impl Into<String>) -> Self {
        Outcome::Failed {
            status,
            error: error.into(),
        }
    }

    pub fn status(&self) -> WorkStatus {
        match self {
            Outcome::Completed => WorkStatus::Completed,
            Outcome::Failed { status, .. } => *status,
            Outcome::Canceled => WorkStatus::Canceled,
        }
    }

    fn error_log(&self) -> Option<String> {
        match self {
            Outcome::Completed => None,
            Outcome::Failed { status, error } if error.trim().is_empty() => {
                Some(status.as_str().to_string())
            }
            Outcome::Failed { error, .. } => Some(error.clone()),
            Outcome::Canceled => Some(CANCELED_DETAIL.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct JobStateMachine {
    db: Database,
}

impl JobStateMachine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Moves a work from `uploaded` to `processing`.
    pub fn claim(&self, work_id: i64) -> Result<ClaimOutcome, TransitionError> {
        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = read_status(&tx, work_id)?.ok_or(TransitionError::NotFound(work_id))?;
        if !current.can_transition_to(WorkStatus::Processing) {
            log::debug!("Work {} not claimed, status is {}", work_id, current);
            return Ok(ClaimOutcome::AlreadyClaimed(current));
        }

        tx.execute(
            "UPDATE works SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![work_id, WorkStatus::Processing, now_timestamp()],
        )?;
        tx.commit()?;

        log::info!("Work {} claimed", work_id);
        Ok(ClaimOutcome::Claimed)
    }

    /// Records the terminal state of a processing work.
    ///
    /// `elapsed` is persisted in whole seconds only for states that record a
    /// duration; see [`WorkStatus::records_duration`].
    pub fn finish(
        &self,
        work_id: i64,
        outcome: Outcome,
        elapsed: Duration,
    ) -> Result<WorkStatus, TransitionError> {
        let next = outcome.status();
        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = read_status(&tx, work_id)?.ok_or(TransitionError::NotFound(work_id))?;
        if current.is_terminal() {
            return Err(TransitionError::AlreadyTerminal {
                id: work_id,
                status: current,
            });
        }
        if !current.can_transition_to(next) {
            return Err(TransitionError::IllegalTransition {
                id: work_id,
                from: current,
                to: next,
            });
        }

        let process_time = next
            .records_duration()
            .then(|| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX));

        tx.execute(
            "UPDATE works SET status = ?2, error_log = ?3, process_time = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                work_id,
                next,
                outcome.error_log(),
                process_time,
                now_timestamp()
            ],
        )?;
        tx.commit()?;

        match &outcome {
            Outcome::Completed => log::info!(
                "Work {} completed in {}s",
                work_id,
                process_time.unwrap_or_default()
            ),
            other => log::warn!(
                "Work {} ended as {}: {}",
                work_id,
                next,
                other.error_log().unwrap_or_default()
            ),
        }
        Ok(next)
    }

    /// Marks a video whose raw file could not be stored.
    pub fn fail_video_upload(&self, video_id: i64, error: &str) -> Result<(), TransitionError> {
        let detail = if error.trim().is_empty() {
            VideoStatus::UploadFailed.as_str()
        } else {
            error
        };
        let updated = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE videos SET status = ?2, error_log = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = ?5",
                params![
                    video_id,
                    VideoStatus::UploadFailed,
                    detail,
                    now_timestamp(),
                    VideoStatus::Uploaded
                ],
            )?)
        })?;
        if updated == 0 {
            return Err(TransitionError::NotFound(video_id));
        }
        log::warn!("Video {} upload failed: {}", video_id, detail);
        Ok(())
    }

    /// Current persisted status of a work.
    pub fn status(&self, work_id: i64) -> Result<WorkStatus, TransitionError> {
        let conn = self.db.get()?;
        read_status(&conn, work_id)?.ok_or(TransitionError::NotFound(work_id))
    }
}

fn read_status(
    conn: &rusqlite::Connection,
    work_id: i64,
) -> Result<Option<WorkStatus>, TransitionError> {
    Ok(conn
        .query_row(
            "SELECT status FROM works WHERE id = ?1",
            params![work_id],
            |r| r.get(0),
        )
        .optional()?)
}
