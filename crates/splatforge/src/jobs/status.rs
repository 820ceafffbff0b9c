//! Lifecycle states for videos and works.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Lifecycle of a reconstruction job.
///
/// ```text
/// uploaded → processing → completed
///                       ↘ process_failed | splat_failed | upload_failed | canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Uploaded,
    Processing,
    Completed,
    ProcessFailed,
    SplatFailed,
    UploadFailed,
    Canceled,
}

impl WorkStatus {
    pub const ALL: [WorkStatus; 7] = [
        WorkStatus::Uploaded,
        WorkStatus::Processing,
        WorkStatus::Completed,
        WorkStatus::ProcessFailed,
        WorkStatus::SplatFailed,
        WorkStatus::UploadFailed,
        WorkStatus::Canceled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkStatus::Uploaded => "uploaded",
            WorkStatus::Processing => "processing",
            WorkStatus::Completed => "completed",
            WorkStatus::ProcessFailed => "process_failed",
            WorkStatus::SplatFailed => "splat_failed",
            WorkStatus::UploadFailed => "upload_failed",
            WorkStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkStatus::Uploaded | WorkStatus::Processing)
    }

    pub fn is_failure(self) -> bool {
        self.is_terminal() && self != WorkStatus::Completed
    }

    /// Whether `process_time` is written when entering this state.
    ///
    /// A training failure carries no duration; every other terminal state
    /// is reached after the job clock started and records it.
    pub fn records_duration(self) -> bool {
        matches!(
            self,
            WorkStatus::Completed
                | WorkStatus::SplatFailed
                | WorkStatus::UploadFailed
                | WorkStatus::Canceled
        )
    }

    /// Edges of the lifecycle graph. Nothing leaves a terminal state.
    pub fn can_transition_to(self, next: WorkStatus) -> bool {
        match self {
            WorkStatus::Uploaded => next == WorkStatus::Processing,
            WorkStatus::Processing => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for WorkStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl ToSql for WorkStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for WorkStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: UnknownStatus| FromSqlError::Other(Box::new(e)))
    }
}

/// Lifecycle of an uploaded source clip.
///
/// Processing states live on works, since one video may feed several
/// concurrently running works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Uploaded,
    UploadFailed,
}

impl VideoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VideoStatus::Uploaded => "uploaded",
            VideoStatus::UploadFailed => "upload_failed",
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(VideoStatus::Uploaded),
            "upload_failed" => Ok(VideoStatus::UploadFailed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl ToSql for VideoStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for VideoStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: UnknownStatus| FromSqlError::Other(Box::new(e)))
    }
}
