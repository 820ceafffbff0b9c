//! Operations on the `videos` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_timestamp, Database, DatabaseError};
use crate::jobs::VideoStatus;

/// A video row from the database.
#[derive(Debug, Clone)]
pub struct VideoRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub filename: String,
    pub object_key: Option<String>,
    pub status: VideoStatus,
    pub error_log: Option<String>,
    pub process_time: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl VideoRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            filename: row.get("filename")?,
            object_key: row.get("object_key")?,
            status: row.get("status")?,
            error_log: row.get("error_log")?,
            process_time: row.get("process_time")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Fields supplied when a video is first recorded.
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub user_id: i64,
    pub title: String,
    pub filename: String,
}

/// Inserts a video in the `uploaded` state and returns its id.
pub fn insert(db: &Database, video: &NewVideo) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        let now = now_timestamp();
        conn.execute(
            "INSERT INTO videos (user_id, title, filename, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                video.user_id,
                video.title,
                video.filename,
                VideoStatus::Uploaded,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Records the object key the raw file was stored under.
pub fn set_object_key(db: &Database, id: i64, key: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE videos SET object_key = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, key, now_timestamp()],
        )?;
        Ok(())
    })
}

/// Finds a video by its id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<VideoRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM videos WHERE id = ?1",
                params![id],
                VideoRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists a user's videos, newest first.
pub fn list_by_user(db: &Database, user_id: i64) -> Result<Vec<VideoRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM videos WHERE user_id = ?1 ORDER BY id DESC")?;
        let rows = stmt
            .query_map(params![user_id], VideoRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
