//! Operations on the `works` table.
//!
//! Status, `error_log` and `process_time` are written only by
//! [`crate::jobs::JobStateMachine`]; nothing here touches them after insert.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_timestamp, Database, DatabaseError};
use crate::jobs::WorkStatus;

/// A work row from the database.
#[derive(Debug, Clone)]
pub struct WorkRow {
    pub id: i64,
    pub user_id: i64,
    pub video_id: Option<i64>,
    pub name: String,
    pub iterations: u32,
    /// Output root reported by the trainer, exactly as reported.
    pub output_dir: Option<String>,
    pub artifact_key: Option<String>,
    pub status: WorkStatus,
    pub error_log: Option<String>,
    /// Whole seconds.
    pub process_time: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl WorkRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            video_id: row.get("video_id")?,
            name: row.get("name")?,
            iterations: row.get("iterations")?,
            output_dir: row.get("output_dir")?,
            artifact_key: row.get("artifact_key")?,
            status: row.get("status")?,
            error_log: row.get("error_log")?,
            process_time: row.get("process_time")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Fields supplied when a work is created.
#[derive(Debug, Clone)]
pub struct NewWork {
    pub user_id: i64,
    /// `None` for works imported from an existing artifact.
    pub video_id: Option<i64>,
    pub name: String,
    pub iterations: u32,
}

/// Inserts a work in the `uploaded` state and returns its id.
pub fn insert(db: &Database, work: &NewWork) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        let now = now_timestamp();
        conn.execute(
            "INSERT INTO works (user_id, video_id, name, iterations, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                work.user_id,
                work.video_id,
                work.name,
                work.iterations,
                WorkStatus::Uploaded,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a work by its id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<WorkRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM works WHERE id = ?1",
                params![id],
                WorkRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists a user's works, newest first.
pub fn list_by_user(db: &Database, user_id: i64) -> Result<Vec<WorkRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM works WHERE user_id = ?1 ORDER BY id DESC")?;
        let rows = stmt
            .query_map(params![user_id], WorkRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists every work derived from a video, oldest first.
pub fn list_by_video(db: &Database, video_id: i64) -> Result<Vec<WorkRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM works WHERE video_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![video_id], WorkRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Records the trainer's output root. Write-once: setting the same value
/// again is a no-op, a different value is rejected.
pub fn set_output_dir(db: &Database, id: i64, output_dir: &str) -> Result<(), DatabaseError> {
    set_once(db, id, "output_dir", output_dir)
}

/// Records the object key the finished artifact was stored under. Write-once.
pub fn set_artifact_key(db: &Database, id: i64, key: &str) -> Result<(), DatabaseError> {
    set_once(db, id, "artifact_key", key)
}

fn set_once(
    db: &Database,
    id: i64,
    column: &'static str,
    value: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            &format!(
                "UPDATE works SET {column} = ?2, updated_at = ?3 WHERE id = ?1 AND {column} IS NULL"
            ),
            params![id, value, now_timestamp()],
        )?;
        if updated == 1 {
            return Ok(());
        }

        let existing: Option<Option<String>> = conn
            .query_row(
                &format!("SELECT {column} FROM works WHERE id = ?1"),
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        match existing {
            Some(Some(current)) if current == value => Ok(()),
            Some(Some(_)) => Err(DatabaseError::AlreadySet {
                table: "works",
                column,
                id,
            }),
            _ => Err(DatabaseError::Sqlite(rusqlite::Error::QueryReturnedNoRows)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::video_repo::{self, NewVideo};

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn seed_video(db: &Database) -> i64 {
        video_repo::insert(
            db,
            &NewVideo {
                user_id: 1,
                title: "t".to_string(),
                filename: "clip.mp4".to_string(),
            },
        )
        .unwrap()
    }

    fn sample(video_id: Option<i64>) -> NewWork {
        NewWork {
            user_id: 1,
            video_id,
            name: "garden".to_string(),
            iterations: 7000,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let video = seed_video(&db);
        let id = insert(&db, &sample(Some(video))).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.status, WorkStatus::Uploaded);
        assert_eq!(found.video_id, Some(video));
        assert_eq!(found.iterations, 7000);
        assert!(found.output_dir.is_none());
        assert!(found.process_time.is_none());
        assert!(found.error_log.is_none());
    }

    #[test]
    fn test_insert_rejects_unknown_video() {
        let db = test_db();
        assert!(insert(&db, &sample(Some(999))).is_err());
    }

    #[test]
    fn test_imported_work_has_no_video() {
        let db = test_db();
        let id = insert(&db, &sample(None)).unwrap();
        assert!(find_by_id(&db, id).unwrap().unwrap().video_id.is_none());
    }

    #[test]
    fn test_list_by_video_allows_several_works() {
        let db = test_db();
        let video = seed_video(&db);
        let a = insert(&db, &sample(Some(video))).unwrap();
        let b = insert(&db, &sample(Some(video))).unwrap();

        let rows = list_by_video(&db, video).unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(list_by_user(&db, 1).unwrap().len(), 2);
    }

    #[test]
    fn test_output_dir_is_write_once() {
        let db = test_db();
        let id = insert(&db, &sample(None)).unwrap();

        set_output_dir(&db, id, "./output/3f2a9c1b7e").unwrap();
        set_output_dir(&db, id, "./output/3f2a9c1b7e").unwrap();
        let err = set_output_dir(&db, id, "./output/ffffffffff").unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::AlreadySet {
                column: "output_dir",
                ..
            }
        ));

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.output_dir.as_deref(), Some("./output/3f2a9c1b7e"));
    }

    #[test]
    fn test_set_output_dir_missing_work() {
        let db = test_db();
        assert!(set_output_dir(&db, 42, "./output/x").is_err());
    }

    #[test]
    fn test_set_artifact_key() {
        let db = test_db();
        let id = insert(&db, &sample(None)).unwrap();
        set_artifact_key(&db, id, "work1.splat").unwrap();
        assert_eq!(
            find_by_id(&db, id).unwrap().unwrap().artifact_key.as_deref(),
            Some("work1.splat")
        );
    }
}
