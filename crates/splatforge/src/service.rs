//! Entry points a front end (CLI, HTTP handlers) calls.
//!
//! Requests return as soon as the bookkeeping is committed; training runs
//! on the dispatcher.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncRead;
use tracing::{info, warn};

use crate::broadcast::WorkProgressBroadcaster;
use crate::config::AppConfig;
use crate::db::video_repo::{self, NewVideo, VideoRow};
use crate::db::work_repo::{self, NewWork, WorkRow};
use crate::db::Database;
use crate::error::{Result, SplatforgeError};
use crate::jobs::{ClaimOutcome, JobStateMachine, Outcome, WorkStatus};
use crate::pipeline::Coordinator;
use crate::store::{ArtifactKind, ArtifactStore, StagedObject, StoreError};
use crate::worker::{JobDispatcher, JobHandle};

/// What a status poll returns.
#[derive(Debug, Clone, Serialize)]
pub struct WorkStatusReport {
    pub work_id: i64,
    pub status: WorkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    /// Set once the work is completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_key: Option<String>,
}

impl From<WorkRow> for WorkStatusReport {
    fn from(row: WorkRow) -> Self {
        let artifact_key = match row.status {
            WorkStatus::Completed => row.artifact_key,
            _ => None,
        };
        Self {
            work_id: row.id,
            status: row.status,
            error_log: row.error_log,
            process_time: row.process_time,
            output_dir: row.output_dir,
            artifact_key,
        }
    }
}

pub struct PipelineService {
    config: Arc<AppConfig>,
    db: Database,
    store: Arc<ArtifactStore>,
    machine: JobStateMachine,
    dispatcher: JobDispatcher,
    progress: WorkProgressBroadcaster,
}

impl PipelineService {
    /// Opens the database and the configured artifact store.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let db = Database::open(&config.database)?;
        let store = ArtifactStore::from_config(&config)?;
        Ok(Self::new(Arc::new(config), db, Arc::new(store)))
    }

    pub fn new(config: Arc<AppConfig>, db: Database, store: Arc<ArtifactStore>) -> Self {
        let progress = WorkProgressBroadcaster::new(config.pipeline.progress_capacity);
        let coordinator = Coordinator::new(Arc::clone(&config), db.clone(), Arc::clone(&store))
            .with_progress(progress.clone());
        Self {
            machine: JobStateMachine::new(db.clone()),
            dispatcher: JobDispatcher::new(Arc::new(coordinator)),
            config,
            db,
            store,
            progress,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn progress(&self) -> &WorkProgressBroadcaster {
        &self.progress
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    /// Records a video and stores its raw file under `video<id>.mp4`.
    ///
    /// A store failure leaves the video in `upload_failed` and is returned.
    pub async fn upload_video<R>(
        &self,
        user_id: i64,
        title: &str,
        filename: &str,
        reader: R,
        size: Option<u64>,
    ) -> Result<i64>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        if ArtifactKind::from_name(filename) != Some(ArtifactKind::Video) {
            return Err(StoreError::UnsupportedFormat {
                key: filename.to_string(),
            }
            .into());
        }

        let new_video = NewVideo {
            user_id,
            title: title.to_string(),
            filename: filename.to_string(),
        };
        let video_id = self
            .blocking(move |db| video_repo::insert(&db, &new_video))
            .await?;

        let key = ArtifactKind::video_key(video_id);
        if let Err(e) = self.store.put(&key, reader, size).await {
            let machine = self.machine.clone();
            let detail = e.to_string();
            tokio::task::spawn_blocking(move || machine.fail_video_upload(video_id, &detail))
                .await??;
            return Err(e.into());
        }

        let stored_key = key.clone();
        self.blocking(move |db| video_repo::set_object_key(&db, video_id, &stored_key))
            .await?;
        info!(video_id, key = %key, "Video uploaded");
        Ok(video_id)
    }

    /// Uploads a local video file.
    pub async fn upload_video_file(&self, user_id: i64, title: &str, path: &Path) -> Result<i64> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| StoreError::Staging {
                op: "open",
                key: filename.clone(),
                path: path.to_path_buf(),
                source,
            })?;
        let size = file.metadata().await.ok().map(|m| m.len());
        self.upload_video(user_id, title, &filename, file, size)
            .await
    }

    /// Creates a work for a stored video and dispatches it. Returns as soon
    /// as the work row exists.
    pub async fn start_work(
        &self,
        user_id: i64,
        video_id: i64,
        name: &str,
        iterations: Option<u32>,
    ) -> Result<JobHandle> {
        let video = self
            .blocking(move |db| video_repo::find_by_id(&db, video_id))
            .await?
            .ok_or(SplatforgeError::VideoNotFound(video_id))?;
        if video.status != crate::jobs::VideoStatus::Uploaded || video.object_key.is_none() {
            return Err(SplatforgeError::VideoNotFound(video_id));
        }

        let new_work = NewWork {
            user_id,
            video_id: Some(video_id),
            name: name.to_string(),
            iterations: iterations
                .filter(|n| *n > 0)
                .unwrap_or(self.config.training.default_iterations),
        };
        let work_id = self
            .blocking(move |db| work_repo::insert(&db, &new_work))
            .await?;

        let handle = self.dispatcher.dispatch(work_id)?;
        info!(work_id, video_id, "Work started");
        Ok(handle)
    }

    /// Registers an already produced `.splat` as a completed work.
    pub async fn import_work<R>(
        &self,
        user_id: i64,
        name: &str,
        reader: R,
        size: Option<u64>,
    ) -> Result<i64>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let new_work = NewWork {
            user_id,
            video_id: None,
            name: name.to_string(),
            iterations: 0,
        };
        let work_id = self
            .blocking(move |db| work_repo::insert(&db, &new_work))
            .await?;

        let machine = self.machine.clone();
        let claimed = tokio::task::spawn_blocking(move || machine.claim(work_id)).await??;
        if claimed != ClaimOutcome::Claimed {
            return Err(SplatforgeError::WorkNotFound(work_id));
        }

        let key = ArtifactKind::work_key(work_id);
        let outcome = match self.store.put(&key, reader, size).await {
            Ok(()) => {
                let stored_key = key.clone();
                self.blocking(move |db| work_repo::set_artifact_key(&db, work_id, &stored_key))
                    .await?;
                Outcome::Completed
            }
            Err(e) => {
                warn!(work_id, error = %e, "Import upload failed");
                Outcome::failed(WorkStatus::UploadFailed, e.to_string())
            }
        };

        let machine = self.machine.clone();
        let status =
            tokio::task::spawn_blocking(move || machine.finish(work_id, outcome, Duration::ZERO))
                .await??;
        if status != WorkStatus::Completed {
            return Err(SplatforgeError::ArtifactNotReady {
                id: work_id,
                status: status.to_string(),
            });
        }
        Ok(work_id)
    }

    pub async fn work_status(&self, work_id: i64) -> Result<WorkStatusReport> {
        let row = self
            .blocking(move |db| work_repo::find_by_id(&db, work_id))
            .await?
            .ok_or(SplatforgeError::WorkNotFound(work_id))?;
        Ok(row.into())
    }

    /// Stages a completed work's artifact locally.
    pub async fn fetch_artifact(&self, work_id: i64) -> Result<StagedObject> {
        let report = self.work_status(work_id).await?;
        let key = report
            .artifact_key
            .ok_or_else(|| SplatforgeError::ArtifactNotReady {
                id: work_id,
                status: report.status.to_string(),
            })?;
        Ok(self.store.get(&key).await?)
    }

    pub async fn list_videos(&self, user_id: i64) -> Result<Vec<VideoRow>> {
        self.blocking(move |db| video_repo::list_by_user(&db, user_id))
            .await
    }

    pub async fn list_works(&self, user_id: i64) -> Result<Vec<WorkRow>> {
        self.blocking(move |db| work_repo::list_by_user(&db, user_id))
            .await
    }

    /// Requests cancellation. Returns `false` when the work is not running
    /// in this process.
    pub fn cancel_work(&self, work_id: i64) -> bool {
        self.dispatcher.cancel(work_id)
    }

    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Database) -> std::result::Result<T, crate::db::DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        Ok(tokio::task::spawn_blocking(move || f(db)).await??)
    }
}
