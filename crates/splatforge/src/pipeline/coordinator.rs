//! Drives one work from `uploaded` to a terminal state.
//!
//! Every status write goes through [`JobStateMachine`]; no database
//! connection is held while an external tool runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::error::PipelineError;
use super::progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
use crate::broadcast::{WorkPhase, WorkProgressBroadcaster};
use crate::config::AppConfig;
use crate::db::work_repo::{self, WorkRow};
use crate::db::{video_repo, Database};
use crate::jobs::{ClaimOutcome, JobStateMachine, Outcome, WorkStatus};
use crate::process::{training_invocation, upload_root_runner, ProcessRunner};
use crate::resolver::ArtifactResolver;
use crate::sanitize::redact_path;
use crate::store::{ArtifactKind, ArtifactStore};

/// Why a step stopped the pipeline.
enum StepFailure {
    Failed { status: WorkStatus, detail: String },
    Canceled,
}

fn failed(status: WorkStatus, detail: impl ToString) -> StepFailure {
    StepFailure::Failed {
        status,
        detail: detail.to_string(),
    }
}

type StepResult<T> = Result<T, StepFailure>;

pub struct Coordinator {
    config: Arc<AppConfig>,
    db: Database,
    machine: JobStateMachine,
    store: Arc<ArtifactStore>,
    runner: ProcessRunner,
    resolver: ArtifactResolver,
    progress: Option<WorkProgressBroadcaster>,
}

impl Coordinator {
    pub fn new(config: Arc<AppConfig>, db: Database, store: Arc<ArtifactStore>) -> Self {
        let runner = upload_root_runner(&config);
        let resolver = ArtifactResolver::new(Arc::clone(&config), runner.clone());
        Self {
            machine: JobStateMachine::new(db.clone()),
            config,
            db,
            store,
            runner,
            resolver,
            progress: None,
        }
    }

    pub fn with_progress(mut self, broadcaster: WorkProgressBroadcaster) -> Self {
        self.progress = Some(broadcaster);
        self
    }

    pub fn state_machine(&self) -> &JobStateMachine {
        &self.machine
    }

    /// Claims `work_id` and runs it to a terminal state.
    ///
    /// Returns the persisted terminal status, or the current status if the
    /// work had already been claimed. Step failures are recorded on the work,
    /// not returned.
    pub async fn run(
        &self,
        work_id: i64,
        cancel: &CancellationToken,
    ) -> Result<WorkStatus, PipelineError> {
        self.run_inner(work_id, cancel)
            .instrument(info_span!("work", work_id))
            .await
    }

    async fn run_inner(
        &self,
        work_id: i64,
        cancel: &CancellationToken,
    ) -> Result<WorkStatus, PipelineError> {
        let machine = self.machine.clone();
        let claimed = tokio::task::spawn_blocking(move || machine.claim(work_id)).await??;
        if let ClaimOutcome::AlreadyClaimed(status) = claimed {
            info!(status = %status, "Work already claimed, skipping");
            return Ok(status);
        }

        let started = Instant::now();
        let reporter = self.reporter(work_id);

        let (outcome, artifact_key) = match self.execute(work_id, cancel, reporter.as_ref()).await
        {
            Ok(artifact_key) => (Outcome::Completed, Some(artifact_key)),
            Err(StepFailure::Canceled) => (Outcome::Canceled, None),
            Err(StepFailure::Failed { status, detail }) => (Outcome::failed(status, detail), None),
        };
        let error = match &outcome {
            Outcome::Failed { error, .. } => error.clone(),
            Outcome::Canceled => crate::jobs::machine::CANCELED_DETAIL.to_string(),
            Outcome::Completed => String::new(),
        };

        let elapsed = started.elapsed();
        let machine = self.machine.clone();
        let status =
            tokio::task::spawn_blocking(move || machine.finish(work_id, outcome, elapsed)).await??;

        // Terminal events only ever carry a committed status.
        match artifact_key {
            Some(artifact_key) if status == WorkStatus::Completed => {
                reporter.report(ProgressEvent::Completed {
                    artifact_key: &artifact_key,
                })
            }
            _ => reporter.report(ProgressEvent::Failed {
                status,
                error: &error,
            }),
        }
        Ok(status)
    }

    async fn execute(
        &self,
        work_id: i64,
        cancel: &CancellationToken,
        reporter: &dyn ProgressReporter,
    ) -> StepResult<String> {
        let work = self.load_work(work_id).await?;
        let video_id = work
            .video_id
            .ok_or_else(|| failed(WorkStatus::ProcessFailed, "work has no source video"))?;
        let video_key = self.video_key(video_id).await?;

        reporter.report(ProgressEvent::Phase {
            phase: WorkPhase::Fetching,
            message: "Fetching source video",
        });
        let staged = self
            .store
            .get(&video_key)
            .await
            .map_err(|e| failed(WorkStatus::ProcessFailed, e))?;
        check_cancel(cancel)?;

        reporter.report(ProgressEvent::Phase {
            phase: WorkPhase::Training,
            message: "Training started",
        });
        let training_lines = |line: &str| {
            reporter.report(ProgressEvent::Line {
                phase: WorkPhase::Training,
                line,
            })
        };
        let invocation = training_invocation(&self.config, staged.path(), work.iterations);
        let trained = self
            .runner
            .run(&invocation, cancel, Some(&training_lines))
            .await
            .map_err(|e| {
                if e.is_canceled() {
                    StepFailure::Canceled
                } else {
                    failed(WorkStatus::ProcessFailed, e)
                }
            })?;
        if let Err(e) = staged.close() {
            warn!(error = %e, "Failed to remove staged video");
        }

        let marker_found = trained.marker_found;
        let raw_output = trained
            .output_dir
            .ok_or_else(|| failed(WorkStatus::ProcessFailed, "trainer reported no output folder"))?;
        let raw_output = raw_output.to_string_lossy().into_owned();
        self.record_output_dir(work_id, &raw_output).await?;
        reporter.report(ProgressEvent::OutputDir(&raw_output));
        let output_root = self.output_root(Path::new(&raw_output));

        check_cancel(cancel)?;
        reporter.report(ProgressEvent::Phase {
            phase: WorkPhase::Resolving,
            message: "Resolving servable artifact",
        });
        let conversion_lines = |line: &str| {
            reporter.report(ProgressEvent::Line {
                phase: WorkPhase::Resolving,
                line,
            })
        };
        let resolved = self
            .resolver
            .resolve(
                &output_root,
                Some(work.iterations),
                cancel,
                Some(&conversion_lines),
            )
            .await
            .map_err(|e| {
                if e.is_canceled() {
                    StepFailure::Canceled
                } else {
                    failed(WorkStatus::SplatFailed, e)
                }
            })?;
        debug!(artifact = %redact_path(&resolved.path), converted = resolved.converted, "Resolved artifact");

        check_cancel(cancel)?;
        reporter.report(ProgressEvent::Phase {
            phase: WorkPhase::Uploading,
            message: "Uploading artifact",
        });
        let artifact_key = ArtifactKind::work_key(work_id);
        self.store
            .put_file(&artifact_key, &resolved.path)
            .await
            .map_err(|e| failed(WorkStatus::UploadFailed, e))?;
        self.record_artifact_key(work_id, &artifact_key).await?;

        if !self.config.pipeline.retain_outputs {
            self.remove_output_root(&output_root, marker_found).await;
        }

        info!(key = %artifact_key, "Artifact uploaded");
        Ok(artifact_key)
    }

    fn reporter(&self, work_id: i64) -> Box<dyn ProgressReporter> {
        match &self.progress {
            Some(broadcaster) => Box::new(BroadcastProgress::new(broadcaster.tracker(work_id))),
            None => Box::new(NoopProgress),
        }
    }

    /// Removes a work's own output root. The default output dir is shared
    /// between works and is never removed.
    async fn remove_output_root(&self, output_root: &Path, marker_found: bool) {
        let shared = self.output_root(&self.config.training.default_output_dir);
        if !marker_found || output_root == shared {
            debug!(root = %redact_path(output_root), "Keeping shared output root");
            return;
        }
        if let Err(e) = tokio::fs::remove_dir_all(output_root).await {
            warn!(error = %e, "Failed to remove output root");
        }
    }

    /// Relative markers are relative to the trainer's working directory.
    fn output_root(&self, raw: &Path) -> PathBuf {
        if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.config.training_working_dir().join(raw)
        }
    }

    async fn load_work(&self, work_id: i64) -> StepResult<WorkRow> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || work_repo::find_by_id(&db, work_id))
            .await
            .map_err(|e| failed(WorkStatus::ProcessFailed, e))?
            .map_err(|e| failed(WorkStatus::ProcessFailed, e))?
            .ok_or_else(|| failed(WorkStatus::ProcessFailed, format!("work {work_id} vanished")))
    }

    /// Key the video was stored under, falling back to the canonical one.
    async fn video_key(&self, video_id: i64) -> StepResult<String> {
        let db = self.db.clone();
        let video = tokio::task::spawn_blocking(move || video_repo::find_by_id(&db, video_id))
            .await
            .map_err(|e| failed(WorkStatus::ProcessFailed, e))?
            .map_err(|e| failed(WorkStatus::ProcessFailed, e))?
            .ok_or_else(|| failed(WorkStatus::ProcessFailed, format!("video {video_id} not found")))?;
        Ok(video
            .object_key
            .unwrap_or_else(|| ArtifactKind::video_key(video_id)))
    }

    async fn record_output_dir(&self, work_id: i64, dir: &str) -> StepResult<()> {
        let db = self.db.clone();
        let dir = dir.to_string();
        tokio::task::spawn_blocking(move || work_repo::set_output_dir(&db, work_id, &dir))
            .await
            .map_err(|e| failed(WorkStatus::SplatFailed, e))?
            .map_err(|e| failed(WorkStatus::SplatFailed, e))
    }

    async fn record_artifact_key(&self, work_id: i64, key: &str) -> StepResult<()> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || work_repo::set_artifact_key(&db, work_id, &key))
            .await
            .map_err(|e| failed(WorkStatus::UploadFailed, e))?
            .map_err(|e| failed(WorkStatus::UploadFailed, e))
    }
}

fn check_cancel(cancel: &CancellationToken) -> StepResult<()> {
    if cancel.is_cancelled() {
        Err(StepFailure::Canceled)
    } else {
        Ok(())
    }
}
