//! Runs each work on its own tokio task, detached from whoever asked for it.
//!
//! Every job gets a child of the dispatcher's root token, so a single job
//! can be canceled by id and `shutdown` cancels all of them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::jobs::WorkStatus;
use crate::pipeline::{Coordinator, PipelineError};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Dispatcher is shut down")]
    ShutDown,

    #[error("Work {0} is already running")]
    AlreadyRunning(i64),

    #[error("No tokio runtime available to run work {0}")]
    NoRuntime(i64),
}

/// A dispatched job. Dropping the handle does not stop the job.
#[derive(Debug)]
pub struct JobHandle {
    work_id: i64,
    token: CancellationToken,
    join: JoinHandle<Result<WorkStatus, PipelineError>>,
}

impl JobHandle {
    pub fn work_id(&self) -> i64 {
        self.work_id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for the job to reach a terminal state.
    pub async fn wait(self) -> crate::Result<WorkStatus> {
        Ok(self.join.await??)
    }
}

type LiveJobs = Arc<Mutex<HashMap<i64, CancellationToken>>>;

pub struct JobDispatcher {
    coordinator: Arc<Coordinator>,
    root: CancellationToken,
    live: LiveJobs,
}

impl JobDispatcher {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            root: CancellationToken::new(),
            live: Arc::default(),
        }
    }

    /// Spawns the pipeline for `work_id` and returns immediately.
    pub fn dispatch(&self, work_id: i64) -> Result<JobHandle, DispatchError> {
        if self.root.is_cancelled() {
            return Err(DispatchError::ShutDown);
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| DispatchError::NoRuntime(work_id))?;

        let token = self.root.child_token();
        {
            let mut live = lock(&self.live);
            if live.contains_key(&work_id) {
                return Err(DispatchError::AlreadyRunning(work_id));
            }
            live.insert(work_id, token.clone());
        }

        let coordinator = Arc::clone(&self.coordinator);
        let live = Arc::clone(&self.live);
        let job_token = token.clone();
        let join = runtime.spawn(async move {
            let result = coordinator.run(work_id, &job_token).await;
            lock(&live).remove(&work_id);
            match &result {
                Ok(status) => debug!(work_id, status = %status, "Job finished"),
                Err(e) => error!(work_id, error = %e, "Job aborted"),
            }
            result
        });

        info!(work_id, "Dispatched work");
        Ok(JobHandle {
            work_id,
            token,
            join,
        })
    }

    /// Cancels a running job. Returns `false` if it is not running.
    pub fn cancel(&self, work_id: i64) -> bool {
        match lock(&self.live).get(&work_id) {
            Some(token) => {
                info!(work_id, "Canceling work");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, work_id: i64) -> bool {
        lock(&self.live).contains_key(&work_id)
    }

    pub fn running(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = lock(&self.live).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Cancels every running job and refuses new ones.
    pub fn shutdown(&self) {
        info!(running = lock(&self.live).len(), "Shutting down dispatcher");
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }
}

fn lock(live: &Mutex<HashMap<i64, CancellationToken>>) -> MutexGuard<'_, HashMap<i64, CancellationToken>> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;
    use crate::db::Database;
    use crate::store::{ArtifactStore, LocalBucket};

    fn dispatcher() -> (tempfile::TempDir, JobDispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(
            load_config_from_str(&format!(
                r#"{{
                    "version": "1.0",
                    "storage": {{ "backend": "local", "bucket": "b", "root": "{root}" }},
                    "paths": {{ "upload_root": "{root}" }},
                    "training": {{ "interpreter": "/bin/sh", "trainer": "/bin/false" }},
                    "conversion": {{ "converter": "/bin/false" }}
                }}"#,
                root = dir.path().display()
            ))
            .unwrap(),
        );
        let store = Arc::new(ArtifactStore::new(
            Arc::new(LocalBucket::new(dir.path(), "b")),
            "b",
            config.staging_dir(),
            1024,
        ));
        let coordinator = Coordinator::new(config, Database::open_in_memory().unwrap(), store);
        (dir, JobDispatcher::new(Arc::new(coordinator)))
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_jobs() {
        let (_dir, dispatcher) = dispatcher();
        dispatcher.shutdown();
        assert!(dispatcher.is_shutdown());
        assert!(matches!(dispatcher.dispatch(1), Err(DispatchError::ShutDown)));
    }

    #[test]
    fn test_dispatch_outside_runtime() {
        let (_dir, dispatcher) = dispatcher();
        assert!(matches!(
            dispatcher.dispatch(1),
            Err(DispatchError::NoRuntime(1))
        ));
        assert!(!dispatcher.is_running(1));
    }

    #[tokio::test]
    async fn test_unknown_work_surfaces_error_and_is_forgotten() {
        let (_dir, dispatcher) = dispatcher();
        let handle = dispatcher.dispatch(99).unwrap();
        assert_eq!(handle.work_id(), 99);
        assert!(handle.wait().await.is_err());
        assert!(!dispatcher.is_running(99));
        assert!(!dispatcher.cancel(99));
    }
}
