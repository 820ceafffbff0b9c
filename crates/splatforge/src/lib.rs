pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod resolver;
pub mod sanitize;
pub mod secrets;
pub mod service;
pub mod store;
pub mod worker;

pub use broadcast::{WorkPhase, WorkProgressBroadcaster, WorkProgressEvent};
pub use config::{load_config, AppConfig};
pub use error::{Result, SplatforgeError};
pub use jobs::{ClaimOutcome, JobStateMachine, Outcome, TransitionError, VideoStatus, WorkStatus};
pub use pipeline::{Coordinator, PipelineError};
pub use process::{Invocation, PathConstraint, ProcessError, ProcessRunner, RunOutput};
pub use resolver::{ArtifactResolver, ResolveError};
pub use service::PipelineService;
pub use store::{ArtifactKind, ArtifactStore, ObjectStore, StagedObject, StoreError};
pub use worker::{JobDispatcher, JobHandle};
