use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SplatforgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Storage error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Process error: {0}")]
    Process(#[from] crate::process::ProcessError),

    #[error("Artifact resolution error: {0}")]
    Resolve(#[from] crate::resolver::ResolveError),

    #[error("State transition error: {0}")]
    Transition(#[from] crate::jobs::TransitionError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] crate::worker::DispatchError),

    #[error("Video {0} not found")]
    VideoNotFound(i64),

    #[error("Work {0} not found")]
    WorkNotFound(i64),

    #[error("Work {id} has no artifact yet (status: {status})")]
    ArtifactNotReady { id: i64, status: String },

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to resolve path '{path}': {source}")]
    ResolvePath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SplatforgeError>;
