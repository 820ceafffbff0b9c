use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 64 MiB, the multipart part size used for artifact uploads.
pub const DEFAULT_PART_SIZE: u64 = 64 * 1024 * 1024;
/// 4 MiB intermediate buffer for object downloads.
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub paths: PathsConfig,
    pub training: TrainingConfig,
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Directory under which fetched objects are staged.
    ///
    /// Defaults to `<upload_root>/tmp` so that staged videos pass the
    /// trainer's upload-root path constraint.
    pub fn staging_dir(&self) -> PathBuf {
        self.storage
            .staging_dir
            .clone()
            .unwrap_or_else(|| self.paths.upload_root.join("tmp"))
    }

    /// Working directory the trainer runs in. Relative output markers are
    /// resolved against it.
    pub fn training_working_dir(&self) -> PathBuf {
        self.training.working_dir.clone().unwrap_or_else(|| {
            self.training
                .trainer
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }

    /// Interpreter for the converter, falling back to the trainer's.
    pub fn conversion_interpreter(&self) -> &Path {
        self.conversion
            .interpreter
            .as_deref()
            .unwrap_or(&self.training.interpreter)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    /// Upper bound on simultaneously open connections.
    #[serde(default = "default_max_open")]
    pub max_open: usize,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_database_path() -> PathBuf {
    crate::db::default_database_path().unwrap_or_else(|| PathBuf::from("splatforge.db"))
}

fn default_max_open() -> usize {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_open: default_max_open(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Bucket is a directory on the local filesystem.
    Local,
    /// Bucket is served by an S3-style HTTP endpoint (`{endpoint}/{bucket}/{key}`).
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: String,
    /// Root directory for the `local` backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Base URL for the `http` backend.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_part_size")]
    pub part_size: u64,
    #[serde(default = "default_copy_buffer_size")]
    pub copy_buffer_size: usize,
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_copy_buffer_size() -> usize {
    DEFAULT_COPY_BUFFER_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of user-controlled storage. Paths handed to the trainer must
    /// live beneath it.
    pub upload_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub interpreter: PathBuf,
    pub trainer: PathBuf,
    /// Appended to `PYTHONPATH` for the trainer process.
    #[serde(default)]
    pub module_path: Option<PathBuf>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Used when the trainer exits cleanly without printing an output marker.
    #[serde(default = "default_output_dir")]
    pub default_output_dir: PathBuf,
    #[serde(default = "default_iterations")]
    pub default_iterations: u32,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_iterations() -> u32 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    #[serde(default)]
    pub interpreter: Option<PathBuf>,
    pub converter: PathBuf,
    #[serde(default)]
    pub module_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Keep the trainer's output root after the artifact has been uploaded.
    #[serde(default = "default_true")]
    pub retain_outputs: bool,
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_progress_capacity() -> usize {
    256
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retain_outputs: true,
            progress_capacity: default_progress_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}
