use std::path::{Component, Path, PathBuf};

use crate::config::schema::{AppConfig, StorageBackend};
use crate::error::ConfigError;

/// Minimum part size accepted by S3-compatible multipart uploads.
const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Loads the config file, applies `SPLATFORGE_*` environment overrides and
/// validates the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config: AppConfig = serde_json::from_str(&content)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    finalize(config)
}

/// Parses and validates a config without consulting the environment.
pub fn load_config_from_str(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_json::from_str(content)?;
    finalize(config)
}

/// Overrides file values with environment variables.
///
/// `lookup` is `std::env::var` in production; tests pass a closure over a map.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(bucket) = lookup("SPLATFORGE_BUCKET") {
        config.storage.bucket = bucket;
    }
    if let Some(endpoint) = lookup("SPLATFORGE_STORE_ENDPOINT") {
        config.storage.endpoint = Some(endpoint);
    }
    if let Some(path) = lookup("SPLATFORGE_DATABASE_PATH") {
        config.database.path = PathBuf::from(path);
    }
    if let Some(root) = lookup("SPLATFORGE_UPLOAD_ROOT") {
        config.paths.upload_root = PathBuf::from(root);
    }
    if let Some(level) = lookup("SPLATFORGE_LOG") {
        config.logging.level = level;
    }
}

fn finalize(mut config: AppConfig) -> Result<AppConfig, ConfigError> {
    validate_config(&config)?;

    // The upload-root constraint compares absolute paths, so anchor it once here.
    config.paths.upload_root = absolutize(&config.paths.upload_root)?;
    if let Some(staging) = config.storage.staging_dir.take() {
        config.storage.staging_dir = Some(absolutize(&staging)?);
    }

    // Staged videos are handed to the trainer, which only accepts paths
    // under the upload root.
    let staging = config.staging_dir();
    if staging.components().any(|c| c == Component::ParentDir)
        || !staging.starts_with(&config.paths.upload_root)
    {
        return Err(invalid(format!(
            "storage.staging_dir '{}' must be inside paths.upload_root '{}'",
            staging.display(),
            config.paths.upload_root.display()
        )));
    }

    Ok(config)
}

fn absolutize(path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path).map_err(|e| ConfigError::ResolvePath {
        path: path.to_path_buf(),
        source: e,
    })
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.database.max_open == 0 {
        return Err(invalid("database.max_open must be at least 1"));
    }

    let storage = &config.storage;
    if storage.bucket.is_empty() || storage.bucket.contains('/') {
        return Err(invalid(format!(
            "storage.bucket '{}' must be a non-empty name without '/'",
            storage.bucket
        )));
    }
    match storage.backend {
        StorageBackend::Local => {
            if storage.root.is_none() {
                return Err(invalid("storage.root is required for the local backend"));
            }
        }
        StorageBackend::Http => match storage.endpoint.as_deref() {
            Some(endpoint) if endpoint.starts_with("http://") || endpoint.starts_with("https://") => {}
            Some(endpoint) => {
                return Err(invalid(format!(
                    "storage.endpoint '{}' must be an http(s) URL",
                    crate::sanitize::redact_url(endpoint)
                )))
            }
            None => return Err(invalid("storage.endpoint is required for the http backend")),
        },
    }
    if storage.part_size < MIN_PART_SIZE {
        return Err(invalid(format!(
            "storage.part_size must be at least {} bytes",
            MIN_PART_SIZE
        )));
    }
    if storage.copy_buffer_size == 0 {
        return Err(invalid("storage.copy_buffer_size must be positive"));
    }

    if config.paths.upload_root.as_os_str().is_empty() {
        return Err(invalid("paths.upload_root must not be empty"));
    }
    if config.training.interpreter.as_os_str().is_empty()
        || config.training.trainer.as_os_str().is_empty()
    {
        return Err(invalid("training.interpreter and training.trainer are required"));
    }
    if config.training.default_iterations == 0 {
        return Err(invalid("training.default_iterations must be positive"));
    }
    if config.conversion.converter.as_os_str().is_empty() {
        return Err(invalid("conversion.converter is required"));
    }
    if config.pipeline.progress_capacity == 0 {
        return Err(invalid("pipeline.progress_capacity must be positive"));
    }

    Ok(())
}
