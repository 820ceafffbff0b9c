pub mod loader;
pub mod schema;

pub use crate::error::ConfigError;
pub use loader::{apply_env_overrides, load_config, load_config_from_str};
pub use schema::{
    AppConfig, ConversionConfig, DatabaseConfig, LoggingConfig, PathsConfig, PipelineSettings,
    StorageBackend, StorageConfig, TrainingConfig,
};
