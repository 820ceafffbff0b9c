//! External tool execution: the trainer and the converter.

pub mod error;
pub mod marker;
pub mod runner;

use std::path::Path;

pub use error::ProcessError;
pub use marker::{find_output_marker, parse_output_marker, OUTPUT_MARKER};
pub use runner::{
    Invocation, LineObserver, PathConstraint, ProcessRunner, RunOutput, StderrMode,
};

use crate::config::AppConfig;

/// Module search path variable both tools receive.
pub const MODULE_PATH_VAR: &str = "PYTHONPATH";

/// `<interpreter> <trainer> --video <path> --iterations <n>`, run from the
/// training working directory. The video path is constrained to the upload root.
pub fn training_invocation(config: &AppConfig, video: &Path, iterations: u32) -> Invocation {
    let training = &config.training;
    let mut invocation = Invocation::new(&training.interpreter)
        .arg(&training.trainer)
        .arg("--video")
        .path_arg(video)
        .arg("--iterations")
        .arg(iterations.to_string())
        .current_dir(config.training_working_dir())
        .default_output_dir(&training.default_output_dir)
        .stderr(StderrMode::Capture);
    if let Some(module_path) = &training.module_path {
        invocation = invocation.env_append(MODULE_PATH_VAR, module_path);
    }
    invocation
}

/// `<interpreter> <converter> <input> --output <output>`.
pub fn conversion_invocation(config: &AppConfig, input: &Path, output: &Path) -> Invocation {
    let conversion = &config.conversion;
    let mut invocation = Invocation::new(config.conversion_interpreter())
        .arg(&conversion.converter)
        .arg(input)
        .arg("--output")
        .arg(output)
        .stderr(StderrMode::Capture);
    if let Some(module_path) = &conversion.module_path {
        invocation = invocation.env_append(MODULE_PATH_VAR, module_path);
    }
    invocation
}

/// Runner whose flagged paths must sit under the configured upload root.
pub fn upload_root_runner(config: &AppConfig) -> ProcessRunner {
    ProcessRunner::new(PathConstraint::UnderRoot(config.paths.upload_root.clone()))
}
