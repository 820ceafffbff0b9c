use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    /// A flagged path argument fell outside the allowed root. Never retried.
    #[error("Invalid path argument '{path}': {reason}")]
    InvalidPath { path: PathBuf, reason: &'static str },

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}{}", stderr_suffix(.stderr_tail))]
    ExitStatus {
        program: String,
        status: ExitStatus,
        stderr_tail: String,
    },

    #[error("'{program}' canceled")]
    Canceled { program: String },
}

impl ProcessError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, ProcessError::Canceled { .. })
    }
}

fn stderr_suffix(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {}", tail)
    }
}
