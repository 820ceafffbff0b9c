//! Supervised execution of the external training and conversion tools.

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::ProcessError;
use super::marker::parse_output_marker;
use crate::sanitize::redact_path;

/// Captured stderr lines kept for the exit error.
const STDERR_TAIL_LINES: usize = 20;

#[cfg(windows)]
const PATH_LIST_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: &str = ":";

/// Where the child's stderr goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StderrMode {
    /// Passed through to this process's stderr.
    #[default]
    Inherit,
    /// Collected; the last lines are attached to exit errors.
    Capture,
}

/// Restriction on flagged path arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathConstraint {
    Unrestricted,
    /// Absolute, free of `..`, and beneath the root.
    UnderRoot(PathBuf),
}

impl PathConstraint {
    pub fn check(&self, path: &Path) -> Result<(), ProcessError> {
        let root = match self {
            PathConstraint::Unrestricted => return Ok(()),
            PathConstraint::UnderRoot(root) => root,
        };
        let invalid = |reason| ProcessError::InvalidPath {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_absolute() {
            return Err(invalid("path is not absolute"));
        }
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(invalid("path contains '..'"));
        }
        if !root.is_absolute() || !path.starts_with(root) {
            return Err(invalid("path is outside the upload root"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Arg {
    value: OsString,
    constrained: bool,
}

/// One external command line.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<Arg>,
    env_append: Vec<(String, OsString)>,
    working_dir: Option<PathBuf>,
    default_output_dir: Option<PathBuf>,
    stderr: StderrMode,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_append: Vec::new(),
            working_dir: None,
            default_output_dir: None,
            stderr: StderrMode::default(),
        }
    }

    pub fn arg(mut self, value: impl AsRef<OsStr>) -> Self {
        self.args.push(Arg {
            value: value.as_ref().to_os_string(),
            constrained: false,
        });
        self
    }

    /// A path argument checked against the runner's [`PathConstraint`].
    pub fn path_arg(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(Arg {
            value: path.as_ref().as_os_str().to_os_string(),
            constrained: true,
        });
        self
    }

    /// Appends `value` to the inherited value of `var`, separated by the
    /// platform's path-list separator. The inherited value is never replaced.
    pub fn env_append(mut self, var: impl Into<String>, value: impl AsRef<OsStr>) -> Self {
        self.env_append
            .push((var.into(), value.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Reported as the output directory when the tool exits cleanly without
    /// printing a marker.
    pub fn default_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_output_dir = Some(dir.into());
        self
    }

    pub fn stderr(mut self, mode: StderrMode) -> Self {
        self.stderr = mode;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> impl Iterator<Item = &OsStr> {
        self.args.iter().map(|a| a.value.as_os_str())
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    fn display_name(&self) -> String {
        redact_path(&self.program)
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Marker path as printed, or the invocation's default.
    pub output_dir: Option<PathBuf>,
    /// Whether `output_dir` came from a marker line.
    pub marker_found: bool,
    pub status: ExitStatus,
    pub stdout_lines: usize,
}

/// Receives every stdout line as it is read.
pub type LineObserver<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    constraint: PathConstraint,
}

impl ProcessRunner {
    pub fn new(constraint: PathConstraint) -> Self {
        Self { constraint }
    }

    pub fn constraint(&self) -> &PathConstraint {
        &self.constraint
    }

    /// Runs `invocation` to completion.
    ///
    /// stdout is drained line by line concurrently with the exit wait. If
    /// `cancel` fires first the child is killed and
    /// [`ProcessError::Canceled`] is returned.
    pub async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
        observer: Option<LineObserver<'_>>,
    ) -> Result<RunOutput, ProcessError> {
        for arg in invocation.args.iter().filter(|a| a.constrained) {
            self.constraint.check(Path::new(&arg.value))?;
        }

        let program = invocation.display_name();
        if cancel.is_cancelled() {
            return Err(ProcessError::Canceled { program });
        }

        let mut cmd = Command::new(&invocation.program);
        cmd.args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(match invocation.stderr {
                StderrMode::Inherit => Stdio::inherit(),
                StderrMode::Capture => Stdio::piped(),
            })
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }
        for (var, value) in &invocation.env_append {
            cmd.env(var, append_env_value(std::env::var_os(var), value));
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        info!(program = %program, pid = ?child.id(), "Started external tool");

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stdout_task = async {
            let mut marker: Option<String> = None;
            let mut count = 0usize;
            if let Some(stdout) = stdout_pipe {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            count += 1;
                            debug!(program = %program, "{}", line);
                            if let Some(found) = parse_output_marker(&line) {
                                marker = Some(found.to_string());
                            }
                            if let Some(observe) = observer {
                                observe(&line);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(program = %program, error = %e, "Stopped reading stdout");
                            break;
                        }
                    }
                }
            }
            (marker, count)
        };

        let stderr_task = async {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            if let Some(stderr) = stderr_pipe {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            Vec::from(tail).join("\n")
        };

        let finished = {
            let drained = async { tokio::join!(stdout_task, stderr_task, child.wait()) };
            tokio::select! {
                _ = cancel.cancelled() => None,
                result = drained => Some(result),
            }
        };

        let ((marker, stdout_lines), stderr_tail, waited) = match finished {
            Some(result) => result,
            None => {
                warn!(program = %program, "Canceled, killing external tool");
                if let Err(e) = child.start_kill() {
                    warn!(program = %program, error = %e, "Kill failed");
                }
                let _ = child.wait().await;
                return Err(ProcessError::Canceled { program });
            }
        };

        let status = waited.map_err(|source| ProcessError::Wait {
            program: program.clone(),
            source,
        })?;
        if !status.success() {
            return Err(ProcessError::ExitStatus {
                program,
                status,
                stderr_tail,
            });
        }

        let marker_found = marker.is_some();
        let output_dir = marker
            .map(PathBuf::from)
            .or_else(|| invocation.default_output_dir.clone());
        if !marker_found {
            debug!(program = %program, "No output marker, using default output dir");
        }
        info!(program = %program, lines = stdout_lines, "External tool finished");

        Ok(RunOutput {
            output_dir,
            marker_found,
            status,
            stdout_lines,
        })
    }
}

fn append_env_value(existing: Option<OsString>, value: &OsStr) -> OsString {
    match existing {
        Some(mut joined) if !joined.is_empty() => {
            joined.push(PATH_LIST_SEPARATOR);
            joined.push(value);
            joined
        }
        _ => value.to_os_string(),
    }
}
