use std::path::PathBuf;

use thiserror::Error;

/// Message shown to operators when any container hook invocation fails.
pub const HOOK_FAILURE_GUIDANCE: &str = "Executing the custom container implementation failed. \
     Please contact your self hosted runner administrator.";

/// Errors raised by step execution and the container hook protocol
#[derive(Debug, Error)]
pub enum StepError {
    /// Invalid hook or job setup (e.g. more than one job container)
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("container hook path is not configured; set {knob} to the path of an existing file")]
    HookNotConfigured { knob: &'static str },

    #[error("file not found at '{}'; set {knob} to the path of an existing file", .path.display())]
    HookNotFound { path: PathBuf, knob: &'static str },

    #[error("invalid file extension at '{}'; {knob} must be a path to a file with one of the following extensions: {supported}", .path.display())]
    UnsupportedHookType {
        path: PathBuf,
        knob: &'static str,
        supported: String,
    },

    #[error("shell '{0}' could not be located on the search path")]
    ShellNotFound(String),

    #[error("invalid shell option '{0}'; shell must be a built-in (bash, sh, cmd, powershell, pwsh) or a format string containing '{{0}}'")]
    InvalidShellSpec(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("the hook script at '{}' running command '{command}' did not execute successfully (exit code {exit_code})", .path.display())]
    HookExecutionFailed {
        path: PathBuf,
        command: String,
        exit_code: i32,
    },

    #[error("response file is required but {reason} for the hook script at '{}' running command '{command}'", .path.display())]
    MissingRequiredResponse {
        path: PathBuf,
        command: String,
        reason: String,
    },

    #[error("hook protocol error: {0}")]
    Protocol(String),

    #[error("process was cancelled")]
    Cancelled,

    #[error("failed to start '{}': {source}", .file_name.display())]
    Spawn {
        file_name: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Uniform operator-facing wrapper around any hook invocation failure
    #[error("{guidance}\nhook: '{}', command: '{command}'\ncaused by: {source}", .path.display(), guidance = HOOK_FAILURE_GUIDANCE)]
    HookFailed {
        path: PathBuf,
        command: String,
        #[source]
        source: Box<StepError>,
    },
}

impl StepError {
    /// Innermost cause, looking through `HookFailed` wrappers
    pub fn inner(&self) -> &StepError {
        match self {
            StepError::HookFailed { source, .. } => source.inner(),
            other => other,
        }
    }

    /// Whether the error can only be resolved by operator action on the runner setup
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.inner(),
            StepError::Configuration(_)
                | StepError::HookNotConfigured { .. }
                | StepError::HookNotFound { .. }
                | StepError::UnsupportedHookType { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StepError>;
