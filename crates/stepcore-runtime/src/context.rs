use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RunnerConfig;

/// Opaque protocol state threaded between hook invocations
pub type HookState = Map<String, Value>;

pub mod names {
    pub const CONTAINER_NETWORK: &str = "agent.containernetwork";
    pub const CONTAINER_MAPPING: &str = "agent.containermapping";
    pub const SERVICE_PORT_PREFIX: &str = "agent.services";
    pub const DEFAULT_WORKING_DIRECTORY: &str = "system.defaultworkingdirectory";
    pub const WORK_FOLDER: &str = "agent.workfolder";
    pub const TEMP_DIRECTORY: &str = "agent.tempdirectory";
    pub const GITHUB_WORKSPACE: &str = "github.workspace";
    pub const RUNNER_WORKSPACE: &str = "runner.workspace";
    pub const RUNNER_TEMP: &str = "runner.temp";
}

/// Outcome recorded for the current step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResult {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub value: String,
    #[serde(default)]
    pub secret: bool,
    /// Never projected into a child process environment
    #[serde(default)]
    pub exclude_from_env: bool,
}

/// Job variables, keyed case-insensitively by lowercase name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables {
    entries: BTreeMap<String, Variable>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.insert(
            name,
            Variable {
                value: value.into(),
                ..Default::default()
            },
        );
    }

    pub fn set_secret(&mut self, name: &str, value: impl Into<String>) {
        self.insert(
            name,
            Variable {
                value: value.into(),
                secret: true,
                exclude_from_env: false,
            },
        );
    }

    pub fn insert(&mut self, name: &str, variable: Variable) {
        self.entries.insert(name.to_lowercase(), variable);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_lowercase())
            .map(|v| v.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Environment projection: secrets and excluded variables are skipped
    pub fn to_environment(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .filter(|(_, v)| !v.secret && !v.exclude_from_env)
            .map(|(name, v)| (env_name(name), v.value.clone()))
            .collect()
    }
}

/// `system.defaultWorkingDirectory` becomes `SYSTEM_DEFAULTWORKINGDIRECTORY`
pub fn env_name(variable: &str) -> String {
    variable
        .chars()
        .map(|c| match c {
            '.' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// Which stream a process line arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Destination for step output and diagnostics
pub trait OutputSink: Send + Sync {
    fn output(&self, line: &str);
    fn error(&self, message: &str);
    fn debug(&self, message: &str) {
        debug!("{message}");
    }
}

/// Scans output lines for embedded directives
pub trait CommandProcessor: Send + Sync {
    /// Returns true when the line was consumed as a command
    fn try_process(&self, line: &str) -> bool;
}

/// Processor that never consumes a line
pub struct NoCommands;

impl CommandProcessor for NoCommands {
    fn try_process(&self, _line: &str) -> bool {
        false
    }
}

/// Writes step output to the process stdout/stderr
pub struct ConsoleOutput;

impl OutputSink for ConsoleOutput {
    fn output(&self, line: &str) {
        println!("{line}");
    }

    fn error(&self, message: &str) {
        eprintln!("##[error]{message}");
    }
}

/// Collects output in memory
#[derive(Default)]
pub struct MemoryOutput {
    lines: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl OutputSink for MemoryOutput {
    fn output(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }

    fn error(&self, message: &str) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message.to_string());
        }
    }
}

/// Job-scoped mutable state shared by the script engine and the hook manager.
///
/// Calls are serialized by contract: one step or hook invocation at a time
/// per job, so no internal locking is done here.
pub struct JobContext {
    pub variables: Variables,
    /// Paths in registration order; the most recent entry wins on PATH
    pub prepend_path: Vec<String>,
    pub hook_state: Option<HookState>,
    pub result: Option<TaskResult>,
    pub cancellation: CancellationToken,
    pub work_directory: PathBuf,
    output: Arc<dyn OutputSink>,
    commands: Arc<dyn CommandProcessor>,
}

impl JobContext {
    pub fn new(config: &RunnerConfig, output: Arc<dyn OutputSink>) -> Self {
        let mut variables = Variables::new();
        let work = config.directories.work.display().to_string();
        variables.set(names::WORK_FOLDER, work.clone());
        variables.set(names::DEFAULT_WORKING_DIRECTORY, work);
        variables.set(
            names::TEMP_DIRECTORY,
            config.directories.temp.display().to_string(),
        );

        Self {
            variables,
            prepend_path: Vec::new(),
            hook_state: None,
            result: None,
            cancellation: CancellationToken::new(),
            work_directory: config.directories.work.clone(),
            output,
            commands: Arc::new(NoCommands),
        }
    }

    pub fn with_command_processor(mut self, commands: Arc<dyn CommandProcessor>) -> Self {
        self.commands = commands;
        self
    }

    pub fn output_sink(&self) -> Arc<dyn OutputSink> {
        self.output.clone()
    }

    pub fn command_processor(&self) -> Arc<dyn CommandProcessor> {
        self.commands.clone()
    }

    pub fn error(&self, message: &str) {
        self.output.error(message);
    }

    pub fn debug(&self, message: &str) {
        self.output.debug(message);
    }

    /// PATH prefix in execution order (most recently prepended first)
    pub fn prepend_path_in_execution_order(&self) -> Vec<String> {
        self.prepend_path.iter().rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_name_transform() {
        assert_eq!(
            env_name("system.defaultworkingdirectory"),
            "SYSTEM_DEFAULTWORKINGDIRECTORY"
        );
        assert_eq!(env_name("my var"), "MY_VAR");
    }

    #[test]
    fn test_projection_skips_secrets_and_excluded() {
        let mut vars = Variables::new();
        vars.set("build.id", "42");
        vars.set_secret("token", "hunter2");
        vars.insert(
            "internal.flag",
            Variable {
                value: "x".into(),
                secret: false,
                exclude_from_env: true,
            },
        );

        let env = vars.to_environment();
        assert_eq!(env.get("BUILD_ID").map(String::as_str), Some("42"));
        assert!(!env.contains_key("TOKEN"));
        assert!(!env.contains_key("INTERNAL_FLAG"));
    }

    #[test]
    fn test_variables_are_case_insensitive() {
        let mut vars = Variables::new();
        vars.set("Agent.WorkFolder", "/w");
        assert_eq!(vars.get("agent.workfolder"), Some("/w"));
    }

    #[test]
    fn test_new_context_seeds_workspace_variables() {
        let config = RunnerConfig::default();
        let ctx = JobContext::new(&config, Arc::new(MemoryOutput::new()));
        assert_eq!(ctx.variables.get(names::WORK_FOLDER), Some("_work"));
        assert_eq!(ctx.variables.get(names::TEMP_DIRECTORY), Some("_work/_temp"));
        assert!(ctx.hook_state.is_none());
        assert!(ctx.result.is_none());
    }

    #[test]
    fn test_prepend_path_execution_order() {
        let config = RunnerConfig::default();
        let mut ctx = JobContext::new(&config, Arc::new(MemoryOutput::new()));
        ctx.prepend_path.push("/first".into());
        ctx.prepend_path.push("/second".into());
        assert_eq!(
            ctx.prepend_path_in_execution_order(),
            vec!["/second".to_string(), "/first".to_string()]
        );
    }
}
