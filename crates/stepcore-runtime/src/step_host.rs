use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::context::OutputStream;
use crate::error::Result;

/// Invoked once per received output line, in arrival order per stream
pub type LineCallback = Arc<dyn Fn(OutputStream, &str) + Send + Sync>;

/// One process launch
#[derive(Debug, Clone, Default)]
pub struct ProcessRequest {
    pub working_directory: PathBuf,
    pub file_name: PathBuf,
    /// Formatted argument string, split by the host as needed
    pub arguments: String,
    pub environment: HashMap<String, String>,
    /// PATH entries in execution order; each host composes them with its own PATH
    pub prepend_path: Vec<String>,
    /// Literal payload written to the child's stdin before waiting
    pub standard_input: Option<String>,
    /// Return once a kill attempt on cancellation has failed instead of waiting for exit
    pub continue_after_cancel_kill_attempt: bool,
}

/// Execution target for a step: the agent machine or a container
#[async_trait]
pub trait StepHost: Send + Sync {
    /// Steps dispatched here resolve binaries inside a container
    fn is_container(&self) -> bool {
        false
    }

    /// Translate an agent-side path into the step host's view
    fn resolve_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    /// Run the process to completion and return its exit code
    async fn execute(
        &self,
        request: ProcessRequest,
        on_line: LineCallback,
        cancellation: CancellationToken,
    ) -> Result<i32>;
}
