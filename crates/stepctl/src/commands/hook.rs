use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use stepcore_adapters::{ContainerHookManager, ContainerInfo, ScriptStepRequest};
use stepcore_runtime::{ConsoleOutput, HookState, JobContext, RunnerConfig, Variables};
use tracing::info;

use crate::cli::HookCommands;

/// Job state persisted between hook invocations
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobFile {
    pub containers: Vec<ContainerInfo>,
    pub state: Option<HookState>,
    pub variables: Variables,
    /// Registration order
    pub prepend_path: Vec<String>,
}

impl JobFile {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read job file: {:?}", path))?;
        serde_json::from_str(&content).context("Failed to parse job file")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).context(format!("Failed to write job file: {:?}", path))
    }
}

pub async fn execute(job_path: &Path, action: HookCommands, config: &RunnerConfig) -> Result<()> {
    let mut job = JobFile::load(job_path)?;
    let mut ctx = JobContext::new(config, Arc::new(ConsoleOutput));
    for (name, variable) in job.variables.iter() {
        ctx.variables.insert(name, variable.clone());
    }
    ctx.prepend_path = job.prepend_path.clone();
    ctx.hook_state = job.state.take();
    super::cancel_on_ctrl_c(&ctx);

    let manager = ContainerHookManager::new(config);
    match action {
        HookCommands::PrepareJob => {
            manager.prepare_job(&mut ctx, &mut job.containers).await?;
        }
        HookCommands::RunContainerStep {
            container,
            dockerfile,
        } => {
            let target = find_container(&job.containers, container.as_deref())?;
            manager
                .run_container_step(&mut ctx, target, dockerfile.as_deref())
                .await?;
        }
        HookCommands::RunScriptStep {
            container,
            entry_point,
            args,
            workdir,
            env,
        } => {
            let target = find_container(&job.containers, container.as_deref())?;
            let request = ScriptStepRequest {
                working_directory: workdir,
                entry_point,
                entry_point_args: args,
                environment: env.into_iter().collect(),
                prepend_path: ctx.prepend_path.clone(),
            };
            manager.run_script_step(&mut ctx, target, request).await?;
        }
        HookCommands::CleanupJob => {
            manager.cleanup_job(&mut ctx, &job.containers).await?;
        }
    }

    job.state = ctx.hook_state.take();
    job.variables = ctx.variables.clone();
    job.save(job_path)?;
    info!(job = ?job_path, "Job file updated");
    Ok(())
}

/// Named container, or the job container when no name is given
fn find_container<'a>(containers: &'a [ContainerInfo], name: Option<&str>) -> Result<&'a ContainerInfo> {
    let found = match name {
        Some(name) => containers.iter().find(|c| c.container_name == name),
        None => containers.iter().find(|c| c.is_job_container),
    };
    found.with_context(|| match name {
        Some(name) => format!("No container named '{name}' in job file"),
        None => "No job container in job file".to_string(),
    })
}
