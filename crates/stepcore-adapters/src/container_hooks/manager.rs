use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stepcore_runtime::config::CONTAINER_HOOKS_PATH_KNOB;
use stepcore_runtime::{
    names, HookState, JobContext, Result, RunnerConfig, StepError, StepHost, TelemetryPublisher,
    TelemetryRecord, TracingTelemetry,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::container::ContainerInfo;
use super::wire::{
    CleanupJobArgs, ContainerStepArgs, HookArgs, HookCommand, HookInput, HookResponse,
    HookResponseBody, PrepareJobArgs, PrepareJobResponse, ResponseContext, ScriptStepArgs,
};
use crate::process::HostStepHost;
use crate::script_step::{ScriptStep, ScriptStepEngine};
use crate::shell::SearchPath;

const RESPONSE_FOLDER_NAME: &str = "_runner_hook_responses";
const SUPPORTED_EXTENSIONS: [&str; 3] = ["js", "sh", "ps1"];
const TELEMETRY_AREA: &str = "PipelinesTasks";
const TELEMETRY_FEATURE: &str = "ContainerHookManager";

/// Inputs for running a script step through the hook program
#[derive(Debug, Clone, Default)]
pub struct ScriptStepRequest {
    pub working_directory: String,
    pub entry_point: String,
    /// Flat argument string; split on whitespace
    pub entry_point_args: String,
    pub environment: BTreeMap<String, String>,
    /// Registration order; sent to the hook most recent first
    pub prepend_path: Vec<String>,
}

/// Delegates container lifecycle to an external hook program
pub struct ContainerHookManager {
    hook_path: Option<PathBuf>,
    temp_directory: PathBuf,
    engine: ScriptStepEngine,
    step_host: Arc<dyn StepHost>,
    telemetry: Arc<dyn TelemetryPublisher>,
}

impl ContainerHookManager {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            hook_path: config.hooks.path.clone(),
            temp_directory: config.directories.temp.clone(),
            engine: ScriptStepEngine::new(config),
            step_host: Arc::new(HostStepHost),
            telemetry: Arc::new(TracingTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryPublisher>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_step_host(mut self, step_host: Arc<dyn StepHost>) -> Self {
        self.step_host = step_host;
        self
    }

    pub fn hook_path(&self) -> Option<&Path> {
        self.hook_path.as_deref()
    }

    pub fn hook_data(&self) -> BTreeMap<String, String> {
        let path = self
            .hook_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        BTreeMap::from([("hookScriptPath".to_string(), path)])
    }

    pub async fn prepare_job(
        &self,
        ctx: &mut JobContext,
        containers: &mut [ContainerInfo],
    ) -> Result<()> {
        let job_indices: Vec<usize> = containers
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_job_container)
            .map(|(i, _)| i)
            .collect();
        if job_indices.len() > 1 {
            return Err(StepError::Configuration(format!(
                "expected at most one job container, found {}",
                job_indices.len()
            )));
        }
        let job_index = job_indices.first().copied();
        let service_indices: Vec<usize> = (0..containers.len())
            .filter(|i| !containers[*i].is_job_container)
            .collect();

        let args = PrepareJobArgs {
            container: job_index.map(|i| containers[i].hook_container()),
            services: service_indices
                .iter()
                .map(|i| containers[*i].hook_container())
                .collect(),
        };
        let input = HookInput::new(HookArgs::PrepareJob(args), self.response_path(), None);

        set_workspace_aliases(ctx);
        let Some(response) = self.execute_hook::<PrepareJobResponse>(ctx, &input).await? else {
            info!("prepare_job returned no response; job containers left unchanged");
            return Ok(());
        };

        if let (Some(i), Some(is_alpine)) = (job_index, response.is_alpine) {
            containers[i].is_alpine = is_alpine;
        }
        ctx.debug(&format!(
            "response.state={}",
            response
                .state
                .as_ref()
                .map(|s| Value::Object(s.clone()).to_string())
                .unwrap_or_default()
        ));
        save_hook_state(ctx, response.state().cloned(), input.command);
        update_job_context(
            ctx,
            containers,
            job_index,
            &service_indices,
            response.context.as_ref(),
        );
        Ok(())
    }

    pub async fn run_container_step(
        &self,
        ctx: &mut JobContext,
        container: &ContainerInfo,
        dockerfile: Option<&str>,
    ) -> Result<()> {
        let mut args = ContainerStepArgs {
            container: container.hook_container(),
        };
        if let Some(dockerfile) = dockerfile.filter(|d| !d.is_empty()) {
            // No image tells the hook program to build instead of pull
            args.container.dockerfile = Some(dockerfile.to_string());
            args.container.image = None;
        }
        let input = HookInput::new(
            HookArgs::ContainerStep(args),
            self.response_path(),
            ctx.hook_state.clone(),
        );

        if let Some(response) = self.execute_hook::<HookResponse>(ctx, &input).await? {
            save_hook_state(ctx, response.state().cloned(), input.command);
        }
        Ok(())
    }

    pub async fn run_script_step(
        &self,
        ctx: &mut JobContext,
        container: &ContainerInfo,
        request: ScriptStepRequest,
    ) -> Result<()> {
        debug!(container = %container.container_name, "running script step through hook");
        let args = ScriptStepArgs {
            entry_point: request.entry_point,
            entry_point_args: request
                .entry_point_args
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            environment_variables: request.environment,
            prepend_path: request.prepend_path.into_iter().rev().collect(),
            working_directory: request.working_directory,
        };
        let input = HookInput::new(
            HookArgs::ScriptStep(args),
            self.response_path(),
            ctx.hook_state.clone(),
        );

        if let Some(response) = self.execute_hook::<HookResponse>(ctx, &input).await? {
            save_hook_state(ctx, response.state().cloned(), input.command);
        }
        Ok(())
    }

    pub async fn cleanup_job(&self, ctx: &mut JobContext, containers: &[ContainerInfo]) -> Result<()> {
        debug!(containers = containers.len(), "cleaning up job containers");
        let input = HookInput::new(
            HookArgs::CleanupJob(CleanupJobArgs {}),
            self.response_path(),
            ctx.hook_state.clone(),
        );

        if let Some(response) = self.execute_hook::<HookResponse>(ctx, &input).await? {
            save_hook_state(ctx, response.state().cloned(), input.command);
        }
        Ok(())
    }

    /// Invoke the hook program; every failure comes back as `HookFailed`
    async fn execute_hook<T: HookResponseBody>(
        &self,
        ctx: &JobContext,
        input: &HookInput,
    ) -> Result<Option<T>> {
        self.publish_telemetry();
        self.invoke_hook(ctx, input)
            .await
            .map_err(|source| StepError::HookFailed {
                path: self.hook_path.clone().unwrap_or_default(),
                command: input.command.to_string(),
                source: Box::new(source),
            })
    }

    async fn invoke_hook<T: HookResponseBody>(
        &self,
        ctx: &JobContext,
        input: &HookInput,
    ) -> Result<Option<T>> {
        let hook_path = self.validate_hook_executable()?;
        let shell = self.default_shell_for_script(ctx, &hook_path)?;
        let standard_input = serde_json::to_string(input)?;

        create_empty_response_file(&input.response_file).await?;
        info!(hook = %hook_path.display(), command = %input.command, "invoking container hook");

        let step = ScriptStep {
            script_path: Some(hook_path.clone()),
            shell: Some(shell),
            standard_input: Some(standard_input),
            environment: HashMap::new(),
            ..Default::default()
        };
        let exit_code = self
            .engine
            .execute(ctx, &step, self.step_host.as_ref())
            .await?;
        if exit_code != 0 {
            return Err(StepError::HookExecutionFailed {
                path: hook_path,
                command: input.command.to_string(),
                exit_code,
            });
        }

        self.read_response(input, &hook_path).await
    }

    fn validate_hook_executable(&self) -> Result<PathBuf> {
        let path = self
            .hook_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(StepError::HookNotConfigured {
                knob: CONTAINER_HOOKS_PATH_KNOB,
            })?;
        if !path.is_file() {
            return Err(StepError::HookNotFound {
                path,
                knob: CONTAINER_HOOKS_PATH_KNOB,
            });
        }
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext));
        if !supported {
            return Err(StepError::UnsupportedHookType {
                path,
                knob: CONTAINER_HOOKS_PATH_KNOB,
                supported: SUPPORTED_EXTENSIONS
                    .iter()
                    .map(|e| format!(".{e}"))
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        Ok(path)
    }

    /// Interpreter implied by the hook file's extension
    fn default_shell_for_script(&self, ctx: &JobContext, path: &Path) -> Result<String> {
        let search = SearchPath::from_env(&ctx.prepend_path_in_execution_order());
        let prefer = |preferred: &str, fallback: &str| {
            if search.which(preferred).is_some() {
                preferred.to_string()
            } else {
                fallback.to_string()
            }
        };
        match path.extension().and_then(|e| e.to_str()) {
            // sh arguments either way; bash when available
            Some("sh") => Ok(prefer("bash", "sh")),
            Some("ps1") => Ok(prefer("pwsh", "powershell")),
            Some("js") => Ok(format!("\"{}\" {{0}}", self.engine.node_path().display())),
            _ => Err(StepError::InvalidInput(format!(
                "{} is not a valid path to a script. Make sure it ends in '.sh', '.ps1' or '.js'.",
                path.display()
            ))),
        }
    }

    fn response_path(&self) -> PathBuf {
        self.temp_directory
            .join(RESPONSE_FOLDER_NAME)
            .join(format!("{}.json", Uuid::new_v4()))
    }

    async fn read_response<T: HookResponseBody>(
        &self,
        input: &HookInput,
        hook_path: &Path,
    ) -> Result<Option<T>> {
        let required = input.args.requires_alpine_detection();
        let missing = |reason: &str| StepError::MissingRequiredResponse {
            path: hook_path.to_path_buf(),
            command: input.command.to_string(),
            reason: reason.to_string(),
        };

        let content = match tokio::fs::read_to_string(&input.response_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(command = %input.command, "response file not found");
                return if required {
                    Err(missing("not found"))
                } else {
                    Ok(None)
                };
            }
            Err(e) => return Err(e.into()),
        };

        let parsed = if content.trim().is_empty() {
            None
        } else {
            serde_json::from_str::<Option<T>>(&content).map_err(|e| {
                StepError::Protocol(format!(
                    "response file '{}' for command '{}' is not valid: {e}",
                    input.response_file.display(),
                    input.command
                ))
            })?
        };
        debug!(command = %input.command, "response file processed");

        if let Err(e) = tokio::fs::remove_file(&input.response_file).await {
            warn!(error = %e, file = %input.response_file.display(), "Failed to delete response file");
        }

        match parsed {
            None if required => Err(missing("could not be read")),
            None => Ok(None),
            Some(response) => {
                response.validate(input).map_err(|reason| {
                    if required {
                        missing(&reason)
                    } else {
                        StepError::Protocol(reason)
                    }
                })?;
                Ok(Some(response))
            }
        }
    }

    fn publish_telemetry(&self) {
        let data = Value::Object(
            self.hook_data()
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        );
        let record = TelemetryRecord::new(TELEMETRY_AREA, TELEMETRY_FEATURE, data);
        if let Err(e) = self.telemetry.publish(record) {
            warn!(error = %e, "Failed to publish container hook telemetry");
        }
    }
}

async fn create_empty_response_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, b"").await?;
    Ok(())
}

/// Last write wins; a response without state leaves the stored state alone
fn save_hook_state(ctx: &mut JobContext, state: Option<HookState>, command: HookCommand) {
    match state {
        Some(state) => {
            ctx.hook_state = Some(state);
            info!(%command, "container hook state updated");
        }
        None => info!(%command, "no 'state' in response; container hook state unchanged"),
    }
}

/// Variables conventional container hooks read from the environment
fn set_workspace_aliases(ctx: &mut JobContext) {
    let aliases = [
        (names::GITHUB_WORKSPACE, names::DEFAULT_WORKING_DIRECTORY),
        (names::RUNNER_WORKSPACE, names::WORK_FOLDER),
        (names::RUNNER_TEMP, names::TEMP_DIRECTORY),
    ];
    for (alias, source) in aliases {
        let value = ctx.variables.get(source).unwrap_or_default().to_string();
        ctx.variables.set(alias, value);
    }
}

fn update_job_context(
    ctx: &mut JobContext,
    containers: &mut [ContainerInfo],
    job_index: Option<usize>,
    service_indices: &[usize],
    context: Option<&ResponseContext>,
) {
    let Some(context) = context else {
        info!(
            "response has no context; {}, {} and {} are not set",
            names::CONTAINER_NETWORK,
            names::CONTAINER_MAPPING,
            names::SERVICE_PORT_PREFIX
        );
        return;
    };

    let job_context = context.container.as_ref();
    if let Some(network) = job_context.and_then(|c| c.network.as_ref()) {
        if let Some(i) = job_index {
            containers[i].container_network = Some(network.clone());
        }
        ctx.variables.set(names::CONTAINER_NETWORK, network.clone());
    }

    let mut mapping = Map::new();
    if let (Some(id), Some(i)) = (job_context.and_then(|c| c.id.as_ref()), job_index) {
        containers[i].container_id = Some(id.clone());
        mapping.insert(
            containers[i].container_name.clone(),
            serde_json::json!({ "id": id }),
        );
    }

    for (reported, &i) in context.services.iter().zip(service_indices) {
        let service = &mut containers[i];
        service.container_id = reported.id.clone();
        service.container_network = reported.network.clone();
        mapping.insert(
            service.container_name.clone(),
            serde_json::json!({ "id": service.container_id }),
        );

        for port in service.effective_port_mappings() {
            ctx.variables.set(
                &format!(
                    "{}.{}.ports.{}",
                    names::SERVICE_PORT_PREFIX,
                    service.alias(),
                    port.container_port
                ),
                port.host_port,
            );
        }
    }

    ctx.variables
        .set(names::CONTAINER_MAPPING, Value::Object(mapping).to_string());
}
