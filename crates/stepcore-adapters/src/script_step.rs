use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stepcore_runtime::{
    platform, JobContext, LineCallback, Platform, PlatformInfo, ProcessRequest, Result,
    RunnerConfig, StepError, StepHost, TaskResult,
};
use tracing::debug;

use crate::process::quote_argument;
use crate::shell::{fix_up_script_contents, format_arguments, SearchPath, ShellResolver};

const MACOS_RUN_INVOKER: &str = "macos-run-invoker.js";

/// Inputs for one script step
#[derive(Debug, Clone, Default)]
pub struct ScriptStep {
    /// Inline script body; written to `script_path` before launch when set
    pub contents: Option<String>,
    pub script_path: Option<PathBuf>,
    /// Shell name or `"<command> <args-template>"`; platform default when unset
    pub shell: Option<String>,
    pub working_directory: Option<PathBuf>,
    pub environment: HashMap<String, String>,
    pub standard_input: Option<String>,
}

impl ScriptStep {
    pub fn from_path(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: Some(script_path.into()),
            ..Default::default()
        }
    }

    pub fn with_contents(mut self, contents: impl Into<String>) -> Self {
        self.contents = Some(contents.into());
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }
}

/// Builds script command lines and runs them on a step host
#[derive(Debug, Clone)]
pub struct ScriptStepEngine {
    platform: PlatformInfo,
    externals_directory: PathBuf,
    bin_directory: PathBuf,
    node_version: &'static str,
    continue_after_cancel_kill_attempt: bool,
}

impl ScriptStepEngine {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            platform: platform::host().clone(),
            externals_directory: config.directories.externals.clone(),
            bin_directory: config.directories.bin.clone(),
            node_version: config.node.version(),
            continue_after_cancel_kill_attempt: config.process.continue_after_cancel_kill_attempt,
        }
    }

    pub fn with_platform(mut self, platform: PlatformInfo) -> Self {
        self.platform = platform;
        self
    }

    pub fn platform(&self) -> &PlatformInfo {
        &self.platform
    }

    /// Bundled node runtime selected by configuration
    pub fn node_path(&self) -> PathBuf {
        self.externals_directory
            .join(self.node_version)
            .join("bin")
            .join(format!("node{}", self.platform.exe_extension))
    }

    /// Run the step and record a failed result on a non-zero exit
    pub async fn run(
        &self,
        ctx: &mut JobContext,
        step: &ScriptStep,
        host: &dyn StepHost,
    ) -> Result<i32> {
        let exit_code = self.execute(ctx, step, host).await?;
        if exit_code != 0 {
            ctx.error(&format!("Process completed with exit code {exit_code}."));
            ctx.result = Some(TaskResult::Failed);
        }
        Ok(exit_code)
    }

    /// Run the step and return the raw exit code without touching the step result
    pub async fn execute(
        &self,
        ctx: &JobContext,
        step: &ScriptStep,
        host: &dyn StepHost,
    ) -> Result<i32> {
        let prepend_path = ctx.prepend_path_in_execution_order();
        let resolver = ShellResolver::new(
            self.platform.shells.clone(),
            SearchPath::from_env(&prepend_path),
            host.is_container(),
        );
        let shell = resolver.resolve(step.shell.as_deref())?;

        let script_path = step
            .script_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| StepError::InvalidInput("Expected 'path' input to be set".into()))?;
        let arguments = format_arguments(
            &shell.arguments_format,
            &host.resolve_path(script_path).display().to_string(),
        );

        if let Some(contents) = &step.contents {
            let fixed = fix_up_script_contents(&shell.shell_command, contents, &self.platform);
            if let Some(parent) = script_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(script_path, fixed).await?;
        }

        let mut environment = ctx.variables.to_environment();
        environment.extend(step.environment.clone());

        let (file_name, arguments) =
            self.invocation(shell.command_path, arguments, &environment, host.is_container());
        ctx.debug(&format!("{} {}", file_name.display(), arguments));

        let working_directory = step
            .working_directory
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| ctx.work_directory.clone());

        let request = ProcessRequest {
            working_directory: host.resolve_path(&working_directory),
            file_name,
            arguments,
            environment,
            prepend_path,
            standard_input: step.standard_input.clone(),
            continue_after_cancel_kill_attempt: self.continue_after_cancel_kill_attempt,
        };
        debug!(
            file = %request.file_name.display(),
            cwd = %request.working_directory.display(),
            stdin = request.standard_input.is_some(),
            "starting script step"
        );

        host.execute(request, route_output(ctx), ctx.cancellation.clone())
            .await
    }

    /// macOS strips `DYLD_INSERT_LIBRARIES` from SIP-protected shells, so those
    /// launches go through the node invoker instead
    fn invocation(
        &self,
        command_path: PathBuf,
        arguments: String,
        environment: &HashMap<String, String>,
        in_container: bool,
    ) -> (PathBuf, String) {
        if self.platform.platform != Platform::MacOs
            || in_container
            || !environment.contains_key("DYLD_INSERT_LIBRARIES")
        {
            return (command_path, arguments);
        }
        let invoker = self.bin_directory.join(MACOS_RUN_INVOKER);
        let arguments = format!(
            "{} {} {}",
            quote_argument(&invoker),
            quote_argument(&command_path),
            arguments
        );
        (self.node_path(), arguments)
    }
}

/// Lines go to the command processor first, then to the output sink
fn route_output(ctx: &JobContext) -> LineCallback {
    let sink = ctx.output_sink();
    let commands = ctx.command_processor();
    Arc::new(move |_stream, line| {
        if !commands.try_process(line) {
            sink.output(line);
        }
    })
}

/// Default script path for inline contents under the temp directory
pub fn temp_script_path(temp_directory: &Path, extension: &str) -> PathBuf {
    temp_directory.join(format!("{}.{extension}", uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(platform: Platform) -> ScriptStepEngine {
        ScriptStepEngine::new(&RunnerConfig::default()).with_platform(platform.info())
    }

    #[test]
    fn test_node_path_uses_selected_runtime() {
        assert_eq!(
            engine(Platform::Linux).node_path(),
            PathBuf::from("externals/node10/bin/node")
        );
        assert_eq!(
            engine(Platform::Windows).node_path(),
            PathBuf::from("externals").join("node10").join("bin").join("node.exe")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_macos_invoker_wraps_dyld_launches() {
        let env = HashMap::from([("DYLD_INSERT_LIBRARIES".to_string(), "/x.dylib".to_string())]);
        let (file, args) = engine(Platform::MacOs).invocation(
            PathBuf::from("/bin/bash"),
            "-e /tmp/s.sh".into(),
            &env,
            false,
        );
        assert_eq!(file, PathBuf::from("externals/node10/bin/node"));
        assert_eq!(
            args,
            r#""bin/macos-run-invoker.js" "/bin/bash" -e /tmp/s.sh"#
        );
    }

    #[test]
    fn test_invoker_only_on_macos_with_dyld() {
        let env = HashMap::from([("DYLD_INSERT_LIBRARIES".to_string(), "/x.dylib".to_string())]);
        let (file, _) = engine(Platform::Linux).invocation(
            PathBuf::from("/bin/bash"),
            String::new(),
            &env,
            false,
        );
        assert_eq!(file, PathBuf::from("/bin/bash"));

        let (file, _) = engine(Platform::MacOs).invocation(
            PathBuf::from("/bin/bash"),
            String::new(),
            &HashMap::new(),
            false,
        );
        assert_eq!(file, PathBuf::from("/bin/bash"));
    }

    #[test]
    fn test_temp_script_path_is_unique() {
        let dir = Path::new("/tmp/_temp");
        let a = temp_script_path(dir, "sh");
        let b = temp_script_path(dir, "sh");
        assert_ne!(a, b);
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("sh"));
        assert!(a.starts_with(dir));
    }
}
