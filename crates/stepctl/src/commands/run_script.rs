use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use stepcore_adapters::{temp_script_path, HostStepHost, ScriptStep, ScriptStepEngine};
use stepcore_runtime::{ConsoleOutput, JobContext, RunnerConfig};
use tracing::info;

pub struct RunScriptArgs {
    pub file: Option<PathBuf>,
    pub script: Option<String>,
    pub shell: Option<String>,
    pub workdir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub prepend_path: Vec<String>,
    pub stdin: Option<String>,
}

/// Run one script step and return its exit code
pub async fn execute(args: RunScriptArgs, config: &RunnerConfig) -> Result<i32> {
    let mut ctx = JobContext::new(config, Arc::new(ConsoleOutput));
    ctx.prepend_path = args.prepend_path;
    super::cancel_on_ctrl_c(&ctx);

    let script_path = match (&args.file, &args.script) {
        (Some(file), _) => file.clone(),
        (None, Some(_)) => temp_script_path(&config.directories.temp, script_extension(args.shell.as_deref())),
        (None, None) => anyhow::bail!("either --file or --script is required"),
    };
    let step = ScriptStep {
        contents: args.script,
        script_path: Some(script_path.clone()),
        shell: args.shell,
        working_directory: args.workdir,
        environment: args.env.into_iter().collect(),
        standard_input: args.stdin,
    };

    info!(script = %script_path.display(), "Running script step");
    let engine = ScriptStepEngine::new(config);
    let exit_code = engine
        .run(&mut ctx, &step, &HostStepHost)
        .await
        .context("Script step failed to run")?;

    if step.contents.is_some() {
        let _ = std::fs::remove_file(&script_path);
    }
    Ok(exit_code)
}

/// Extension the shell expects for a temp script
fn script_extension(shell: Option<&str>) -> &'static str {
    let shell = shell.unwrap_or_default().trim().to_ascii_lowercase();
    if shell.starts_with("pwsh") || shell.starts_with("powershell") {
        "ps1"
    } else if shell.starts_with("cmd") {
        "cmd"
    } else if shell.is_empty() && cfg!(windows) {
        "ps1"
    } else {
        "sh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_extension() {
        assert_eq!(script_extension(Some("pwsh")), "ps1");
        assert_eq!(script_extension(Some("cmd")), "cmd");
        assert_eq!(script_extension(Some("bash")), "sh");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_inline_script_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RunnerConfig::default();
        config.directories.work = dir.path().to_path_buf();
        config.directories.temp = dir.path().join("temp");

        let args = RunScriptArgs {
            file: None,
            script: Some("exit 4".into()),
            shell: None,
            workdir: None,
            env: vec![],
            prepend_path: vec![],
            stdin: None,
        };
        assert_eq!(execute(args, &config).await.unwrap(), 4);
    }
}
