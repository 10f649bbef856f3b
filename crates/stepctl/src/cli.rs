use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stepctl")]
#[command(about = "Run pipeline script steps and container hook commands", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new config file
    Init {
        /// Path for new config file
        #[arg(default_value = "stepctl.toml")]
        path: PathBuf,
    },
    /// Run a script step on this machine
    RunScript {
        /// Script file to run
        #[arg(long, conflicts_with = "script")]
        file: Option<PathBuf>,
        /// Inline script body, written to a temp file before running
        #[arg(long)]
        script: Option<String>,
        /// Shell name or "<command> <args-template>" containing {0}
        #[arg(long)]
        shell: Option<String>,
        /// Working directory (defaults to the work folder)
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Extra environment variable, KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,
        /// Directory to prepend to PATH (repeatable, last wins)
        #[arg(long = "prepend-path")]
        prepend_path: Vec<String>,
        /// Literal payload for the script's standard input
        #[arg(long)]
        stdin: Option<String>,
    },
    /// Drive the configured container hook program
    Hook {
        /// Job file holding containers, protocol state and variables
        #[arg(long, default_value = "job.json")]
        job: PathBuf,
        #[command(subcommand)]
        action: HookCommands,
    },
}

#[derive(Subcommand)]
pub enum HookCommands {
    /// Create the job and service containers
    PrepareJob,
    /// Run a container step
    RunContainerStep {
        /// Container name (defaults to the job container)
        #[arg(long)]
        container: Option<String>,
        /// Build from this Dockerfile instead of pulling the image
        #[arg(long)]
        dockerfile: Option<String>,
    },
    /// Run a script inside the job container
    RunScriptStep {
        /// Container name (defaults to the job container)
        #[arg(long)]
        container: Option<String>,
        #[arg(long)]
        entry_point: String,
        /// Arguments for the entry point, space separated
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        args: String,
        /// Working directory inside the container
        #[arg(long, default_value = "")]
        workdir: String,
        /// Environment variable for the step, KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,
    },
    /// Tear down the job's containers
    CleanupJob,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("A=b=c"),
            Ok(("A".to_string(), "b=c".to_string()))
        );
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn test_cli_parses_hook_subcommand() {
        let cli = Cli::try_parse_from([
            "stepctl",
            "hook",
            "--job",
            "/tmp/job.json",
            "run-script-step",
            "--entry-point",
            "bash",
            "--args",
            "-e /__w/_temp/x.sh",
            "--env",
            "FOO=bar",
        ])
        .unwrap();
        match cli.command {
            Commands::Hook { job, action } => {
                assert_eq!(job, PathBuf::from("/tmp/job.json"));
                match action {
                    HookCommands::RunScriptStep {
                        entry_point, args, env, ..
                    } => {
                        assert_eq!(entry_point, "bash");
                        assert_eq!(args, "-e /__w/_temp/x.sh");
                        assert_eq!(env, vec![("FOO".to_string(), "bar".to_string())]);
                    }
                    _ => panic!("expected run-script-step"),
                }
            }
            _ => panic!("expected hook"),
        }
    }
}
