mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use commands::run_script::RunScriptArgs;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    stepcore_runtime::init_logging();

    let cli = Cli::parse();

    // Handle init command early (doesn't need config)
    if let Commands::Init { path } = &cli.command {
        return commands::init::run_init(path);
    }

    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { .. } => unreachable!(),
        Commands::RunScript {
            file,
            script,
            shell,
            workdir,
            env,
            prepend_path,
            stdin,
        } => {
            let args = RunScriptArgs {
                file,
                script,
                shell,
                workdir,
                env,
                prepend_path,
                stdin,
            };
            let exit_code = commands::run_script::execute(args, &config).await?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }
        Commands::Hook { job, action } => {
            commands::hook::execute(&job, action, &config).await?;
        }
    }

    Ok(())
}
