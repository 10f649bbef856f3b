pub mod config;
pub mod context;
pub mod error;
pub mod platform;
pub mod step_host;
pub mod telemetry;

pub use config::{DirectoriesConfig, HooksConfig, NodeConfig, ProcessConfig, RunnerConfig};
pub use context::{
    env_name, names, CommandProcessor, ConsoleOutput, HookState, JobContext, MemoryOutput,
    NoCommands, OutputSink, OutputStream, TaskResult, Variable, Variables,
};
pub use error::{Result, StepError, HOOK_FAILURE_GUIDANCE};
pub use platform::{Platform, PlatformInfo, PlatformShells};
pub use step_host::{LineCallback, ProcessRequest, StepHost};
pub use telemetry::{TelemetryPublisher, TelemetryRecord, TracingTelemetry};

const DEFAULT_LOG_FILTER: &str = "info";

/// Initialize structured JSON logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    fmt()
        .json()
        .with_env_filter(log_filter(directives.as_deref()))
        .with_writer(std::io::stderr)
        .init();
}

/// `RUST_LOG` directives when set and valid, else `info`
fn log_filter(directives: Option<&str>) -> tracing_subscriber::EnvFilter {
    use tracing_subscriber::EnvFilter;

    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}
