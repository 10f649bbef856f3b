pub mod container_hooks;
pub mod container_step_host;
pub mod process;
pub mod script_step;
pub mod shell;

pub use container_hooks::{ContainerHookManager, ContainerInfo, HookCommand, ScriptStepRequest};
pub use container_step_host::{ContainerStepHost, PathMapping};
pub use process::{quote_argument, split_arguments, HostStepHost};
pub use script_step::{temp_script_path, ScriptStep, ScriptStepEngine};
pub use shell::{ResolvedShell, SearchPath, ShellResolver};
