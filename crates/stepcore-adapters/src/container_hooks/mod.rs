pub mod container;
pub mod manager;
pub mod wire;

pub use container::{parse_create_options, ContainerInfo, CreateOptions, MountVolume, PortMapping};
pub use manager::{ContainerHookManager, ScriptStepRequest};
pub use wire::{
    CleanupJobArgs, ContainerContext, ContainerRegistry, ContainerStepArgs, HookArgs, HookCommand,
    HookContainer, HookInput, HookResponse, HookResponseBody, PrepareJobArgs, PrepareJobResponse,
    ResponseContext, ScriptStepArgs,
};
