use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use stepcore_runtime::HookState;

use super::container::MountVolume;

/// Hook commands with their fixed wire names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookCommand {
    PrepareJob,
    RunContainerStep,
    RunScriptStep,
    CleanupJob,
}

impl HookCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookCommand::PrepareJob => "prepare_job",
            HookCommand::RunContainerStep => "run_container_step",
            HookCommand::RunScriptStep => "run_script_step",
            HookCommand::CleanupJob => "cleanup_job",
        }
    }
}

impl fmt::Display for HookCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request written to the hook program's standard input
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookInput {
    pub command: HookCommand,
    pub response_file: PathBuf,
    pub args: HookArgs,
    pub state: Option<HookState>,
}

impl HookInput {
    pub fn new(args: HookArgs, response_file: PathBuf, state: Option<HookState>) -> Self {
        Self {
            command: args.command(),
            response_file,
            args,
            state,
        }
    }
}

/// Per-command arguments
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HookArgs {
    PrepareJob(PrepareJobArgs),
    ContainerStep(ContainerStepArgs),
    ScriptStep(ScriptStepArgs),
    CleanupJob(CleanupJobArgs),
}

impl HookArgs {
    pub fn command(&self) -> HookCommand {
        match self {
            HookArgs::PrepareJob(_) => HookCommand::PrepareJob,
            HookArgs::ContainerStep(_) => HookCommand::RunContainerStep,
            HookArgs::ScriptStep(_) => HookCommand::RunScriptStep,
            HookArgs::CleanupJob(_) => HookCommand::CleanupJob,
        }
    }

    /// The hook must answer with a response that reports `isAlpine`
    pub fn requires_alpine_detection(&self) -> bool {
        match self {
            HookArgs::PrepareJob(args) => args.container.is_some(),
            HookArgs::ContainerStep(_) | HookArgs::ScriptStep(_) | HookArgs::CleanupJob(_) => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareJobArgs {
    pub container: Option<HookContainer>,
    pub services: Vec<HookContainer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainerStepArgs {
    #[serde(flatten)]
    pub container: HookContainer,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStepArgs {
    pub entry_point: String,
    pub entry_point_args: Vec<String>,
    pub environment_variables: BTreeMap<String, String>,
    /// Execution order: most recently prepended first
    pub prepend_path: Vec<String>,
    pub working_directory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupJobArgs {}

/// Container description sent to the hook program
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookContainer {
    pub image: Option<String>,
    pub dockerfile: Option<String>,
    pub entry_point: String,
    pub entry_point_args: Vec<String>,
    pub working_directory: Option<String>,
    pub create_options: String,
    pub registry: Option<ContainerRegistry>,
    pub environment_variables: BTreeMap<String, String>,
    pub port_mappings: Vec<String>,
    pub system_mount_volumes: Vec<MountVolume>,
    pub user_mount_volumes: Vec<MountVolume>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRegistry {
    pub username: Option<String>,
    pub password: Option<String>,
    pub server_url: Option<String>,
}

/// Response body read back from the response file
pub trait HookResponseBody: DeserializeOwned {
    fn state(&self) -> Option<&HookState>;

    /// Check the response fits the request; the error is a reason for operators
    fn validate(&self, _input: &HookInput) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HookResponse {
    pub state: Option<HookState>,
}

impl HookResponseBody for HookResponse {
    fn state(&self) -> Option<&HookState> {
        self.state.as_ref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareJobResponse {
    pub state: Option<HookState>,
    pub is_alpine: Option<bool>,
    pub context: Option<ResponseContext>,
}

impl HookResponseBody for PrepareJobResponse {
    fn state(&self) -> Option<&HookState> {
        self.state.as_ref()
    }

    fn validate(&self, input: &HookInput) -> Result<(), String> {
        let HookArgs::PrepareJob(args) = &input.args else {
            return Err(format!(
                "a prepare_job response was read for command '{}'",
                input.command
            ));
        };
        if args.container.is_some() && self.is_alpine.is_none() {
            return Err("response for a job container must report 'isAlpine'".into());
        }
        let reported = self.context.as_ref().map_or(0, |c| c.services.len());
        if reported > args.services.len() {
            return Err(format!(
                "response lists {reported} services but {} were requested",
                args.services.len()
            ));
        }
        Ok(())
    }
}

/// Identifiers the hook program assigned to the job's containers
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseContext {
    pub container: Option<ContainerContext>,
    #[serde(default)]
    pub services: Vec<ContainerContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContainerContext {
    pub id: Option<String>,
    pub network: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prepare(container: Option<HookContainer>) -> HookArgs {
        HookArgs::PrepareJob(PrepareJobArgs {
            container,
            services: vec![],
        })
    }

    #[test]
    fn test_alpine_detection_only_for_prepare_job_with_container() {
        assert!(prepare(Some(HookContainer::default())).requires_alpine_detection());
        assert!(!prepare(None).requires_alpine_detection());
        assert!(!HookArgs::ContainerStep(ContainerStepArgs::default()).requires_alpine_detection());
        assert!(!HookArgs::ScriptStep(ScriptStepArgs::default()).requires_alpine_detection());
        assert!(!HookArgs::CleanupJob(CleanupJobArgs {}).requires_alpine_detection());
    }

    #[test]
    fn test_input_serializes_camel_case_with_wire_command() {
        let input = HookInput::new(
            HookArgs::ScriptStep(ScriptStepArgs {
                entry_point: "bash".into(),
                entry_point_args: vec!["-e".into(), "/__w/_temp/x.sh".into()],
                prepend_path: vec!["/tools".into()],
                working_directory: "/__w/1/s".into(),
                ..Default::default()
            }),
            PathBuf::from("/tmp/r.json"),
            None,
        );

        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["command"], "run_script_step");
        assert_eq!(value["responseFile"], "/tmp/r.json");
        assert_eq!(value["state"], serde_json::Value::Null);
        assert_eq!(value["args"]["entryPoint"], "bash");
        assert_eq!(value["args"]["entryPointArgs"], json!(["-e", "/__w/_temp/x.sh"]));
        assert_eq!(value["args"]["prependPath"], json!(["/tools"]));
        assert_eq!(value["args"]["workingDirectory"], "/__w/1/s");
    }

    #[test]
    fn test_container_step_args_are_flattened() {
        let args = HookArgs::ContainerStep(ContainerStepArgs {
            container: HookContainer {
                image: Some("node:20".into()),
                entry_point: "tail".into(),
                ..Default::default()
            },
        });
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value["image"], "node:20");
        assert_eq!(value["entryPoint"], "tail");
        assert!(value.get("container").is_none());
    }

    #[test]
    fn test_cleanup_args_serialize_as_empty_object() {
        let value = serde_json::to_value(HookArgs::CleanupJob(CleanupJobArgs {})).unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn test_prepare_response_parses_context() {
        let response: PrepareJobResponse = serde_json::from_value(json!({
            "state": {"network": "net1"},
            "isAlpine": true,
            "context": {
                "container": {"id": "c1", "network": "net1"},
                "services": [{"id": "s1", "network": "net1"}]
            }
        }))
        .unwrap();
        assert_eq!(response.is_alpine, Some(true));
        let context = response.context.unwrap();
        assert_eq!(context.container.unwrap().id.as_deref(), Some("c1"));
        assert_eq!(context.services.len(), 1);
        assert_eq!(response.state.unwrap()["network"], "net1");
    }

    #[test]
    fn test_response_without_state() {
        let response: HookResponse = serde_json::from_str("{}").unwrap();
        assert!(response.state().is_none());
    }

    fn prepare_input(container: Option<HookContainer>, services: usize) -> HookInput {
        HookInput::new(
            HookArgs::PrepareJob(PrepareJobArgs {
                container,
                services: vec![HookContainer::default(); services],
            }),
            PathBuf::from("/tmp/r.json"),
            None,
        )
    }

    #[test]
    fn test_prepare_response_requires_alpine_flag_for_job_container() {
        let input = prepare_input(Some(HookContainer::default()), 0);
        let err = PrepareJobResponse::default().validate(&input).unwrap_err();
        assert!(err.contains("isAlpine"));

        let ok = PrepareJobResponse {
            is_alpine: Some(false),
            ..Default::default()
        };
        assert!(ok.validate(&input).is_ok());
        assert!(PrepareJobResponse::default()
            .validate(&prepare_input(None, 0))
            .is_ok());
    }

    #[test]
    fn test_prepare_response_rejects_unrequested_services() {
        let response: PrepareJobResponse = serde_json::from_value(json!({
            "context": {"services": [{"id": "s1"}, {"id": "s2"}]}
        }))
        .unwrap();
        assert!(response.validate(&prepare_input(None, 2)).is_ok());
        let err = response.validate(&prepare_input(None, 1)).unwrap_err();
        assert!(err.contains("2 services but 1"));
    }

    #[test]
    fn test_prepare_response_rejected_for_other_commands() {
        let input = HookInput::new(
            HookArgs::CleanupJob(CleanupJobArgs {}),
            PathBuf::from("/tmp/r.json"),
            None,
        );
        assert!(PrepareJobResponse::default().validate(&input).is_err());
    }
}
