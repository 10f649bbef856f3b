use async_trait::async_trait;
use std::path::{Path, PathBuf};
use stepcore_runtime::{LineCallback, ProcessRequest, Result, StepHost};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::process::{quote_argument, HostStepHost};

/// Used when the image's own PATH was not reported
const DEFAULT_CONTAINER_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Host directory mounted into the container at `container`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    pub host: PathBuf,
    pub container: PathBuf,
}

/// Runs steps inside a running container through `docker exec`
pub struct ContainerStepHost {
    container_id: String,
    docker: PathBuf,
    mappings: Vec<PathMapping>,
    /// Agent-side directory the docker client itself runs in
    host_working_directory: PathBuf,
    /// PATH reported by the container image, if known
    container_path: Option<String>,
    inner: HostStepHost,
}

impl ContainerStepHost {
    pub fn new(container_id: &str, host_working_directory: PathBuf) -> Self {
        Self {
            container_id: container_id.to_string(),
            docker: PathBuf::from("docker"),
            mappings: Vec::new(),
            host_working_directory,
            container_path: None,
            inner: HostStepHost,
        }
    }

    pub fn with_container_path(mut self, path: impl Into<String>) -> Self {
        self.container_path = Some(path.into());
        self
    }

    pub fn with_mapping(mut self, host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        self.mappings.push(PathMapping {
            host: host.into(),
            container: container.into(),
        });
        self
    }

    pub fn with_docker(mut self, docker: PathBuf) -> Self {
        self.docker = docker;
        self
    }

    /// PATH inside the container: prepend entries ahead of the image's PATH
    fn container_path_for(&self, request: &ProcessRequest) -> Option<String> {
        if request.prepend_path.is_empty() {
            return None;
        }
        let image_path = self
            .container_path
            .as_deref()
            .unwrap_or(DEFAULT_CONTAINER_PATH);
        Some(format!("{}:{image_path}", request.prepend_path.join(":")))
    }

    /// `docker exec` arguments for a request already translated to container paths.
    /// Environment values travel through the docker client's environment, never argv.
    pub fn exec_arguments(&self, request: &ProcessRequest) -> String {
        let mut args = format!(
            "exec -i -w {} ",
            quote_argument(&request.working_directory)
        );
        // PATH must not leak into the docker client's own lookup
        if let Some(path) = self.container_path_for(request) {
            args.push_str(&format!("-e \"PATH={}\" ", path.replace('"', "\\\"")));
        }
        let mut names: Vec<&String> = request
            .environment
            .keys()
            .filter(|name| !name.eq_ignore_ascii_case("PATH"))
            .collect();
        names.sort();
        for name in names {
            args.push_str("-e ");
            args.push_str(name);
            args.push(' ');
        }
        args.push_str(&self.container_id);
        args.push(' ');
        args.push_str(&quote_argument(&request.file_name));
        if !request.arguments.is_empty() {
            args.push(' ');
            args.push_str(&request.arguments);
        }
        args
    }
}

#[async_trait]
impl StepHost for ContainerStepHost {
    fn is_container(&self) -> bool {
        true
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        self.mappings
            .iter()
            .find_map(|m| {
                path.strip_prefix(&m.host)
                    .ok()
                    .map(|rest| m.container.join(rest))
            })
            .unwrap_or_else(|| path.to_path_buf())
    }

    async fn execute(
        &self,
        request: ProcessRequest,
        on_line: LineCallback,
        cancellation: CancellationToken,
    ) -> Result<i32> {
        let arguments = self.exec_arguments(&request);
        debug!(container = %self.container_id, %arguments, "docker exec");
        let mut environment = request.environment;
        environment.retain(|name, _| !name.eq_ignore_ascii_case("PATH"));
        let docker_request = ProcessRequest {
            working_directory: self.host_working_directory.clone(),
            file_name: self.docker.clone(),
            arguments,
            environment,
            prepend_path: Vec::new(),
            ..request
        };
        self.inner.execute(docker_request, on_line, cancellation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn host() -> ContainerStepHost {
        ContainerStepHost::new("abc123", PathBuf::from("/agent/_work"))
            .with_mapping("/agent/_work", "/__w")
            .with_mapping("/agent/externals", "/__e")
    }

    #[test]
    fn test_resolve_path_translates_mounted_prefixes() {
        let host = host();
        assert!(host.is_container());
        assert_eq!(
            host.resolve_path(Path::new("/agent/_work/1/s")),
            PathBuf::from("/__w/1/s")
        );
        assert_eq!(
            host.resolve_path(Path::new("/agent/externals/node16/bin/node")),
            PathBuf::from("/__e/node16/bin/node")
        );
        assert_eq!(host.resolve_path(Path::new("/etc/hosts")), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_exec_arguments_pass_env_names_only() {
        let request = ProcessRequest {
            working_directory: PathBuf::from("/__w/1/s"),
            file_name: PathBuf::from("sh"),
            arguments: "-e /__w/_temp/step.sh".into(),
            environment: HashMap::from([
                ("TOKEN".to_string(), "secret-value".to_string()),
                ("BUILD_ID".to_string(), "7".to_string()),
            ]),
            ..Default::default()
        };

        let args = host().exec_arguments(&request);
        assert_eq!(
            args,
            r#"exec -i -w "/__w/1/s" -e BUILD_ID -e TOKEN abc123 "sh" -e /__w/_temp/step.sh"#
        );
        assert!(!args.contains("secret-value"));
    }

    #[test]
    fn test_exec_arguments_prepend_container_path() {
        let host = host().with_container_path("/usr/local/bin:/usr/bin");
        let request = ProcessRequest {
            working_directory: PathBuf::from("/__w"),
            file_name: PathBuf::from("bash"),
            prepend_path: vec!["/__t/node/bin".into()],
            environment: HashMap::from([("PATH".to_string(), "/ignored".to_string())]),
            ..Default::default()
        };

        let args = host.exec_arguments(&request);
        assert_eq!(
            args,
            r#"exec -i -w "/__w" -e "PATH=/__t/node/bin:/usr/local/bin:/usr/bin" abc123 "bash""#
        );
    }

    #[test]
    fn test_exec_arguments_keep_standard_path_when_image_path_unknown() {
        let request = ProcessRequest {
            working_directory: PathBuf::from("/__w"),
            file_name: PathBuf::from("sh"),
            prepend_path: vec!["/__t/go/bin".into(), "/__t/node/bin".into()],
            ..Default::default()
        };

        let args = host().exec_arguments(&request);
        assert!(args.contains(
            r#"-e "PATH=/__t/go/bin:/__t/node/bin:/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin""#
        ));
    }

    #[test]
    fn test_exec_arguments_skip_path_without_prepend_entries() {
        let request = ProcessRequest {
            working_directory: PathBuf::from("/__w"),
            file_name: PathBuf::from("sh"),
            ..Default::default()
        };
        assert!(!host().exec_arguments(&request).contains("PATH="));
    }
}
