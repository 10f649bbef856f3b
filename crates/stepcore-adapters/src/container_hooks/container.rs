use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::wire::{ContainerRegistry, HookContainer};

const DEFAULT_ENTRY_POINT: &str = "tail";
const DEFAULT_ENTRY_POINT_ARGS: [&str; 2] = ["-f", "/dev/null"];

/// Job or service container tracked for the lifetime of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerInfo {
    pub container_name: String,
    pub network_alias: Option<String>,
    pub image: Option<String>,
    pub create_options: String,
    pub environment: BTreeMap<String, String>,
    /// Port mappings declared by the pipeline, keyed by name
    pub user_port_mappings: BTreeMap<String, String>,
    /// Port mappings reported by the container runtime
    pub port_mappings: Vec<PortMapping>,
    /// Volumes the agent itself mounts (work, externals, temp)
    pub mount_volumes: Vec<MountVolume>,
    pub user_mount_volumes: BTreeMap<String, String>,
    pub registry_username: Option<String>,
    pub registry_password: Option<String>,
    pub registry_server: Option<String>,
    pub is_job_container: bool,

    // Written back from hook responses
    pub container_id: Option<String>,
    pub container_network: Option<String>,
    pub is_alpine: bool,
}

impl ContainerInfo {
    pub fn new(container_name: &str, image: &str) -> Self {
        Self {
            container_name: container_name.to_string(),
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    /// Name other containers on the network reach this one by
    pub fn alias(&self) -> &str {
        self.network_alias
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(&self.container_name)
    }

    /// Runtime-reported mappings, else the parsed declared ones
    pub fn effective_port_mappings(&self) -> Vec<PortMapping> {
        if !self.port_mappings.is_empty() {
            return self.port_mappings.clone();
        }
        self.user_port_mappings
            .values()
            .filter_map(|spec| PortMapping::parse(spec))
            .collect()
    }

    pub fn hook_container(&self) -> HookContainer {
        let parsed = parse_create_options(&self.create_options);
        let (entry_point, entry_point_args) = match parsed.entry_point {
            Some(entry_point) => (entry_point, parsed.entry_point_args),
            // Trailing args only apply to an explicit entrypoint
            None => (
                DEFAULT_ENTRY_POINT.to_string(),
                DEFAULT_ENTRY_POINT_ARGS.iter().map(|a| a.to_string()).collect(),
            ),
        };

        let registry = self
            .registry_username
            .as_deref()
            .filter(|u| !u.is_empty())
            .map(|username| ContainerRegistry {
                username: Some(username.to_string()),
                password: self.registry_password.clone(),
                server_url: self.registry_server.clone(),
            });

        HookContainer {
            image: self.image.clone(),
            dockerfile: None,
            entry_point,
            entry_point_args,
            working_directory: None,
            create_options: parsed.create_options,
            registry,
            environment_variables: self.environment.clone(),
            port_mappings: self.user_port_mappings.values().cloned().collect(),
            system_mount_volumes: self.mount_volumes.clone(),
            user_mount_volumes: self
                .user_mount_volumes
                .values()
                .map(|spec| MountVolume::parse(spec))
                .collect(),
        }
    }
}

/// `[ip:]hostPort:containerPort[/protocol]` or `containerPort[/protocol]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Empty when the runtime picks the host port
    pub host_port: String,
    pub container_port: String,
    pub protocol: String,
}

impl PortMapping {
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        let (ports, protocol) = match spec.split_once('/') {
            Some((ports, protocol)) => (ports, protocol.to_string()),
            None => (spec, "tcp".to_string()),
        };
        let mut parts = ports.rsplitn(3, ':');
        let container_port = parts.next().filter(|p| !p.is_empty())?.to_string();
        let host_port = parts.next().unwrap_or_default().to_string();
        Some(Self {
            host_port,
            container_port,
            protocol,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountVolume {
    pub source_volume_path: Option<String>,
    pub target_volume_path: String,
    pub read_only: bool,
}

impl MountVolume {
    /// `source:target[:ro]` or a bare `target`; Windows drive letters stay attached
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        let (spec, read_only) = match spec.strip_suffix(":ro") {
            Some(rest) => (rest, true),
            None => (spec, false),
        };

        let mut segments: Vec<String> = Vec::new();
        for part in spec.split(':') {
            let is_drive_path = part.starts_with('\\') || part.starts_with('/');
            match segments.last_mut() {
                Some(last) if last.len() == 1 && is_drive_path && last.chars().all(|c| c.is_ascii_alphabetic()) => {
                    last.push(':');
                    last.push_str(part);
                }
                _ => segments.push(part.to_string()),
            }
        }

        match segments.len() {
            0 | 1 => Self {
                source_volume_path: None,
                target_volume_path: spec.to_string(),
                read_only,
            },
            _ => Self {
                source_volume_path: Some(segments[0].clone()),
                target_volume_path: segments[1..].join(":"),
                read_only,
            },
        }
    }
}

/// Container create options split into the parts the hook program handles itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    /// Remaining options with `--entrypoint` and trailing `-- args` removed
    pub create_options: String,
    pub entry_point: Option<String>,
    pub entry_point_args: Vec<String>,
}

fn trailing_args_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?:^|\s)--\s+(.+)$").expect("valid trailing args pattern"))
}

fn entrypoint_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s*--entrypoint\s+(\S+)").expect("valid entrypoint pattern"))
}

/// Extract `--entrypoint <value>` and a trailing `-- <args...>` from create options.
/// Both are stripped from the returned options.
pub fn parse_create_options(options: &str) -> CreateOptions {
    let (head, entry_point_args) = match trailing_args_pattern().captures(options) {
        Some(caps) => {
            let start = caps.get(0).map_or(options.len(), |m| m.start());
            let args = caps
                .get(1)
                .map(|m| m.as_str().split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            (&options[..start], args)
        }
        None => (options, Vec::new()),
    };

    let entry_point = entrypoint_pattern()
        .captures(head)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    let create_options = entrypoint_pattern().replace_all(head, "").trim().to_string();

    CreateOptions {
        create_options,
        entry_point,
        entry_point_args,
    }
}
