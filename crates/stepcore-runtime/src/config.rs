use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment knob naming the container hook program
pub const CONTAINER_HOOKS_PATH_KNOB: &str = "AGENT_CONTAINER_HOOKS_PATH";
pub const USE_NODE10_KNOB: &str = "AGENT_USE_NODE10";
pub const USE_NODE20_1_KNOB: &str = "AGENT_USE_NODE20_1";
pub const USE_NODE_KNOB: &str = "AGENT_USE_NODE";
pub const CONTINUE_AFTER_KILL_KNOB: &str = "AGENT_CONTINUE_AFTER_CANCEL_PROCESSTREEKILL_ATTEMPT";
pub const WORK_FOLDER_KNOB: &str = "AGENT_WORKFOLDER";
pub const TEMP_DIRECTORY_KNOB: &str = "AGENT_TEMPDIRECTORY";

const DEFAULT_NODE_VERSION: &str = "node10";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub directories: DirectoriesConfig,

    #[serde(default)]
    pub hooks: HooksConfig,

    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub process: ProcessConfig,
}

/// Well-known agent directories
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectoriesConfig {
    #[serde(default = "default_work_dir")]
    pub work: PathBuf,

    #[serde(default = "default_temp_dir")]
    pub temp: PathBuf,

    #[serde(default = "default_externals_dir")]
    pub externals: PathBuf,

    #[serde(default = "default_bin_dir")]
    pub bin: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HooksConfig {
    /// Path to the container hook program (.sh, .ps1 or .js)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Node runtime selection knobs
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub use_node10: bool,

    #[serde(default)]
    pub use_node20_1: bool,

    #[serde(default)]
    pub use_node: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProcessConfig {
    /// Stop waiting for a cancelled process once the kill attempt has failed
    #[serde(default)]
    pub continue_after_cancel_kill_attempt: bool,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("_work")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("_work/_temp")
}

fn default_externals_dir() -> PathBuf {
    PathBuf::from("externals")
}

fn default_bin_dir() -> PathBuf {
    PathBuf::from("bin")
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            work: default_work_dir(),
            temp: default_temp_dir(),
            externals: default_externals_dir(),
            bin: default_bin_dir(),
        }
    }
}

impl NodeConfig {
    /// Internal node runtime folder name.
    /// Precedence: node10 pin, node20_1 pin, `LTS` alias, default.
    pub fn version(&self) -> &'static str {
        if self.use_node10 {
            return "node10";
        }
        if self.use_node20_1 {
            return "node20_1";
        }
        if self.use_node.eq_ignore_ascii_case("LTS") {
            return "node16";
        }
        DEFAULT_NODE_VERSION
    }
}

impl RunnerConfig {
    /// Load config from file or use defaults, then apply environment knobs
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .context(format!("Failed to read config file: {:?}", path))?;
                toml::from_str::<RunnerConfig>(&content)
                    .context("Failed to parse TOML config")?
            }
            None => RunnerConfig::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Override file values with knobs found through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(CONTAINER_HOOKS_PATH_KNOB).filter(|v| !v.is_empty()) {
            self.hooks.path = Some(PathBuf::from(path));
        }
        if let Some(v) = lookup(USE_NODE10_KNOB) {
            self.node.use_node10 = as_bool(&v);
        }
        if let Some(v) = lookup(USE_NODE20_1_KNOB) {
            self.node.use_node20_1 = as_bool(&v);
        }
        if let Some(v) = lookup(USE_NODE_KNOB) {
            self.node.use_node = v;
        }
        if let Some(v) = lookup(CONTINUE_AFTER_KILL_KNOB) {
            self.process.continue_after_cancel_kill_attempt = as_bool(&v);
        }
        if let Some(dir) = lookup(WORK_FOLDER_KNOB).filter(|v| !v.is_empty()) {
            self.directories.work = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(TEMP_DIRECTORY_KNOB).filter(|v| !v.is_empty()) {
            self.directories.temp = PathBuf::from(dir);
        }
    }
}

fn as_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
