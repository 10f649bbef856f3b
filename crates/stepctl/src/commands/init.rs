use anyhow::Result;
use std::path::Path;

const DEFAULT_CONFIG: &str = r#"# stepctl configuration
# Environment knobs (AGENT_*) override the values below.

[directories]
work = "_work"
temp = "_work/_temp"
externals = "externals"
bin = "bin"

[hooks]
# Container hook program (.sh, .ps1 or .js); AGENT_CONTAINER_HOOKS_PATH
# path = "~/hooks/index.js"

[node]
# Bundled node runtime for .js hooks: use_node10 > use_node20_1 > use_node = "LTS"
use_node10 = false
use_node20_1 = false
use_node = ""

[process]
# Stop waiting for a step whose process tree could not be killed on cancel
continue_after_cancel_kill_attempt = false
"#;

/// Initialize a new config file
pub fn run_init(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Config already exists at {:?}", path);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    println!("Created config at {:?}", path);
    Ok(())
}
