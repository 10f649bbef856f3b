use anyhow::Result;
use std::path::{Path, PathBuf};
use stepcore_runtime::RunnerConfig;

/// Load config from file or use defaults, with `~` expanded in paths
pub fn load_config(path: Option<&Path>) -> Result<RunnerConfig> {
    let mut config = RunnerConfig::load(path)?;
    config.hooks.path = config.hooks.path.as_deref().map(expand);
    config.directories.work = expand(&config.directories.work);
    config.directories.temp = expand(&config.directories.temp);
    config.directories.externals = expand(&config.directories.externals);
    config.directories.bin = expand(&config.directories.bin);
    Ok(config)
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_expands_hook_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stepctl.toml");
        std::fs::write(&path, "[hooks]\npath = \"~/hooks/index.js\"\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        let hook = config.hooks.path.unwrap();
        if std::env::var_os("HOME").is_some() {
            assert!(!hook.to_string_lossy().starts_with('~'));
        }
        assert!(hook.ends_with("hooks/index.js"));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
