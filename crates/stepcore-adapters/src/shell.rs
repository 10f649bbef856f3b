use std::path::{Path, PathBuf};

use stepcore_runtime::{PlatformInfo, PlatformShells, Result, StepError};
use tracing::{debug, info};

/// Shells always resolved as system binaries
const SYSTEM_SHELLS: &[&str] = &["bash", "sh", "powershell", "pwsh"];

const SCRIPT_PLACEHOLDER: &str = "{0}";

/// Resolved executable and argument template for a script step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShell {
    /// Shell name used for template and content fix-ups
    pub shell_command: String,
    pub command_path: PathBuf,
    pub arguments_format: String,
}

/// Default argument template for a shell, keyed by executable name
pub fn arguments_format(shell: &str) -> &'static str {
    match shell_key(shell).as_str() {
        "cmd" => r#"/D /E:ON /V:OFF /S /C "CALL "{0}"""#,
        "pwsh" | "powershell" => r#"-command ". '{0}'""#,
        "bash" => "--noprofile --norc -e -o pipefail {0}",
        "sh" => "-e {0}",
        _ => SCRIPT_PLACEHOLDER,
    }
}

/// `C:\tools\PWSH.EXE` and `pwsh` both map to `pwsh`
fn shell_key(shell: &str) -> String {
    let name = Path::new(shell)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(shell)
        .to_ascii_lowercase();
    match name.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

/// Split `"<command> <args-template>"`; the command may be double-quoted
pub fn parse_shell_option(spec: &str) -> (String, String) {
    let spec = spec.trim();
    if let Some(rest) = spec.strip_prefix('"') {
        if let Some(end) = rest.find('"') {
            return (rest[..end].to_string(), rest[end + 1..].trim_start().to_string());
        }
    }
    match spec.split_once(char::is_whitespace) {
        Some((command, args)) => (command.to_string(), args.trim_start().to_string()),
        None => (spec.to_string(), String::new()),
    }
}

/// Substitute the script path into the template, escaping embedded quotes
pub fn format_arguments(template: &str, script_path: &str) -> String {
    let escaped = script_path.replace('"', "\\\"");
    template.replace(SCRIPT_PLACEHOLDER, &escaped)
}

/// Shell-specific fix-ups applied before the script body is written to disk
pub fn fix_up_script_contents(shell_command: &str, contents: &str, platform: &PlatformInfo) -> String {
    let fixed = match shell_key(shell_command).as_str() {
        "cmd" => format!("@echo off\n{contents}"),
        "pwsh" | "powershell" => format!(
            "$ErrorActionPreference = 'stop'\n{contents}\n\
             if ((Test-Path -LiteralPath variable:\\LASTEXITCODE)) {{ exit $LASTEXITCODE }}"
        ),
        _ => contents.to_string(),
    };

    if platform.crlf_scripts {
        fixed.replace("\r\n", "\n").replace('\n', "\r\n")
    } else {
        fixed
    }
}

/// Ordered directories searched for executables
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Prepend-path entries (execution order) followed by the process PATH
    pub fn from_env(prepend: &[String]) -> Self {
        let mut dirs: Vec<PathBuf> = prepend.iter().map(PathBuf::from).collect();
        if let Some(path) = std::env::var_os("PATH") {
            dirs.extend(std::env::split_paths(&path));
        }
        Self { dirs }
    }

    /// Locate an executable by name, or check an explicit path
    pub fn which(&self, command: &str) -> Option<PathBuf> {
        if command.is_empty() {
            return None;
        }
        if command.contains('/') || command.contains('\\') {
            let path = PathBuf::from(command);
            return is_executable(&path).then_some(path);
        }
        for dir in &self.dirs {
            for candidate in candidates(dir, command) {
                if is_executable(&candidate) {
                    debug!(command, path = %candidate.display(), "located executable");
                    return Some(candidate);
                }
            }
        }
        None
    }
}

#[cfg(windows)]
fn candidates(dir: &Path, command: &str) -> Vec<PathBuf> {
    if Path::new(command).extension().is_some() {
        return vec![dir.join(command)];
    }
    [".exe", ".cmd", ".bat", ".com"]
        .iter()
        .map(|ext| dir.join(format!("{command}{ext}")))
        .collect()
}

#[cfg(not(windows))]
fn candidates(dir: &Path, command: &str) -> Vec<PathBuf> {
    vec![dir.join(command)]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Maps a requested shell specifier to an executable and argument template
pub struct ShellResolver {
    shells: PlatformShells,
    search: SearchPath,
    /// Binaries resolve inside a container, so they need not exist locally
    container_host: bool,
}

impl ShellResolver {
    pub fn new(shells: PlatformShells, search: SearchPath, container_host: bool) -> Self {
        Self {
            shells,
            search,
            container_host,
        }
    }

    pub fn resolve(&self, shell: Option<&str>) -> Result<ResolvedShell> {
        let shell = shell.map(str::trim).filter(|s| !s.is_empty());
        let resolved = match shell {
            None => self.resolve_default()?,
            Some(name) if SYSTEM_SHELLS.contains(&name) => self.resolve_system(name)?,
            Some(spec) => self.resolve_custom(spec)?,
        };

        if !resolved.arguments_format.contains(SCRIPT_PLACEHOLDER) {
            return Err(StepError::InvalidShellSpec(
                shell.unwrap_or(&resolved.shell_command).to_string(),
            ));
        }
        Ok(resolved)
    }

    fn resolve_default(&self) -> Result<ResolvedShell> {
        let preferred = self.shells.preferred;
        let (shell_command, command_path) = match self.search.which(preferred) {
            Some(path) => (preferred, path),
            None => {
                let fallback = self.shells.fallback;
                info!(preferred, fallback, "Defaulting to fallback shell");
                (fallback, self.require(fallback)?)
            }
        };
        let template_shell = self.shells.template_shell.unwrap_or(shell_command);
        Ok(ResolvedShell {
            shell_command: shell_command.to_string(),
            command_path,
            arguments_format: arguments_format(template_shell).to_string(),
        })
    }

    fn resolve_system(&self, name: &str) -> Result<ResolvedShell> {
        // bash is run with the strict POSIX sh arguments
        let template_shell = if name == "bash" { "sh" } else { name };
        let (shell_command, command_path) = match self.search.which(name) {
            Some(path) => (name, path),
            None if self.container_host => (name, PathBuf::from(name)),
            None if name == "bash" => {
                info!("bash not found, falling back to sh");
                ("sh", self.require("sh")?)
            }
            None => return Err(StepError::ShellNotFound(name.to_string())),
        };
        Ok(ResolvedShell {
            shell_command: shell_command.to_string(),
            command_path,
            arguments_format: arguments_format(template_shell).to_string(),
        })
    }

    fn resolve_custom(&self, spec: &str) -> Result<ResolvedShell> {
        let (command, args) = parse_shell_option(spec);
        let path = Path::new(&command);

        if path.is_absolute() && path.is_file() {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&command)
                .to_string();
            let arguments_format = if args.is_empty() {
                arguments_format(&file_name).to_string()
            } else {
                args
            };
            return Ok(ResolvedShell {
                shell_command: file_name,
                command_path: path.to_path_buf(),
                arguments_format,
            });
        }

        let command_path = self.locate(&command)?;
        let arguments_format = if args.is_empty() {
            arguments_format(&command).to_string()
        } else {
            args
        };
        Ok(ResolvedShell {
            shell_command: command,
            command_path,
            arguments_format,
        })
    }

    fn locate(&self, command: &str) -> Result<PathBuf> {
        match self.search.which(command) {
            Some(path) => Ok(path),
            None if self.container_host => Ok(PathBuf::from(command)),
            None => Err(StepError::ShellNotFound(command.to_string())),
        }
    }

    fn require(&self, command: &str) -> Result<PathBuf> {
        self.search
            .which(command)
            .ok_or_else(|| StepError::ShellNotFound(command.to_string()))
    }
}
