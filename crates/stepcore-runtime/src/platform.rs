use std::sync::OnceLock;

/// Host operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

/// Default-shell capabilities of a platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformShells {
    /// Shell tried first when a step names no shell
    pub preferred: &'static str,
    /// Shell required when the preferred one is missing
    pub fallback: &'static str,
    /// Shell whose argument template is used for the default shell.
    /// `None` means the template of whichever shell was found.
    pub template_shell: Option<&'static str>,
}

/// Everything platform-dependent the step engine needs, looked up once
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    pub platform: Platform,
    pub shells: PlatformShells,
    pub path_separator: char,
    pub exe_extension: &'static str,
    /// Scripts must be written with CRLF line endings
    pub crlf_scripts: bool,
}

impl Platform {
    /// Detect the platform from the running binary
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => Platform::Windows,
            "macos" => Platform::MacOs,
            _ => Platform::Linux,
        }
    }

    pub fn info(self) -> PlatformInfo {
        match self {
            Platform::Windows => PlatformInfo {
                platform: self,
                shells: PlatformShells {
                    preferred: "pwsh",
                    fallback: "powershell",
                    template_shell: None,
                },
                path_separator: ';',
                exe_extension: ".exe",
                crlf_scripts: true,
            },
            Platform::Linux | Platform::MacOs => PlatformInfo {
                platform: self,
                shells: PlatformShells {
                    preferred: "bash",
                    fallback: "sh",
                    template_shell: Some("sh"),
                },
                path_separator: ':',
                exe_extension: "",
                crlf_scripts: false,
            },
        }
    }
}

/// Platform table for the running host, resolved on first use
pub fn host() -> &'static PlatformInfo {
    static HOST: OnceLock<PlatformInfo> = OnceLock::new();
    HOST.get_or_init(|| Platform::current().info())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_prefers_pwsh() {
        let info = Platform::Windows.info();
        assert_eq!(info.shells.preferred, "pwsh");
        assert_eq!(info.shells.fallback, "powershell");
        assert_eq!(info.path_separator, ';');
        assert!(info.crlf_scripts);
    }

    #[test]
    fn test_unix_defaults_to_sh_template() {
        let info = Platform::Linux.info();
        assert_eq!(info.shells.preferred, "bash");
        assert_eq!(info.shells.template_shell, Some("sh"));
        assert_eq!(info.exe_extension, "");
    }

    #[cfg(unix)]
    #[test]
    fn test_host_is_resolved_once() {
        let first = host() as *const PlatformInfo;
        let second = host() as *const PlatformInfo;
        assert_eq!(first, second);
        assert_eq!(host().path_separator, ':');
    }
}
