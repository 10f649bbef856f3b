use std::process::Command;

#[test]
fn test_stepctl_version() {
    let output = Command::new("cargo")
        .args(["run", "--bin", "stepctl", "--", "--version"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("0.1.0"));
}

#[test]
fn test_stepctl_help() {
    let output = Command::new("cargo")
        .args(["run", "--bin", "stepctl", "--", "--help"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("run-script"));
    assert!(stdout.contains("hook"));
}

#[test]
fn test_stepctl_hook_help_lists_commands() {
    let output = Command::new("cargo")
        .args(["run", "--bin", "stepctl", "--", "hook", "--help"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["prepare-job", "run-container-step", "run-script-step", "cleanup-job"] {
        assert!(stdout.contains(command), "missing {command}");
    }
}

#[cfg(unix)]
#[test]
fn test_stepctl_run_script_propagates_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new("cargo")
        .args(["run", "--bin", "stepctl", "--", "run-script", "--script", "echo hi; exit 3"])
        .env("AGENT_WORKFOLDER", dir.path())
        .env("AGENT_TEMPDIRECTORY", dir.path().join("temp"))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(3));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("hi"));
}
