//! CLI integration tests

use std::process::Command;

fn latctl() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_latctl"));
    command.env_remove("LATCTL_AGENT_URL");
    command
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = latctl()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("latency agent"), "Should show app description");
    assert!(stdout.contains("get"), "Should show get command");
    assert!(stdout.contains("set"), "Should show set command");
    assert!(stdout.contains("health"), "Should show health command");
    assert!(stdout.contains("pods"), "Should show pods command");
    assert!(stdout.contains("--agent-url"), "Should show agent-url option");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = latctl()
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("latctl"), "Should show binary name");
}

/// Test pods subcommand help
#[test]
fn test_pods_help() {
    let output = latctl()
        .args(["pods", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Pods help should succeed");
    assert!(stdout.contains("--namespace"), "Should show namespace option");
    assert!(stdout.contains("--selector"), "Should show selector option");
}

/// Invalid latencies are rejected before any request is made
#[test]
fn test_set_rejects_invalid_latency_locally() {
    let output = latctl()
        .args(["--agent-url", "http://127.0.0.1:9", "set", "fast"])
        .output()
        .expect("Failed to execute command");

    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Invalid latency should fail");
    assert!(stderr.contains("invalid latency"), "Should explain the failure: {}", stderr);
}

/// Test that set requires a value
#[test]
fn test_set_requires_latency() {
    let output = latctl()
        .arg("set")
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Missing latency should fail");
}

/// Test invalid format option
#[test]
fn test_invalid_format() {
    let output = latctl()
        .args(["--format", "yaml", "get"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Invalid format should fail");
}
