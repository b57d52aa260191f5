use std::process::Command;

use pretty_assertions::assert_eq;
use proxycheck_harness::RunResponse;

use crate::suite::fakes::Sandbox;

fn harness_binary() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_proxycheck-run"));
    command.env_remove("PROXYCHECK_CONFIG").env_remove("RUST_LOG");
    command
}

#[test]
fn prints_exactly_one_json_line() {
    let sandbox = Sandbox::new();
    let config = sandbox.config("echo 'nginx: [emerg] unknown directive \"bogus\"' >&2; exit 1");
    let config_file = sandbox.path("harness.toml");
    std::fs::write(&config_file, toml::to_string(&config).expect("encode config"))
        .expect("write config");

    let output = harness_binary()
        .arg("bogus;")
        .arg("sh -c true")
        .arg("--config")
        .arg(&config_file)
        .output()
        .expect("run harness");

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8(output.stdout).expect("utf-8 stdout");
    assert_eq!(stdout.lines().count(), 1, "{stdout}");
    let response: RunResponse = serde_json::from_str(&stdout).expect("json response");
    assert_eq!(
        response,
        RunResponse {
            result: String::new(),
            error: "nginx: [emerg] unknown directive \"bogus\"\n".to_string(),
        }
    );
}

#[test]
fn config_file_is_read_from_the_environment() {
    let sandbox = Sandbox::new();
    let config = sandbox.config("exit 0");
    let config_file = sandbox.path("harness.toml");
    std::fs::write(&config_file, toml::to_string(&config).expect("encode config"))
        .expect("write config");

    let output = harness_binary()
        .env("PROXYCHECK_CONFIG", &config_file)
        .arg("events {}")
        .arg("rm -rf /")
        .output()
        .expect("run harness");

    assert!(output.status.success(), "{output:?}");
    let response: RunResponse = serde_json::from_slice(&output.stdout).expect("json response");
    // `exit 0` still exits inside the grace window.
    assert!(!response.is_success());
    assert_eq!(response.result, "");
}

#[test]
fn unreadable_config_file_fails_the_process() {
    let sandbox = Sandbox::new();
    let output = harness_binary()
        .arg("events {}")
        .arg("curl localhost")
        .arg("--config")
        .arg(sandbox.path("missing.toml"))
        .output()
        .expect("run harness");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read"), "{stderr}");
}
