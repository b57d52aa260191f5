use pretty_assertions::assert_eq;
use proxycheck_harness::RunResponse;
use proxycheck_harness::ValidationRequest;
use proxycheck_harness::run_validation;

use crate::suite::fakes::Sandbox;
use crate::suite::fakes::read_pid;
use crate::suite::fakes::wait_until_dead;

const CONFIG: &str = "events {}\nhttp { server { listen 8080; location / { proxy_pass http://127.0.0.1:7777; } } }\n";
const SYNTAX_ERROR: &str =
    "nginx: [emerg] unexpected end of file, expecting \";\" or \"}\" in nginx.conf:1\n";

#[tokio::test]
async fn healthy_proxy_and_good_probe_succeed() {
    let sandbox = Sandbox::new();
    let pid_file = sandbox.path("proxy.pid");
    let config = sandbox.config(&sandbox.healthy_proxy(&pid_file));
    let command = sandbox.probe(
        "get.sh",
        "echo '{\"url\": \"http://localhost:8080/get\"}'\n",
    );

    let response = run_validation(&ValidationRequest::new(CONFIG, command), &config).await;

    assert_eq!(
        response,
        RunResponse {
            result: "{\"url\": \"http://localhost:8080/get\"}\n".to_string(),
            error: String::new(),
        }
    );
    assert!(wait_until_dead(read_pid(&pid_file)).await, "proxy outlived the run");
    assert!(wait_until_dead(sandbox.backend_pid()).await, "backend outlived the run");
    assert_eq!(sandbox.workspace_entries(), Vec::<std::path::PathBuf>::new());
}

#[tokio::test]
async fn syntax_error_reports_the_log_and_skips_the_probe() {
    let sandbox = Sandbox::new();
    let config = sandbox.config(&format!("printf '%s' '{SYNTAX_ERROR}' >&2; exit 1"));
    let marker = sandbox.path("probed");
    let command = sandbox.probe("mark.sh", &format!("touch {}\n", marker.display()));

    let response = run_validation(
        &ValidationRequest::new("http { server {", command),
        &config,
    )
    .await;

    assert_eq!(
        response,
        RunResponse {
            result: String::new(),
            error: SYNTAX_ERROR.to_string(),
        }
    );
    assert!(!marker.exists(), "probe ran after a crash");
    assert!(wait_until_dead(sandbox.backend_pid()).await, "backend outlived the run");
    assert_eq!(sandbox.workspace_entries(), Vec::<std::path::PathBuf>::new());
}

#[tokio::test]
async fn proxy_receives_the_written_config() {
    let sandbox = Sandbox::new();
    let copy = sandbox.path("seen.conf");
    let pid_file = sandbox.path("proxy.pid");
    let config = sandbox.config(&format!(
        "cp \"$2\" {}; {}",
        copy.display(),
        sandbox.healthy_proxy(&pid_file)
    ));
    let command = sandbox.probe("ok.sh", "echo ok\n");

    let response = run_validation(&ValidationRequest::new(CONFIG, command), &config).await;

    assert!(response.is_success(), "{response:?}");
    assert_eq!(std::fs::read_to_string(&copy).expect("copied config"), CONFIG);
}

#[tokio::test]
async fn disallowed_client_is_rejected_without_spawning() {
    let sandbox = Sandbox::new();
    let pid_file = sandbox.path("proxy.pid");
    let config = sandbox.config(&sandbox.healthy_proxy(&pid_file));

    let response = run_validation(&ValidationRequest::new(CONFIG, "rm -rf /"), &config).await;

    assert_eq!(
        response,
        RunResponse {
            result: String::new(),
            error: "command must start with an allowed client (sh)".to_string(),
        }
    );
    assert!(wait_until_dead(read_pid(&pid_file)).await, "proxy outlived the run");
    assert!(wait_until_dead(sandbox.backend_pid()).await, "backend outlived the run");
    assert_eq!(sandbox.workspace_entries(), Vec::<std::path::PathBuf>::new());
}

#[tokio::test]
async fn bad_gateway_keeps_body_and_reports_client_exit() {
    let sandbox = Sandbox::new();
    let pid_file = sandbox.path("proxy.pid");
    let config = sandbox.config(&sandbox.healthy_proxy(&pid_file));
    let command = sandbox.probe(
        "bad_gateway.sh",
        "echo '<html><center><h1>502 Bad Gateway</h1></center></html>'\nexit 22\n",
    );

    let response = run_validation(&ValidationRequest::new(CONFIG, command), &config).await;

    assert_eq!(
        response,
        RunResponse {
            result: "<html><center><h1>502 Bad Gateway</h1></center></html>\n".to_string(),
            error: "sh exited with exit status: 22".to_string(),
        }
    );
    assert!(wait_until_dead(read_pid(&pid_file)).await, "proxy outlived the run");
    assert!(wait_until_dead(sandbox.backend_pid()).await, "backend outlived the run");
    assert_eq!(sandbox.workspace_entries(), Vec::<std::path::PathBuf>::new());
}

#[tokio::test]
async fn error_marker_in_log_fails_a_successful_probe() {
    let sandbox = Sandbox::new();
    let pid_file = sandbox.path("proxy.pid");
    let log_line = "2024/01/01 00:00:00 [error] 7#7: *1 upstream prematurely closed connection";
    let config = sandbox.config(&format!(
        "echo '{log_line}' >> \"$4\"; {}",
        sandbox.healthy_proxy(&pid_file)
    ));
    let command = sandbox.probe("ok.sh", "echo ok\n");

    let response = run_validation(&ValidationRequest::new(CONFIG, command), &config).await;

    assert_eq!(
        response,
        RunResponse {
            result: "ok\n".to_string(),
            error: format!("{log_line}\n"),
        }
    );
}

#[tokio::test]
async fn identical_requests_classify_identically() {
    let sandbox = Sandbox::new();
    let config = sandbox.config(&format!("printf '%s' '{SYNTAX_ERROR}' >&2; exit 1"));
    let request = ValidationRequest::new("http {", "sh -c true");

    let first = run_validation(&request, &config).await;
    let second = run_validation(&request, &config).await;

    assert_eq!(first, second);
    assert!(!first.is_success());
}

#[tokio::test]
async fn missing_proxy_binary_is_a_launch_failure() {
    let sandbox = Sandbox::new();
    let mut config = sandbox.config("exit 0");
    config.proxy.program = "/nonexistent/nginx".to_string();
    config.proxy.args.clear();

    let response = run_validation(&ValidationRequest::new(CONFIG, "sh -c true"), &config).await;

    assert_eq!(response.result, "");
    assert!(
        response.error.starts_with("failed to start /nonexistent/nginx:"),
        "{}",
        response.error
    );
    assert_eq!(sandbox.workspace_entries(), Vec::<std::path::PathBuf>::new());
}

#[tokio::test]
async fn unwritable_parent_is_a_resource_failure() {
    let sandbox = Sandbox::new();
    let mut config = sandbox.config("exit 0");
    config.workspace_parent = sandbox.path("missing/parent");

    let response = run_validation(&ValidationRequest::new(CONFIG, "sh -c true"), &config).await;

    assert!(
        response.error.starts_with("failed to prepare run workspace at "),
        "{}",
        response.error
    );
}
