//! Shell stand-ins for the proxy, the backend stub and the HTTP client, so the
//! suite runs without nginx, go-httpbin or curl installed.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use proxycheck_harness::HarnessConfig;
use proxycheck_harness::config::BackendConfig;
use proxycheck_harness::config::ProbeConfig;
use proxycheck_harness::config::ProxyConfig;
use tempfile::TempDir;

/// Scratch space for one test: the workspace parent handed to the harness
/// and a separate directory for scripts and markers the fakes leave behind.
pub struct Sandbox {
    pub workspace_parent: TempDir,
    pub scratch: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            workspace_parent: tempfile::tempdir().expect("workspace parent"),
            scratch: tempfile::tempdir().expect("scratch dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.scratch.path().join(name)
    }

    /// Where the backend fake records its pid.
    pub fn backend_pid_file(&self) -> PathBuf {
        self.path("backend.pid")
    }

    /// Config whose proxy runs `proxy_script` under `sh`. Inside the script
    /// `$2` is the config path and `$4` the error log path. The script only
    /// starts once the backend has recorded its pid.
    pub fn config(&self, proxy_script: &str) -> HarnessConfig {
        let backend_pid_file = self.backend_pid_file();
        let proxy_script = format!(
            "while [ ! -s {} ]; do sleep 0.01; done; {proxy_script}",
            backend_pid_file.display()
        );
        HarnessConfig {
            proxy: ProxyConfig {
                program: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), proxy_script, "nginx".to_string()],
                grace_period_ms: 400,
                terminate_timeout_ms: 1_000,
                ..ProxyConfig::default()
            },
            backend: BackendConfig {
                program: "/bin/sh".to_string(),
                args: vec![
                    "-c".to_string(),
                    format!("echo $$ > {}; exec sleep 30", backend_pid_file.display()),
                    "go-httpbin".to_string(),
                ],
                port: 7777,
            },
            probe: ProbeConfig {
                allowed_clients: vec!["sh".to_string()],
                timeout_ms: 5_000,
            },
            workspace_parent: self.workspace_parent.path().to_path_buf(),
        }
    }

    /// Writes a client script and returns the probe command that runs it.
    pub fn probe(&self, name: &str, script: &str) -> String {
        let path = self.path(name);
        std::fs::write(&path, script).expect("write probe script");
        format!("sh {}", path.display())
    }

    /// Proxy script that records its pid in `pid_file` and stays up.
    pub fn healthy_proxy(&self, pid_file: &Path) -> String {
        format!("echo $$ > {}; exec sleep 30", pid_file.display())
    }

    pub fn workspace_entries(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.workspace_parent.path())
            .expect("read workspace parent")
            .map(|entry| entry.expect("dir entry").path())
            .collect()
    }

    pub fn backend_pid(&self) -> u32 {
        read_pid(&self.backend_pid_file())
    }
}

pub fn read_pid(pid_file: &Path) -> u32 {
    std::fs::read_to_string(pid_file)
        .expect("pid file")
        .trim()
        .parse()
        .expect("pid")
}

/// Zombies count as gone.
pub fn is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .is_some_and(|state| state != 'Z'),
        Err(_) => false,
    }
}

pub async fn wait_until_dead(pid: u32) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while is_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}
