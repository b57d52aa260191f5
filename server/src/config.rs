use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_ENV_VAR: &str = "PROXYCHECK_SERVER_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Upper bound on one sandboxed harness run, startup included.
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            run_timeout_ms: default_run_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }
}

/// How the harness binary is wrapped for each request.
///
/// With `enabled` set the harness runs under bubblewrap: the host system
/// directories are mounted read-only, `app_dir` is mounted read-only at
/// `app_mount`, and the network and pid namespaces are unshared. With
/// `enabled` cleared the harness is executed straight from `app_dir`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SandboxConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sandbox_program")]
    pub program: String,
    #[serde(default = "default_ro_binds")]
    pub ro_binds: Vec<PathBuf>,
    /// Read-only mounts skipped when the host path is missing.
    #[serde(default = "default_ro_bind_tries")]
    pub ro_bind_tries: Vec<PathBuf>,
    /// Writable mounts skipped when the host path is missing.
    #[serde(default = "default_bind_tries")]
    pub bind_tries: Vec<PathBuf>,
    /// Empty directories created inside the sandbox.
    #[serde(default = "default_dirs")]
    pub dirs: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub unshare_net: bool,
    #[serde(default = "default_true")]
    pub unshare_pid: bool,
    /// Host directory holding the harness binary. Defaults to the working
    /// directory of the server.
    #[serde(default)]
    pub app_dir: Option<PathBuf>,
    #[serde(default = "default_app_mount")]
    pub app_mount: PathBuf,
    #[serde(default = "default_harness_exe")]
    pub harness_exe: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_sandbox_program(),
            ro_binds: default_ro_binds(),
            ro_bind_tries: default_ro_bind_tries(),
            bind_tries: default_bind_tries(),
            dirs: default_dirs(),
            unshare_net: true,
            unshare_pid: true,
            app_dir: None,
            app_mount: default_app_mount(),
            harness_exe: default_harness_exe(),
        }
    }
}

impl SandboxConfig {
    pub fn resolve_app_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.app_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("failed to resolve working directory"),
        }
    }

    /// Program and arguments that run the harness against one request.
    pub fn command_line(
        &self,
        app_dir: &Path,
        nginx_config: &str,
        command: &str,
    ) -> (String, Vec<String>) {
        if !self.enabled {
            return (
                app_dir.join(&self.harness_exe).display().to_string(),
                vec![nginx_config.to_string(), command.to_string()],
            );
        }

        let mut args = Vec::new();
        for path in &self.ro_binds {
            push_mount(&mut args, "--ro-bind", path, path);
        }
        push_mount(&mut args, "--ro-bind", app_dir, &self.app_mount);
        for path in &self.ro_bind_tries {
            push_mount(&mut args, "--ro-bind-try", path, path);
        }
        if self.unshare_net {
            args.push("--unshare-net".to_string());
        }
        if self.unshare_pid {
            args.push("--unshare-pid".to_string());
        }
        args.extend(["--dev", "/dev", "--proc", "/proc"].map(str::to_string));
        for path in &self.bind_tries {
            push_mount(&mut args, "--bind-try", path, path);
        }
        for path in &self.dirs {
            args.push("--dir".to_string());
            args.push(path.display().to_string());
        }
        args.push(self.app_mount.join(&self.harness_exe).display().to_string());
        args.push(nginx_config.to_string());
        args.push(command.to_string());
        (self.program.clone(), args)
    }
}

fn push_mount(args: &mut Vec<String>, flag: &str, source: &Path, dest: &Path) {
    args.push(flag.to_string());
    args.push(source.display().to_string());
    args.push(dest.display().to_string());
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_run_timeout_ms() -> u64 {
    30_000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_sandbox_program() -> String {
    "bwrap".to_string()
}

fn default_ro_binds() -> Vec<PathBuf> {
    ["/bin", "/etc", "/lib", "/opt", "/usr"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

fn default_ro_bind_tries() -> Vec<PathBuf> {
    ["/lib32", "/lib64"].into_iter().map(PathBuf::from).collect()
}

fn default_bind_tries() -> Vec<PathBuf> {
    vec![PathBuf::from("/var/lib/nginx/")]
}

fn default_dirs() -> Vec<PathBuf> {
    ["/var/log/nginx", "/tmp", "/root", "/var/cache/nginx"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

fn default_app_mount() -> PathBuf {
    PathBuf::from("/app")
}

fn default_harness_exe() -> String {
    "proxycheck-run".to_string()
}
