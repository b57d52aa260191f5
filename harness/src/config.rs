use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;

/// Environment variable consulted for a config file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "PROXYCHECK_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Parent directory under which each run creates its private root.
    #[serde(default = "default_workspace_parent")]
    pub workspace_parent: PathBuf,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            backend: BackendConfig::default(),
            probe: ProbeConfig::default(),
            workspace_parent: default_workspace_parent(),
        }
    }
}

impl HarnessConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_program")]
    pub program: String,
    /// Arguments placed before the generated `-c`/`-e`/`-g` flags.
    #[serde(default)]
    pub args: Vec<String>,
    /// How long the proxy must stay up before it is presumed healthy.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// How long to wait after SIGTERM before the process group is killed.
    #[serde(default = "default_terminate_timeout_ms")]
    pub terminate_timeout_ms: u64,
    /// Substring that marks a fault in the proxy's error log.
    #[serde(default = "default_error_marker")]
    pub error_marker: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            program: default_proxy_program(),
            args: Vec::new(),
            grace_period_ms: default_grace_period_ms(),
            terminate_timeout_ms: default_terminate_timeout_ms(),
            error_marker: default_error_marker(),
        }
    }
}

impl ProxyConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    #[serde(default = "default_backend_program")]
    pub program: String,
    /// Arguments placed before `-port <port>`.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_backend_port")]
    pub port: u16,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: default_backend_program(),
            args: Vec::new(),
            port: default_backend_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeConfig {
    #[serde(default = "default_allowed_clients")]
    pub allowed_clients: Vec<String>,
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            allowed_clients: default_allowed_clients(),
            timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_workspace_parent() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_proxy_program() -> String {
    "nginx".to_string()
}

fn default_grace_period_ms() -> u64 {
    100
}

fn default_terminate_timeout_ms() -> u64 {
    2_000
}

fn default_error_marker() -> String {
    "[error]".to_string()
}

fn default_backend_program() -> String {
    "go-httpbin".to_string()
}

fn default_backend_port() -> u16 {
    7777
}

fn default_allowed_clients() -> Vec<String> {
    vec!["curl".to_string(), "http".to_string()]
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}
