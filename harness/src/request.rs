use serde::Deserialize;
use serde::Serialize;

/// Input to one validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRequest {
    /// Full text of the proxy configuration under test.
    #[serde(rename = "nginx_config", default)]
    pub config_text: String,
    /// Client invocation run against the proxy once it is up, e.g.
    /// `curl -s localhost:8080/get`.
    #[serde(rename = "command", default)]
    pub probe_command: String,
}

impl ValidationRequest {
    pub fn new(config_text: impl Into<String>, probe_command: impl Into<String>) -> Self {
        Self {
            config_text: config_text.into(),
            probe_command: probe_command.into(),
        }
    }
}
