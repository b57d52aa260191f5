use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Every way a validation run can fail. The `Display` text of a variant is
/// what callers receive in the `error` field of the response.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to prepare run workspace at {}: {source}", .path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to start {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{}", crash_detail(.status, .error_log))]
    Crash {
        status: Option<ExitStatus>,
        error_log: String,
    },
    #[error("command must start with an allowed client ({})", join_clients(.allowed))]
    InvalidCommand { allowed: Vec<String> },
    #[error("{client} {outcome}")]
    Probe { client: String, outcome: String },
    #[error("{error_log}")]
    RuntimeFault { error_log: String },
}

impl HarnessError {
    pub(crate) fn resource(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Resource {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn launch(program: impl Into<String>, source: io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            source,
        }
    }
}

fn crash_detail(status: &Option<ExitStatus>, error_log: &str) -> String {
    if !error_log.trim().is_empty() {
        return error_log.to_string();
    }
    match status {
        Some(status) => {
            format!("proxy exited during startup ({status}) without writing to its error log")
        }
        None => "proxy exited during startup without writing to its error log".to_string(),
    }
}

fn join_clients(allowed: &[String]) -> String {
    allowed.join(", ")
}
