//! Turns what a run observed into the verdict returned to the caller.
//!
//! Precedence, first match wins:
//!
//! 1. the workspace or a process could not be set up;
//! 2. the proxy exited during the grace window;
//! 3. the probe command failed the allow-list check;
//! 4. the probe exited non-zero or timed out;
//! 5. the probe succeeded but the error log carries the error marker;
//! 6. otherwise the run succeeded.
//!
//! The log is consulted even after a successful probe because a proxy can
//! answer a request and still record a fault, for instance a bad upstream
//! response.

use std::process::ExitStatus;

use serde::Deserialize;
use serde::Serialize;

use crate::error::HarnessError;
use crate::probe::ProbeOutput;
use crate::probe::ProbeStatus;

/// Everything a run observed, in the shape of how far it got.
#[derive(Debug)]
pub enum Evidence {
    /// The run stopped before the proxy could be judged or probed.
    Aborted(HarnessError),
    Crashed {
        status: Option<ExitStatus>,
        error_log: Option<String>,
    },
    Probed {
        client: String,
        probe: ProbeOutput,
        error_log: Option<String>,
    },
}

#[derive(Debug)]
pub struct Verdict {
    pub result: String,
    pub error: Option<HarnessError>,
}

/// The wire form of a [`Verdict`]. Empty fields are omitted entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl RunResponse {
    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

impl From<Verdict> for RunResponse {
    fn from(verdict: Verdict) -> Self {
        Self {
            result: verdict.result,
            error: verdict.error.map(|err| err.to_string()).unwrap_or_default(),
        }
    }
}

pub fn classify(evidence: Evidence, error_marker: &str) -> Verdict {
    match evidence {
        Evidence::Aborted(err) => Verdict {
            result: String::new(),
            error: Some(err),
        },
        Evidence::Crashed { status, error_log } => Verdict {
            result: String::new(),
            error: Some(HarnessError::Crash {
                status,
                error_log: error_log.unwrap_or_default(),
            }),
        },
        Evidence::Probed {
            client,
            probe,
            error_log,
        } => {
            let error = match probe.status {
                ProbeStatus::Exited(status) if !status.success() => Some(HarnessError::Probe {
                    client,
                    outcome: format!("exited with {status}"),
                }),
                ProbeStatus::TimedOut(timeout) => Some(HarnessError::Probe {
                    client,
                    outcome: format!("timed out after {}ms", timeout.as_millis()),
                }),
                ProbeStatus::Exited(_) => error_log
                    .filter(|log| log.contains(error_marker))
                    .map(|error_log| HarnessError::RuntimeFault { error_log }),
            };
            Verdict {
                result: probe.output,
                error,
            }
        }
    }
}
