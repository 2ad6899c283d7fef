//! Agent health probe.
//!
//! Sends the agent a trivial one-turn prompt and classifies the reply. Used
//! standalone via `drover health` and by the recovery backoff loop to decide
//! whether resuming is worth attempting yet.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::error::{DroverError, Result};
use crate::outcome::ErrorKind;
use crate::stream::{classify_failure, MarkerTable};
use crate::testing::HealthProbe;

const PROBE_PROMPT: &str = "Reply with OK";
const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(ErrorKind),
}

impl HealthStatus {
    /// Process exit code for `drover health`, stable for wrapping scripts:
    /// 0 healthy, 1 auth, 2 rate-limited, 4 overloaded, 3 anything else.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Healthy => 0,
            Self::Unhealthy(ErrorKind::AuthError) => 1,
            Self::Unhealthy(ErrorKind::RateLimited) => 2,
            Self::Unhealthy(ErrorKind::Overloaded) => 4,
            Self::Unhealthy(_) => 3,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy(kind) => write!(f, "unhealthy ({kind})"),
        }
    }
}

/// Probe backed by the real agent CLI.
pub struct CliHealthProbe {
    binary: PathBuf,
    model: String,
}

impl CliHealthProbe {
    /// Resolve the agent binary and build a probe.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let binary = which::which(&config.binary).map_err(|_| DroverError::AgentNotFound {
            binary: config.binary.clone(),
        })?;
        Ok(Self {
            binary,
            model: config.model.clone(),
        })
    }

    /// Run one probe and report the full status.
    pub async fn probe(&self) -> HealthStatus {
        let mut command = Command::new(&self.binary);
        command
            .arg("-p")
            .arg(PROBE_PROMPT)
            .args(["--model", &self.model])
            .args(["--max-turns", "1"])
            .args(["--output-format", "json"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(PROBE_TIMEOUT, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Health probe failed to run: {e}");
                return HealthStatus::Unhealthy(ErrorKind::ProcessError);
            }
            Err(_) => {
                warn!("Health probe timed out after {}s", PROBE_TIMEOUT.as_secs());
                return HealthStatus::Unhealthy(ErrorKind::Timeout);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let status = classify_probe_output(&stdout, &stderr, output.status.success());
        debug!("Health probe result: {status}");
        status
    }
}

/// Classify the probe's JSON reply, falling back to marker scanning when the
/// reply is not parseable.
fn classify_probe_output(stdout: &str, stderr: &str, exit_ok: bool) -> HealthStatus {
    let markers = MarkerTable::default();

    let last_json = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('{'));

    if let Some(line) = last_json {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            let is_error = value
                .get("is_error")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            let text = value
                .get("result")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            if !is_error {
                return HealthStatus::Healthy;
            }
            let code = value
                .get("error_code")
                .and_then(serde_json::Value::as_str);
            return HealthStatus::Unhealthy(classify_failure(&markers, code, text));
        }
    }

    if exit_ok {
        return HealthStatus::Healthy;
    }

    let combined = format!("{stdout}\n{stderr}");
    match markers_scan(&markers, &combined) {
        Some(kind) => HealthStatus::Unhealthy(kind),
        None => HealthStatus::Unhealthy(ErrorKind::ProcessError),
    }
}

fn markers_scan(markers: &MarkerTable, text: &str) -> Option<ErrorKind> {
    match classify_failure(markers, None, text) {
        ErrorKind::ProcessError => None,
        kind => Some(kind),
    }
}

#[async_trait]
impl HealthProbe for CliHealthProbe {
    async fn check(&self) -> std::result::Result<(), ErrorKind> {
        match self.probe().await {
            HealthStatus::Healthy => Ok(()),
            HealthStatus::Unhealthy(kind) => Err(kind),
        }
    }
}
