//! Agent CLI invocation.
//!
//! One [`InvocationRequest`] maps to one agent subprocess. The runner
//! streams stdout line by line through the [`crate::stream::StreamClassifier`],
//! mirrors the raw stream to the task log, enforces the wall-clock timeout
//! and cost budget, and always reaps the child exactly once before
//! returning a classified [`Outcome`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::error::{DroverError, Result};
use crate::outcome::{ErrorKind, Outcome};
use crate::stream::StreamClassifier;
use crate::testing::AgentRunner;

/// Everything needed for one agent attempt.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Full prompt, including any recovery note.
    pub prompt: String,
    /// Directory the agent works in.
    pub working_dir: PathBuf,
    /// Session to resume; `None` starts fresh.
    pub resume_session: Option<String>,
    /// Wall-clock ceiling for this attempt.
    pub timeout: Duration,
    /// Cost ceiling in USD; the attempt is cut off once reported cost
    /// passes it.
    pub max_budget_usd: Option<f64>,
    /// File the raw stream is appended to, when set.
    pub log_path: Option<PathBuf>,
}

/// Runs attempts against the agent CLI.
pub struct CliAgentRunner {
    binary: PathBuf,
    model: String,
}

impl CliAgentRunner {
    /// Resolve the agent binary on PATH and build a runner.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let binary = which::which(&config.binary).map_err(|_| DroverError::AgentNotFound {
            binary: config.binary.clone(),
        })?;
        Ok(Self {
            binary,
            model: config.model.clone(),
        })
    }

    #[cfg(test)]
    fn with_binary(binary: PathBuf, model: impl Into<String>) -> Self {
        Self {
            binary,
            model: model.into(),
        }
    }

    fn spawn(&self, request: &InvocationRequest) -> Result<Child> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-p")
            .arg(&request.prompt)
            .args(["--model", &self.model])
            .args(["--output-format", "stream-json"])
            .arg("--verbose")
            .arg("--dangerously-skip-permissions")
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(session) = &request.resume_session {
            command.args(["--resume", session]);
        }

        command
            .spawn()
            .map_err(|e| DroverError::agent(format!("failed to spawn agent: {e}")))
    }
}

/// Why the stream loop stopped before the process did.
enum EarlyStop {
    BudgetExceeded(f64),
}

#[async_trait::async_trait]
impl AgentRunner for CliAgentRunner {
    async fn run(&self, request: InvocationRequest) -> Result<Outcome> {
        let started = Instant::now();
        let mut child = self.spawn(&request)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DroverError::agent("agent stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DroverError::agent("agent stderr not captured"))?;

        // Drain stderr concurrently so the child cannot block on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected
        });

        let mut raw_log = match &request.log_path {
            Some(path) => Some(open_log(path)?),
            None => None,
        };

        let mut classifier = StreamClassifier::new();
        let mut lines = BufReader::new(stdout).lines();

        let stream_loop = async {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(log) = &mut raw_log {
                            use std::io::Write;
                            let _ = writeln!(log, "{line}");
                        }
                        if let Some(event) = classifier.consume_line(&line) {
                            debug!("{event}");
                        }
                        if let Some(budget) = request.max_budget_usd {
                            let cost = classifier.totals().cost_usd;
                            if cost > budget {
                                return Some(EarlyStop::BudgetExceeded(cost));
                            }
                        }
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        warn!("Error reading agent stdout: {e}");
                        return None;
                    }
                }
            }
        };

        let early_stop = match tokio::time::timeout(request.timeout, stream_loop).await {
            Ok(stop) => stop,
            Err(_) => {
                warn!("Attempt exceeded {}s, killing agent", request.timeout.as_secs());
                kill_and_reap(&mut child).await;
                // Grandchildren of the killed shell can hold the stderr pipe
                // open indefinitely; do not wait for EOF on the kill path.
                stderr_task.abort();
                // A classification that already fired from the stream wins
                // over the cut-off.
                let (kind, message) = if classifier.has_terminal() {
                    classifier.finish()
                } else {
                    (
                        ErrorKind::Timeout,
                        format!("attempt exceeded {}s wall-clock limit", request.timeout.as_secs()),
                    )
                };
                let totals = classifier.totals();
                let mut outcome = Outcome::new(kind, message).with_duration(started.elapsed());
                outcome.session_id = classifier.session_id().map(ToOwned::to_owned);
                outcome.cost_usd = totals.cost_usd;
                outcome.tokens_in = totals.tokens_in;
                outcome.tokens_out = totals.tokens_out;
                return Ok(outcome);
            }
        };

        if let Some(EarlyStop::BudgetExceeded(cost)) = early_stop {
            warn!("Cost ${cost:.2} exceeded budget, killing agent");
            kill_and_reap(&mut child).await;
            stderr_task.abort();
            let budget = request.max_budget_usd.unwrap_or(0.0);
            // Same rule as the wall-clock cut-off: a classification that
            // already fired from the stream wins.
            let (kind, message) = if classifier.has_terminal() {
                classifier.finish()
            } else {
                (
                    ErrorKind::Timeout,
                    format!("cost ${cost:.2} exceeded budget ${budget:.2}"),
                )
            };
            let totals = classifier.totals();
            let mut outcome = Outcome::new(kind, message).with_duration(started.elapsed());
            outcome.session_id = classifier.session_id().map(ToOwned::to_owned);
            outcome.cost_usd = totals.cost_usd;
            outcome.tokens_in = totals.tokens_in;
            outcome.tokens_out = totals.tokens_out;
            return Ok(outcome);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DroverError::agent(format!("failed to reap agent: {e}")))?;

        if let Ok(stderr_lines) = stderr_task.await {
            for line in &stderr_lines {
                classifier.note_raw(line);
            }
        }

        let (kind, mut message) = classifier.finish();
        if kind == ErrorKind::Unknown && !status.success() {
            message = format!("{message} (exit status {status})");
        }

        let totals = classifier.totals();
        let mut outcome = Outcome::new(kind, message).with_duration(started.elapsed());
        outcome.session_id = classifier.session_id().map(ToOwned::to_owned);
        outcome.cost_usd = totals.cost_usd;
        outcome.tokens_in = totals.tokens_in;
        outcome.tokens_out = totals.tokens_out;
        Ok(outcome)
    }
}

fn open_log(path: &PathBuf) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?)
}

async fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to kill agent process: {e}");
    }
    if let Err(e) = child.wait().await {
        warn!("Failed to reap agent process: {e}");
    }
}
