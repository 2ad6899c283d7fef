//! Operator notifications over Telegram.
//!
//! Drover runs unattended for hours; Telegram messages are how the operator
//! learns a run stopped or recovered without watching a terminal. Delivery
//! is strictly best-effort: a failed send is logged and forgotten, never
//! allowed to affect the pipeline.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TelegramConfig;
use crate::outcome::ErrorKind;
use crate::session_log::format_duration;
use crate::testing::Notify;

/// Events worth telling the operator about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    /// A pipeline run started.
    SessionStart { project: String, tasks: Vec<u32> },
    /// A task hit context overflow and is being retried fresh.
    ContextOverflow {
        task: String,
        attempt: u32,
        max_retries: u32,
    },
    /// A transient failure triggered a backoff wait.
    RecoveryStart {
        task: String,
        kind: ErrorKind,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    /// The agent came back healthy and the task is resuming.
    RecoverySuccess { task: String },
    /// A task failed for good.
    TaskFailed {
        task: String,
        kind: ErrorKind,
        message: String,
    },
    /// A fatal failure or interrupt halted the remaining queue.
    PipelineStopped { task: String, reason: String },
    /// The whole run finished.
    SessionComplete {
        project: String,
        completed: usize,
        on_hold: usize,
        failed: usize,
        duration: Duration,
    },
}

impl NotifyEvent {
    /// Render the Telegram Markdown body for this event.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::SessionStart { project, tasks } => {
                let list: Vec<String> = tasks.iter().map(ToString::to_string).collect();
                format!(
                    "🚀 *Session started*\nProject: {}\nTasks: {}",
                    escape_markdown(project),
                    list.join(", ")
                )
            }
            Self::ContextOverflow {
                task,
                attempt,
                max_retries,
            } => format!(
                "♻️ *Context overflow*\nTask: {}\nFresh retry {attempt} of {max_retries}",
                escape_markdown(task)
            ),
            Self::RecoveryStart {
                task,
                kind,
                attempt,
                max_attempts,
                delay,
            } => format!(
                "⏳ *Recovery wait*\nTask: {}\nError: {}\nProbe {attempt} of {max_attempts} in {}s",
                escape_markdown(task),
                escape_markdown(kind.as_str()),
                delay.as_secs()
            ),
            Self::RecoverySuccess { task } => {
                format!("✅ *Recovered*\nTask: {} resuming", escape_markdown(task))
            }
            Self::TaskFailed {
                task,
                kind,
                message,
            } => format!(
                "❌ *Task failed*\nTask: {}\nError: {}\n{}",
                escape_markdown(task),
                escape_markdown(kind.as_str()),
                escape_markdown(message)
            ),
            Self::PipelineStopped { task, reason } => format!(
                "🛑 *Pipeline stopped*\nAt task: {}\nReason: {}",
                escape_markdown(task),
                escape_markdown(reason)
            ),
            Self::SessionComplete {
                project,
                completed,
                on_hold,
                failed,
                duration,
            } => format!(
                "🏁 *Session complete*\nProject: {}\nCompleted: {completed}  On hold: {on_hold}  Failed: {failed}\nDuration: {}",
                escape_markdown(project),
                format_duration(*duration)
            ),
        }
    }
}

/// Escape characters Telegram's Markdown parser trips over in plain text.
fn escape_markdown(text: &str) -> String {
    text.replace('_', "\\_").replace('*', "\\*").replace('`', "\\`")
}

// ============================================================
// Telegram
// ============================================================

/// Notifier posting to the Telegram Bot API.
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Build from config; `None` when token or chat id is missing.
    #[must_use]
    pub fn from_config(config: &TelegramConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        Some(Self {
            client,
            bot_token: config.bot_token.clone()?,
            chat_id: config.chat_id.clone()?,
        })
    }
}

#[async_trait]
impl Notify for TelegramNotifier {
    async fn notify(&self, event: &NotifyEvent) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": event.render(),
            "parse_mode": "Markdown",
        });

        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Telegram notification delivered");
            }
            Ok(response) => {
                warn!("Telegram API returned {}", response.status());
            }
            Err(e) => {
                warn!("Telegram notification failed: {e}");
            }
        }
    }
}

/// Notifier that drops every event. Used when Telegram is not configured.
#[derive(Default)]
pub struct DisabledNotifier;

#[async_trait]
impl Notify for DisabledNotifier {
    async fn notify(&self, _event: &NotifyEvent) {}
}
