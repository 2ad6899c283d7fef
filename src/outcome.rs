//! Failure taxonomy and per-attempt outcome records.
//!
//! Every agent invocation resolves to exactly one [`ErrorKind`]; there is no
//! "no classification" result. Output the classifier cannot place resolves to
//! [`ErrorKind::Unknown`], which surfaces as an ordinary failure.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Closed set of outcome kinds for one agent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Task completed successfully.
    Success,
    /// Agent deferred the task without completing or failing it.
    OnHold,
    /// Authentication failure (HTTP 401). Halts the whole pipeline.
    AuthError,
    /// Rate limit hit (HTTP 429).
    RateLimited,
    /// Provider overloaded (HTTP 529).
    Overloaded,
    /// Agent context grew past a usable size; requires a fresh session.
    ContextOverflow,
    /// Wall-clock timeout or budget ceiling exceeded.
    Timeout,
    /// Agent process failed for a generic reason.
    ProcessError,
    /// Output could not be classified.
    Unknown,
}

impl ErrorKind {
    /// True only for [`ErrorKind::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// True for kinds that must halt the remaining task queue, not just the
    /// current task. Configuration may mark further kinds fatal; see
    /// [`crate::recovery::RecoveryConfig::is_fatal`].
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthError)
    }

    /// True for API failures worth a backoff-and-resume cycle.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Overloaded | Self::Timeout | Self::ProcessError
        )
    }

    /// Stable code used in logs and notifications.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::OnHold => "ON_HOLD",
            Self::AuthError => "AUTH_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::Overloaded => "OVERLOADED",
            Self::ContextOverflow => "CONTEXT_OVERFLOW",
            Self::Timeout => "TIMEOUT",
            Self::ProcessError => "PROCESS_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one agent invocation. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Classified outcome kind.
    pub kind: ErrorKind,
    /// Human-readable message. Always populated; operators read the log,
    /// not the enum.
    pub message: String,
    /// Session identifier captured from the stream, for later resume.
    pub session_id: Option<String>,
    /// Wall-clock duration of the attempt.
    pub duration: Duration,
    /// Total cost reported by the agent, in USD.
    pub cost_usd: f64,
    /// Input tokens consumed (including cache reads).
    pub tokens_in: u64,
    /// Output tokens produced.
    pub tokens_out: u64,
}

impl Outcome {
    /// Create an outcome with zeroed usage.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            session_id: None,
            duration: Duration::ZERO,
            cost_usd: 0.0,
            tokens_in: 0,
            tokens_out: 0,
        }
    }

    /// Attach a session identifier.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach the attempt duration.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// One-line summary for session logs.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}: {} ({} in / {} out, ${:.4})",
            self.kind, self.message, self.tokens_in, self.tokens_out, self.cost_usd
        )
    }
}
