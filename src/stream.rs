//! Incremental classifier for the agent CLI's `stream-json` output.
//!
//! The agent process emits one JSON record per line: a `system`/`init` record
//! at session start, `assistant` records while working, and a terminal
//! `result` record carrying success/failure, token usage, and cost. The
//! stream is consumed line by line. The subprocess may run for hours, so the
//! classifier never buffers the whole stream, only a capped tail of raw lines
//! for the fallback scan when the process dies without a result record.
//!
//! Classification precedence for failures, most specific first:
//! explicit error-code field, then message substrings in the order
//! auth (401) > rate-limit (429) > overload (529) > generic process error.

use crate::outcome::ErrorKind;
use regex::Regex;
use serde::Deserialize;
use std::collections::VecDeque;

/// Maximum raw lines retained for the no-result fallback scan.
const RAW_TAIL_LINES: usize = 200;

/// Maximum characters kept per retained raw line.
const RAW_LINE_CHARS: usize = 500;

// ============================================================================
// Marker table
// ============================================================================

/// Failure patterns in precedence order, most specific first.
const FAILURE_PATTERNS: &[(ErrorKind, &str)] = &[
    (
        ErrorKind::AuthError,
        r"(?i)\b401\b|unauthorized|authentication[_ ]error",
    ),
    (ErrorKind::RateLimited, r"(?i)\b429\b|rate"),
    (ErrorKind::Overloaded, r"(?i)\b529\b|overloaded"),
];

const OVERFLOW_PATTERN: &str =
    r"(?i)context[ _](overflow|length)|prompt is too long|conversation too long";

const ON_HOLD_PATTERN: &str = r"(?i)\bon[ _-]hold\b";

/// Ordered failure markers. Matching rules live here so the precedence table
/// is swappable without touching the recovery state machine.
#[derive(Debug)]
pub struct MarkerTable {
    failure: Vec<(ErrorKind, Regex)>,
    overflow: Option<Regex>,
    on_hold: Option<Regex>,
}

impl MarkerTable {
    fn new() -> Self {
        Self {
            failure: FAILURE_PATTERNS
                .iter()
                .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (*kind, re)))
                .collect(),
            overflow: Regex::new(OVERFLOW_PATTERN).ok(),
            on_hold: Regex::new(ON_HOLD_PATTERN).ok(),
        }
    }

    /// Map failure text to an [`ErrorKind`] using the ordered precedence
    /// auth > rate-limit > overload. Returns `None` when nothing matches.
    fn match_failure(&self, text: &str) -> Option<ErrorKind> {
        self.failure
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(kind, _)| *kind)
    }

    fn is_overflow(&self, text: &str) -> bool {
        self.overflow.as_ref().is_some_and(|re| re.is_match(text))
    }

    fn is_on_hold(&self, text: &str) -> bool {
        self.on_hold.as_ref().is_some_and(|re| re.is_match(text))
    }
}

impl Default for MarkerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify a failure, consulting an explicit error code before the
/// human-readable message. Unmatched failures are generic process errors.
#[must_use]
pub fn classify_failure(markers: &MarkerTable, code: Option<&str>, message: &str) -> ErrorKind {
    if let Some(code) = code {
        if let Some(kind) = markers.match_failure(code) {
            return kind;
        }
    }
    markers
        .match_failure(message)
        .unwrap_or(ErrorKind::ProcessError)
}

// ============================================================================
// Stream records
// ============================================================================

/// Token usage block inside a `result` record.
#[derive(Debug, Clone, Default, Deserialize)]
struct UsageRecord {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

/// One line of structured agent output. Unknown fields are ignored so new
/// CLI versions do not break parsing.
#[derive(Debug, Deserialize)]
struct StreamRecord {
    #[serde(rename = "type")]
    record_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    is_error: Option<bool>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error_code: Option<serde_json::Value>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    usage: Option<UsageRecord>,
    #[serde(default)]
    message: Option<AssistantMessage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Running totals
// ============================================================================

/// Usage and cost accumulated across result records. Observability only,
/// never consulted by the recovery state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageTotals {
    /// Input tokens, cache reads included.
    pub tokens_in: u64,
    /// Output tokens.
    pub tokens_out: u64,
    /// Cache-read portion of the input tokens.
    pub cache_read: u64,
    /// Total reported cost in USD.
    pub cost_usd: f64,
}

impl UsageTotals {
    fn absorb(&mut self, usage: &UsageRecord, cost: f64) {
        self.tokens_in += usage.input_tokens + usage.cache_read_input_tokens;
        self.tokens_out += usage.output_tokens;
        self.cache_read += usage.cache_read_input_tokens;
        self.cost_usd += cost;
    }
}

// ============================================================================
// Line events
// ============================================================================

/// Progress extracted from one stream line, for mirroring into the task log.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    /// Session established.
    SessionInit { session_id: String, model: String },
    /// Assistant prose.
    AgentText(String),
    /// Tool invocation.
    ToolUse(String),
    /// Terminal result summary.
    Result(String),
}

impl std::fmt::Display for LineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionInit { session_id, model } => {
                let short: String = session_id.chars().take(8).collect();
                write!(f, "session {short} | model {model}")
            }
            Self::AgentText(text) => write!(f, "{text}"),
            Self::ToolUse(name) => write!(f, "tool: {name}"),
            Self::Result(summary) => write!(f, "{summary}"),
        }
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Consumes agent output one line at a time and resolves the stream to a
/// single [`ErrorKind`] plus message once it closes.
#[derive(Debug)]
pub struct StreamClassifier {
    markers: MarkerTable,
    totals: UsageTotals,
    session_id: Option<String>,
    terminal: Option<(ErrorKind, String)>,
    raw_tail: VecDeque<String>,
}

impl StreamClassifier {
    /// Create a classifier for one attempt's stream.
    #[must_use]
    pub fn new() -> Self {
        Self {
            markers: MarkerTable::new(),
            totals: UsageTotals::default(),
            session_id: None,
            terminal: None,
            raw_tail: VecDeque::with_capacity(RAW_TAIL_LINES),
        }
    }

    /// Session identifier captured from the init record, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Running usage totals.
    #[must_use]
    pub fn totals(&self) -> UsageTotals {
        self.totals
    }

    /// Whether a terminal result record has been seen.
    #[must_use]
    pub fn has_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// Consume one line of process output.
    ///
    /// Malformed lines are retained for the fallback scan but never abort
    /// classification. Returns a progress event when the line carries one.
    pub fn consume_line(&mut self, line: &str) -> Option<LineEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        self.remember_raw(line);

        let record: StreamRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            // Opaque text: raw tail only.
            Err(_) => return None,
        };

        match record.record_type.as_str() {
            "system" if record.subtype.as_deref() == Some("init") => {
                let session_id = record.session_id.unwrap_or_default();
                if !session_id.is_empty() {
                    self.session_id = Some(session_id.clone());
                }
                Some(LineEvent::SessionInit {
                    session_id,
                    model: record.model.unwrap_or_else(|| "unknown".to_string()),
                })
            }
            "result" => Some(self.consume_result(&record)),
            "assistant" => self.consume_assistant(record),
            _ => None,
        }
    }

    /// Note a raw line that bypassed structured parsing (e.g. stderr), so
    /// the fallback scan can see it.
    pub fn note_raw(&mut self, line: &str) {
        let line = line.trim();
        if !line.is_empty() {
            self.remember_raw(line);
        }
    }

    fn remember_raw(&mut self, line: &str) {
        if self.raw_tail.len() == RAW_TAIL_LINES {
            self.raw_tail.pop_front();
        }
        self.raw_tail
            .push_back(line.chars().take(RAW_LINE_CHARS).collect());
    }

    fn consume_result(&mut self, record: &StreamRecord) -> LineEvent {
        let cost = record.total_cost_usd.unwrap_or(0.0);
        if let Some(usage) = &record.usage {
            self.totals.absorb(usage, cost);
        } else {
            self.totals.cost_usd += cost;
        }

        let text = record.result.as_ref().map(value_to_text).unwrap_or_default();

        let (kind, message) = if record.is_error.unwrap_or(false) {
            let code = record.error_code.as_ref().map(value_to_text);
            let kind = classify_failure(&self.markers, code.as_deref(), &text);
            let message = if text.is_empty() {
                format!("agent reported an error ({})", code.unwrap_or_default())
            } else {
                text
            };
            (kind, message)
        } else if self.markers.is_on_hold(&text) {
            (ErrorKind::OnHold, text)
        } else {
            let message = if text.is_empty() {
                "task completed".to_string()
            } else {
                text
            };
            (ErrorKind::Success, message)
        };

        self.terminal = Some((kind, message));
        LineEvent::Result(format!(
            "{kind}: {} in / {} out | ${:.4}",
            self.totals.tokens_in, self.totals.tokens_out, self.totals.cost_usd
        ))
    }

    fn consume_assistant(&mut self, record: StreamRecord) -> Option<LineEvent> {
        let message = record.message?;
        for block in message.content {
            match block.block_type.as_str() {
                "text" => {
                    let text = block.text.unwrap_or_default();
                    if !text.trim().is_empty() {
                        return Some(LineEvent::AgentText(text.trim().to_string()));
                    }
                }
                "tool_use" => {
                    return Some(LineEvent::ToolUse(block.name.unwrap_or_default()));
                }
                _ => {}
            }
        }
        None
    }

    /// Resolve the stream once it has closed.
    ///
    /// With no result record ever seen, falls back to scanning the retained
    /// raw tail: context-overflow markers first, then the same auth/rate/
    /// overload markers, otherwise [`ErrorKind::Unknown`].
    #[must_use]
    pub fn finish(&self) -> (ErrorKind, String) {
        if let Some((kind, message)) = &self.terminal {
            return (*kind, message.clone());
        }

        let tail: Vec<&str> = self.raw_tail.iter().map(String::as_str).collect();
        let raw = tail.join("\n");

        if self.markers.is_overflow(&raw) {
            return (
                ErrorKind::ContextOverflow,
                "context overflow: agent exited without a result record".to_string(),
            );
        }
        if let Some(kind) = self.markers.match_failure(&raw) {
            return (
                kind,
                format!("{kind} detected in raw output; no result record emitted"),
            );
        }
        (
            ErrorKind::Unknown,
            "process exited without a result record".to_string(),
        )
    }
}

impl Default for StreamClassifier {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
