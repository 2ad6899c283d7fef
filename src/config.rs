//! Configuration loading and validation.
//!
//! Configuration is TOML, loaded from an explicit `--config` path or from
//! `~/.config/drover/config.toml`. Every field has a default so a missing
//! file means defaults, not an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{DroverError, Result};
use crate::outcome::ErrorKind;

// ============================================================
// Sections
// ============================================================

/// Agent invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent CLI binary name, resolved on PATH.
    pub binary: String,
    /// Model passed to the agent.
    pub model: String,
    /// Skill run for each task.
    pub implement_skill: String,
    /// Skill run once over the whole batch after the queue.
    pub batch_check_skill: String,
    /// Wall-clock ceiling per attempt, in seconds.
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            model: "opus".to_string(),
            implement_skill: "implement-task".to_string(),
            batch_check_skill: "batch-check".to_string(),
            timeout_secs: 3600,
        }
    }
}

/// Recovery behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfigSection {
    /// Master switch. With recovery off every non-success outcome is final.
    pub enabled: bool,
    /// Backoff delays in seconds; length bounds the retries per failure.
    pub backoff_delays: Vec<u64>,
    /// Fresh-session retries allowed per task after context overflow.
    pub context_overflow_max_retries: u32,
    /// Additional kinds to treat as fatal beyond AUTH_ERROR.
    pub also_fatal: Vec<ErrorKind>,
}

impl Default for RecoveryConfigSection {
    fn default() -> Self {
        Self {
            enabled: true,
            backoff_delays: vec![600, 1200, 1800],
            context_overflow_max_retries: 2,
            also_fatal: Vec::new(),
        }
    }
}

/// Telegram notification settings. Notifications are skipped unless both
/// fields are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl TelegramConfig {
    /// True when both token and chat id are present and non-empty.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        matches!((&self.bot_token, &self.chat_id),
            (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty())
    }
}

/// Filesystem paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for session and per-task logs.
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            log_dir: base.join("drover").join("logs"),
        }
    }
}

// ============================================================
// Top level
// ============================================================

/// Full configuration for a drover run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub recovery: RecoveryConfigSection,
    pub telegram: TelegramConfig,
    pub paths: PathsConfig,
}

impl Config {
    /// Load from `path`, or from the default location when `path` is `None`.
    /// A missing default file yields defaults; a missing explicit file is an
    /// error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    DroverError::config_with_path(e.to_string(), path.to_path_buf())
                })?;
                Self::parse(&raw, path)
            }
            None => {
                let Some(path) = Self::default_path() else {
                    return Ok(Self::default());
                };
                if !path.exists() {
                    debug!("No config file at {}, using defaults", path.display());
                    return Ok(Self::default());
                }
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| DroverError::config_with_path(e.to_string(), path.clone()))?;
                Self::parse(&raw, &path)
            }
        }
    }

    /// Default config file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("drover").join("config.toml"))
    }

    fn parse(raw: &str, path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| DroverError::config_with_path(e.to_string(), path.to_path_buf()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.agent.binary.is_empty() {
            return Err(DroverError::InvalidConfig {
                field: "agent.binary".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.agent.timeout_secs == 0 {
            return Err(DroverError::InvalidConfig {
                field: "agent.timeout_secs".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.recovery.enabled && self.recovery.backoff_delays.is_empty() {
            return Err(DroverError::InvalidConfig {
                field: "recovery.backoff_delays".to_string(),
                reason: "must contain at least one delay when recovery is enabled".to_string(),
            });
        }
        if self.recovery.also_fatal.contains(&ErrorKind::Success) {
            return Err(DroverError::InvalidConfig {
                field: "recovery.also_fatal".to_string(),
                reason: "SUCCESS cannot be fatal".to_string(),
            });
        }
        Ok(())
    }

    /// Per-attempt timeout as a [`Duration`].
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agent.binary, "claude");
        assert_eq!(config.agent.model, "opus");
        assert!(config.recovery.enabled);
        assert_eq!(config.recovery.backoff_delays, vec![600, 1200, 1800]);
        assert_eq!(config.recovery.context_overflow_max_retries, 2);
        assert!(!config.telegram.is_configured());
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_toml() {
        let raw = r#"
            [recovery]
            backoff_delays = [5, 10]

            [telegram]
            bot_token = "tok"
            chat_id = "42"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.recovery.backoff_delays, vec![5, 10]);
        assert_eq!(config.recovery.context_overflow_max_retries, 2);
        assert!(config.telegram.is_configured());
        assert_eq!(config.agent.binary, "claude");
    }

    #[test]
    fn test_validate_rejects_empty_delays() {
        let mut config = Config::default();
        config.recovery.backoff_delays.clear();
        assert!(config.validate().is_err());

        config.recovery.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.agent.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_success_as_fatal() {
        let mut config = Config::default();
        config.recovery.also_fatal.push(ErrorKind::Success);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_errors() {
        let err = Config::load(Some(Path::new("/nonexistent/drover.toml")));
        assert!(err.is_err());
    }

    #[test]
    fn test_telegram_empty_strings_not_configured() {
        let telegram = TelegramConfig {
            bot_token: Some(String::new()),
            chat_id: Some("42".to_string()),
        };
        assert!(!telegram.is_configured());
    }
}
