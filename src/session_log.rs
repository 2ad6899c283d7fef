//! Session and per-task log files.
//!
//! A pipeline run writes one session log (header, per-task lines, summary)
//! plus one raw log per task capturing everything the agent streamed. Log
//! writes are plain buffered file I/O; failures surface as
//! [`DroverError::SessionLog`] so the pipeline can decide how loudly to care.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DroverError, Result};

const RULE_HEAVY: &str =
    "════════════════════════════════════════════════════════════";
const RULE_LIGHT: &str =
    "────────────────────────────────────────────────────────────";

/// Format a duration as `HH:MM:SS`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

// ============================================================
// Session log
// ============================================================

/// Append-only log for one pipeline run.
pub struct SessionLog {
    path: PathBuf,
    file: File,
}

impl SessionLog {
    /// Create the session log file under `log_dir`, named by project and
    /// timestamp (`<project>_session_20260826_093000.log`).
    pub fn create(log_dir: &Path, project: &str) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = log_dir.join(format!("{project}_session_{stamp}.log"));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|e| DroverError::SessionLog {
                message: format!("cannot create {}: {e}", path.display()),
            })?;
        Ok(Self { path, file })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the run header: project, task list, start time.
    pub fn write_header(&mut self, project: &str, tasks: &[u32]) -> Result<()> {
        let task_list: Vec<String> = tasks.iter().map(ToString::to_string).collect();
        writeln!(self.file, "{RULE_HEAVY}")?;
        writeln!(self.file, "SESSION START: {project}")?;
        writeln!(self.file, "Tasks: {}", task_list.join(", "))?;
        writeln!(self.file, "Started: {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(self.file, "{RULE_HEAVY}")?;
        self.file.flush()?;
        Ok(())
    }

    /// Append one timestamped line.
    pub fn append(&mut self, line: &str) -> Result<()> {
        writeln!(self.file, "[{}] {line}", Local::now().format("%H:%M:%S"))?;
        self.file.flush()?;
        Ok(())
    }

    /// Write the run summary: per-bucket task lists and total duration.
    pub fn write_summary(
        &mut self,
        completed: &[u32],
        on_hold: &[u32],
        failed: &[(u32, String)],
        total: Duration,
    ) -> Result<()> {
        let fmt = |tasks: &[u32]| -> String {
            if tasks.is_empty() {
                "none".to_string()
            } else {
                tasks.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            }
        };

        writeln!(self.file, "{RULE_LIGHT}")?;
        writeln!(self.file, "SESSION SUMMARY")?;
        writeln!(self.file, "Completed: {}", fmt(completed))?;
        writeln!(self.file, "On hold:   {}", fmt(on_hold))?;
        if failed.is_empty() {
            writeln!(self.file, "Failed:    none")?;
        } else {
            writeln!(self.file, "Failed:")?;
            for (task, reason) in failed {
                writeln!(self.file, "  #{task}: {reason}")?;
            }
        }
        writeln!(self.file, "Duration:  {}", format_duration(total))?;
        writeln!(self.file, "{RULE_HEAVY}")?;
        self.file.flush()?;
        Ok(())
    }
}

// ============================================================
// Per-task log
// ============================================================

/// Raw log of everything one task's agent attempts streamed.
pub struct TaskLog {
    path: PathBuf,
    file: File,
}

impl TaskLog {
    /// Create (or append to, across retries) the per-task log file.
    pub fn open(log_dir: &Path, file_stem: &str) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join(format!("{file_stem}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the start of one attempt.
    pub fn begin_attempt(&mut self, attempt: u32) -> Result<()> {
        writeln!(self.file, "{RULE_LIGHT}")?;
        writeln!(
            self.file,
            "ATTEMPT {attempt} at {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        self.file.flush()?;
        Ok(())
    }

    /// Append one raw line from the agent stream.
    pub fn append(&mut self, line: &str) -> Result<()> {
        writeln!(self.file, "{line}")?;
        Ok(())
    }

    /// Flush buffered output to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "00:00:00");
        assert_eq!(format_duration(Duration::from_secs(61)), "00:01:01");
        assert_eq!(format_duration(Duration::from_secs(3661)), "01:01:01");
        assert_eq!(format_duration(Duration::from_secs(25 * 3600)), "25:00:00");
    }

    #[test]
    fn test_session_log_round() {
        let dir = TempDir::new().unwrap();
        let mut log = SessionLog::create(dir.path(), "billing").unwrap();
        log.write_header("billing", &[1, 2, 3]).unwrap();
        log.append("Task billing#1: SUCCESS").unwrap();
        log.write_summary(&[1], &[2], &[(3, "TIMEOUT: budget exceeded".into())], Duration::from_secs(90))
            .unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("SESSION START: billing"));
        assert!(content.contains("Tasks: 1, 2, 3"));
        assert!(content.contains("Task billing#1: SUCCESS"));
        assert!(content.contains("Completed: 1"));
        assert!(content.contains("On hold:   2"));
        assert!(content.contains("#3: TIMEOUT: budget exceeded"));
        assert!(content.contains("Duration:  00:01:30"));
    }

    #[test]
    fn test_task_log_appends_across_attempts() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = TaskLog::open(dir.path(), "billing_1").unwrap();
            log.begin_attempt(1).unwrap();
            log.append("first attempt output").unwrap();
            log.flush().unwrap();
        }
        {
            let mut log = TaskLog::open(dir.path(), "billing_1").unwrap();
            log.begin_attempt(2).unwrap();
            log.append("second attempt output").unwrap();
            log.flush().unwrap();
        }

        let content = std::fs::read_to_string(dir.path().join("billing_1.log")).unwrap();
        assert!(content.contains("ATTEMPT 1"));
        assert!(content.contains("first attempt output"));
        assert!(content.contains("ATTEMPT 2"));
        assert!(content.contains("second attempt output"));
    }

    #[test]
    fn test_session_log_file_name() {
        let dir = TempDir::new().unwrap();
        let log = SessionLog::create(dir.path(), "billing").unwrap();
        let name = log.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("billing_session_"));
        assert!(name.ends_with(".log"));
    }
}
