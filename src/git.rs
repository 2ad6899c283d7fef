//! Git working-tree cleanup between tasks.
//!
//! Every task attempt starts from a clean tree so a half-finished change from
//! a failed attempt cannot bleed into the next one. Committed work is never
//! touched; only uncommitted modifications and untracked files go.

use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

use crate::error::{DroverError, Result};

// ============================================================
// Status inspection
// ============================================================

/// List uncommitted changes as reported by `git status --porcelain`.
///
/// Returns the paths with their two-column status stripped.
pub fn get_uncommitted_changes(working_dir: &Path) -> Result<Vec<String>> {
    let output = run_git(working_dir, &["status", "--porcelain"])?;
    Ok(output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| line[3..].to_string())
        .collect())
}

/// True if the directory is inside a git work tree.
#[must_use]
pub fn is_git_repository(working_dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(working_dir)
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

// ============================================================
// Cleanup
// ============================================================

/// Discard uncommitted modifications and untracked files.
///
/// Runs `git checkout -- .` then `git clean -fd`. Returns the list of paths
/// that were dirty before cleanup, for the session log. A directory that is
/// not a git repository is left alone.
pub fn cleanup_working_dir(working_dir: &Path) -> Result<Vec<String>> {
    if !is_git_repository(working_dir) {
        debug!("Not a git repository, skipping cleanup: {}", working_dir.display());
        return Ok(Vec::new());
    }

    let dirty = get_uncommitted_changes(working_dir)?;
    if dirty.is_empty() {
        debug!("Working tree already clean");
        return Ok(dirty);
    }

    run_git(working_dir, &["checkout", "--", "."])?;
    run_git(working_dir, &["clean", "-fd"])?;

    debug!("Cleaned {} uncommitted path(s)", dirty.len());
    Ok(dirty)
}

/// [`crate::testing::WorkspaceCleaner`] backed by the real git binary.
#[derive(Default)]
pub struct GitCleaner;

impl crate::testing::WorkspaceCleaner for GitCleaner {
    fn cleanup(&self, working_dir: &Path) -> Result<Vec<String>> {
        cleanup_working_dir(working_dir)
    }
}

fn run_git(working_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(working_dir)
        .output()
        .map_err(|e| DroverError::git(args.join(" "), e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("git {} failed: {}", args.join(" "), stderr.trim());
        return Err(DroverError::git(args.join(" "), stderr.trim().to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
