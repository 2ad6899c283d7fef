//! Abstractions over external effects.

use async_trait::async_trait;
use std::path::Path;

use crate::agent::InvocationRequest;
use crate::error::Result;
use crate::notify::NotifyEvent;
use crate::outcome::{ErrorKind, Outcome};

/// Runs one agent attempt to completion.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Execute the request and classify what happened.
    ///
    /// Returns `Err` only when the tool itself fails (binary missing, spawn
    /// failure); agent failures come back as a classified [`Outcome`].
    async fn run(&self, request: InvocationRequest) -> Result<Outcome>;
}

/// Checks whether the agent backend is currently usable.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok(())` when healthy, otherwise the failure kind observed.
    async fn check(&self) -> std::result::Result<(), ErrorKind>;
}

/// Delivers operator notifications. Implementations must never fail the
/// pipeline; delivery problems are logged and swallowed.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, event: &NotifyEvent);
}

/// Resets the working tree between tasks.
pub trait WorkspaceCleaner: Send + Sync {
    /// Discard uncommitted changes; returns the paths that were dirty.
    fn cleanup(&self, working_dir: &Path) -> Result<Vec<String>>;
}
