//! Scripted test doubles for the traits in [`super::traits`].

use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;

use crate::agent::InvocationRequest;
use crate::error::{DroverError, Result};
use crate::notify::NotifyEvent;
use crate::outcome::{ErrorKind, Outcome};

use super::traits::{AgentRunner, HealthProbe, Notify, WorkspaceCleaner};

// ============================================================
// Agent
// ============================================================

/// Agent double that replays a scripted sequence of outcomes and records
/// every request it received.
pub struct MockAgent {
    outcomes: Mutex<Vec<Outcome>>,
    requests: Mutex<Vec<InvocationRequest>>,
}

impl MockAgent {
    /// Script the outcomes to return, in order.
    #[must_use]
    pub fn with_outcomes(outcomes: Vec<Outcome>) -> Self {
        let mut outcomes = outcomes;
        outcomes.reverse();
        Self {
            outcomes: Mutex::new(outcomes),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<InvocationRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn invocation_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentRunner for MockAgent {
    async fn run(&self, request: InvocationRequest) -> Result<Outcome> {
        self.requests.lock().unwrap().push(request);
        self.outcomes
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| DroverError::agent("mock outcome script exhausted"))
    }
}

// ============================================================
// Health probe
// ============================================================

/// Probe double replaying scripted results; reports healthy once the script
/// runs out.
pub struct MockHealthProbe {
    results: Mutex<Vec<std::result::Result<(), ErrorKind>>>,
}

impl MockHealthProbe {
    /// Probe that is always healthy.
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            results: Mutex::new(Vec::new()),
        }
    }

    /// Script probe results, in order.
    #[must_use]
    pub fn with_results(results: Vec<std::result::Result<(), ErrorKind>>) -> Self {
        let mut results = results;
        results.reverse();
        Self {
            results: Mutex::new(results),
        }
    }
}

#[async_trait]
impl HealthProbe for MockHealthProbe {
    async fn check(&self) -> std::result::Result<(), ErrorKind> {
        self.results.lock().unwrap().pop().unwrap_or(Ok(()))
    }
}

// ============================================================
// Notifier
// ============================================================

/// Notifier double that records every event.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotifyEvent>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<NotifyEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notify for RecordingNotifier {
    async fn notify(&self, event: &NotifyEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ============================================================
// Workspace cleaner
// ============================================================

/// Cleaner double that does nothing and reports a clean tree.
#[derive(Default)]
pub struct NoopCleaner;

impl WorkspaceCleaner for NoopCleaner {
    fn cleanup(&self, _working_dir: &Path) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
