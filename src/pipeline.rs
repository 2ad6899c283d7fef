//! Sequential task pipeline.
//!
//! Drives the queue of numbered tasks one at a time: clean the working tree,
//! run the agent, feed the outcome through the recovery state machine, and
//! retry or move on. A fatal outcome (auth failure by default) halts the
//! remaining queue rather than burning attempts that cannot succeed. An
//! operator interrupt kills the running agent and stops the pipeline at the
//! current task.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::agent::InvocationRequest;
use crate::error::Result;
use crate::notify::NotifyEvent;
use crate::outcome::ErrorKind;
use crate::prompt::{build_batch_check_prompt, build_prompt};
use crate::recovery::{
    decide, wait_for_recovery, AttemptState, RecoveryConfig, RecoveryEvent, RecoveryStep,
};
use crate::session_log::{SessionLog, TaskLog};
use crate::tasks::TaskRef;
use crate::testing::{AgentRunner, HealthProbe, Notify, WorkspaceCleaner};

// ============================================================
// Shutdown signal
// ============================================================

/// Cooperative shutdown flag, set once by the interrupt handler.
#[derive(Default)]
pub struct ShutdownSignal {
    flag: AtomicBool,
    notify: tokio::sync::Notify,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown is requested.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

// ============================================================
// Run configuration and report
// ============================================================

/// Everything one pipeline run needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub project: String,
    pub tasks: Vec<u32>,
    pub working_dir: PathBuf,
    pub log_dir: PathBuf,
    pub implement_skill: String,
    pub batch_check_skill: String,
    pub attempt_timeout: Duration,
    pub max_budget_usd: Option<f64>,
    pub recovery: RecoveryConfig,
    /// Run the batch verification pass after the queue.
    pub run_batch_check: bool,
}

/// Aggregated result of one run.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub completed: Vec<u32>,
    pub on_hold: Vec<u32>,
    pub failed: Vec<(u32, String)>,
    /// True when a fatal failure or interrupt stopped the queue early.
    pub halted: bool,
    pub duration: Duration,
}

impl PipelineReport {
    /// 0 when every task resolved (completed or on hold) and the queue ran
    /// to the end; 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.failed.is_empty() && !self.halted {
            0
        } else {
            1
        }
    }
}

/// How one task left the attempt loop.
enum TaskResolution {
    Completed,
    OnHold,
    Failed(String),
    FatalFailure(String),
    Interrupted,
}

// ============================================================
// Pipeline
// ============================================================

/// Sequential executor over the task queue.
pub struct TaskPipeline {
    agent: Arc<dyn AgentRunner>,
    probe: Arc<dyn HealthProbe>,
    notifier: Arc<dyn Notify>,
    cleaner: Arc<dyn WorkspaceCleaner>,
    shutdown: Arc<ShutdownSignal>,
}

impl TaskPipeline {
    pub fn new(
        agent: Arc<dyn AgentRunner>,
        probe: Arc<dyn HealthProbe>,
        notifier: Arc<dyn Notify>,
        cleaner: Arc<dyn WorkspaceCleaner>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            agent,
            probe,
            notifier,
            cleaner,
            shutdown,
        }
    }

    /// Run the whole queue and return the aggregated report.
    pub async fn run(&self, config: &PipelineConfig) -> Result<PipelineReport> {
        let started = Instant::now();
        let mut session_log = SessionLog::create(&config.log_dir, &config.project)?;
        session_log.write_header(&config.project, &config.tasks)?;
        info!("Session log: {}", session_log.path().display());

        self.notifier
            .notify(&NotifyEvent::SessionStart {
                project: config.project.clone(),
                tasks: config.tasks.clone(),
            })
            .await;

        let mut report = PipelineReport::default();

        for number in &config.tasks {
            let task = TaskRef::new(&config.project, *number);

            if self.shutdown.is_triggered() {
                report.halted = true;
                session_log.append(&format!("Interrupted before {task}"))?;
                self.notify_stopped(&task, "interrupted by operator").await;
                break;
            }

            match self.cleaner.cleanup(&config.working_dir) {
                Ok(cleaned) if !cleaned.is_empty() => {
                    session_log.append(&format!(
                        "Cleaned {} leftover path(s) before {task}",
                        cleaned.len()
                    ))?;
                }
                Ok(_) => {}
                Err(e) => {
                    // A dirty tree taints the attempt; do not run on top of it.
                    error!("Working tree cleanup failed before {task}: {e}");
                    report.failed.push((*number, format!("cleanup failed: {e}")));
                    session_log.append(&format!("Task {task}: cleanup failed: {e}"))?;
                    continue;
                }
            }

            info!("Starting {task}");
            let resolution = self.run_task(config, &task, &mut session_log).await?;

            match resolution {
                TaskResolution::Completed => {
                    report.completed.push(*number);
                    session_log.append(&format!("Task {task}: SUCCESS"))?;
                }
                TaskResolution::OnHold => {
                    report.on_hold.push(*number);
                    session_log.append(&format!("Task {task}: ON_HOLD"))?;
                }
                TaskResolution::Failed(reason) => {
                    report.failed.push((*number, reason.clone()));
                    session_log.append(&format!("Task {task}: FAILED: {reason}"))?;
                }
                TaskResolution::FatalFailure(reason) => {
                    report.failed.push((*number, reason.clone()));
                    report.halted = true;
                    session_log.append(&format!("Task {task}: FATAL: {reason}"))?;
                    self.notify_stopped(&task, &reason).await;
                    break;
                }
                TaskResolution::Interrupted => {
                    report.failed.push((*number, "interrupted by operator".to_string()));
                    report.halted = true;
                    session_log.append(&format!("Task {task}: interrupted by operator"))?;
                    self.notify_stopped(&task, "interrupted by operator").await;
                    break;
                }
            }
        }

        if config.run_batch_check && !report.halted && !report.completed.is_empty() {
            self.run_batch_check(config, &report, &mut session_log).await;
        }

        report.duration = started.elapsed();
        session_log.write_summary(
            &report.completed,
            &report.on_hold,
            &report.failed,
            report.duration,
        )?;

        self.notifier
            .notify(&NotifyEvent::SessionComplete {
                project: config.project.clone(),
                completed: report.completed.len(),
                on_hold: report.on_hold.len(),
                failed: report.failed.len(),
                duration: report.duration,
            })
            .await;

        Ok(report)
    }

    /// Drive one task through attempts until the recovery machine resolves it.
    async fn run_task(
        &self,
        config: &PipelineConfig,
        task: &TaskRef,
        session_log: &mut SessionLog,
    ) -> Result<TaskResolution> {
        let mut task_log = TaskLog::open(&config.log_dir, &task.file_stem())?;
        let mut state = AttemptState::default();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            task_log.begin_attempt(attempt)?;
            task_log.flush()?;

            let note = state.recovery_note.take();
            let request = InvocationRequest {
                prompt: build_prompt(&config.implement_skill, task, note.as_deref()),
                working_dir: config.working_dir.clone(),
                resume_session: state.resume_session_id.clone(),
                timeout: config.attempt_timeout,
                max_budget_usd: config.max_budget_usd,
                log_path: Some(task_log.path().to_path_buf()),
            };

            // Dropping the run future on interrupt kills the child.
            let outcome = tokio::select! {
                outcome = self.agent.run(request) => outcome?,
                () = self.shutdown.wait() => {
                    warn!("Interrupt received, stopping {task}");
                    return Ok(TaskResolution::Interrupted);
                }
            };

            session_log.append(&format!("{task} attempt {attempt}: {}", outcome.summary()))?;

            match decide(&config.recovery, &mut state, &outcome) {
                RecoveryStep::Done => {
                    return Ok(match outcome.kind {
                        ErrorKind::OnHold => TaskResolution::OnHold,
                        _ => TaskResolution::Completed,
                    });
                }
                RecoveryStep::RetryFresh => {
                    self.notifier
                        .notify(&NotifyEvent::ContextOverflow {
                            task: task.to_string(),
                            attempt: state.context_overflow_attempts,
                            max_retries: config.recovery.context_overflow_max_retries,
                        })
                        .await;
                    info!(
                        "{task}: context overflow, fresh retry {} of {}",
                        state.context_overflow_attempts,
                        config.recovery.context_overflow_max_retries
                    );
                }
                RecoveryStep::RetryAfterBackoff => {
                    let healthy = tokio::select! {
                        healthy = self.wait_out_backoff(config, task, outcome.kind) => healthy,
                        () = self.shutdown.wait() => {
                            warn!("Interrupt received during recovery wait for {task}");
                            return Ok(TaskResolution::Interrupted);
                        }
                    };
                    if !healthy {
                        let reason = format!(
                            "{}: recovery window exhausted ({})",
                            outcome.kind, outcome.message
                        );
                        self.notify_failed(task, outcome.kind, &reason).await;
                        return Ok(TaskResolution::Failed(reason));
                    }
                    info!("{task}: agent healthy again, resuming session");
                }
                RecoveryStep::Exhausted => {
                    let reason = format!("{}: {}", outcome.kind, outcome.message);
                    self.notify_failed(task, outcome.kind, &reason).await;
                    return Ok(if config.recovery.is_fatal(outcome.kind) {
                        TaskResolution::FatalFailure(reason)
                    } else {
                        TaskResolution::Failed(reason)
                    });
                }
            }
        }
    }

    /// Wait out the backoff schedule, forwarding progress to the notifier.
    async fn wait_out_backoff(
        &self,
        config: &PipelineConfig,
        task: &TaskRef,
        kind: ErrorKind,
    ) -> bool {
        let notifier = Arc::clone(&self.notifier);
        let task_name = task.to_string();
        let max_attempts = config.recovery.backoff_delays.len() as u32;
        wait_for_recovery(&config.recovery, self.probe.as_ref(), move |event| {
            let notifier = Arc::clone(&notifier);
            let task = task_name.clone();
            match event {
                RecoveryEvent::Waiting { attempt, delay } => {
                    tokio::spawn(async move {
                        notifier
                            .notify(&NotifyEvent::RecoveryStart {
                                task,
                                kind,
                                attempt,
                                max_attempts,
                                delay,
                            })
                            .await;
                    });
                }
                RecoveryEvent::ProbeHealthy => {
                    tokio::spawn(async move {
                        notifier.notify(&NotifyEvent::RecoverySuccess { task }).await;
                    });
                }
                RecoveryEvent::ProbeUnhealthy(kind) => {
                    info!("{task}: probe still unhealthy ({kind})");
                }
            }
        })
        .await
    }

    /// Best-effort verification pass over the completed tasks.
    async fn run_batch_check(
        &self,
        config: &PipelineConfig,
        report: &PipelineReport,
        session_log: &mut SessionLog,
    ) {
        let tasks: Vec<TaskRef> = report
            .completed
            .iter()
            .map(|n| TaskRef::new(&config.project, *n))
            .collect();
        info!("Running batch verification over {} task(s)", tasks.len());

        let request = InvocationRequest {
            prompt: build_batch_check_prompt(&config.batch_check_skill, &tasks),
            working_dir: config.working_dir.clone(),
            resume_session: None,
            timeout: config.attempt_timeout,
            max_budget_usd: config.max_budget_usd,
            log_path: None,
        };

        match self.agent.run(request).await {
            Ok(outcome) => {
                let line = format!("Batch verification: {}", outcome.summary());
                info!("{line}");
                if let Err(e) = session_log.append(&line) {
                    warn!("Could not log batch verification result: {e}");
                }
            }
            Err(e) => warn!("Batch verification could not run: {e}"),
        }
    }

    async fn notify_failed(&self, task: &TaskRef, kind: ErrorKind, reason: &str) {
        self.notifier
            .notify(&NotifyEvent::TaskFailed {
                task: task.to_string(),
                kind,
                message: reason.to_string(),
            })
            .await;
    }

    async fn notify_stopped(&self, task: &TaskRef, reason: &str) {
        self.notifier
            .notify(&NotifyEvent::PipelineStopped {
                task: task.to_string(),
                reason: reason.to_string(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Outcome;
    use crate::testing::{MockAgent, MockHealthProbe, NoopCleaner, RecordingNotifier};
    use tempfile::TempDir;

    struct Fixture {
        agent: Arc<MockAgent>,
        notifier: Arc<RecordingNotifier>,
        shutdown: Arc<ShutdownSignal>,
        pipeline: TaskPipeline,
        _dir: TempDir,
        config: PipelineConfig,
    }

    fn fixture(outcomes: Vec<Outcome>, probe: MockHealthProbe, tasks: Vec<u32>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(MockAgent::with_outcomes(outcomes));
        let notifier = Arc::new(RecordingNotifier::new());
        let shutdown = Arc::new(ShutdownSignal::new());
        let pipeline = TaskPipeline::new(
            Arc::clone(&agent) as Arc<dyn AgentRunner>,
            Arc::new(probe) as Arc<dyn HealthProbe>,
            Arc::clone(&notifier) as Arc<dyn Notify>,
            Arc::new(NoopCleaner),
            Arc::clone(&shutdown),
        );
        let config = PipelineConfig {
            project: "demo".to_string(),
            tasks,
            working_dir: dir.path().to_path_buf(),
            log_dir: dir.path().join("logs"),
            implement_skill: "implement-task".to_string(),
            batch_check_skill: "batch-check".to_string(),
            attempt_timeout: Duration::from_secs(60),
            max_budget_usd: None,
            recovery: RecoveryConfig {
                enabled: true,
                backoff_delays: vec![Duration::from_secs(1), Duration::from_secs(2)],
                context_overflow_max_retries: 2,
                max_transient_retries: 2,
                also_fatal: Vec::new(),
            },
            run_batch_check: false,
        };
        Fixture {
            agent,
            notifier,
            shutdown,
            pipeline,
            _dir: dir,
            config,
        }
    }

    fn success() -> Outcome {
        Outcome::new(ErrorKind::Success, "done")
    }

    #[tokio::test]
    async fn test_all_tasks_complete() {
        let f = fixture(
            vec![success(), success(), success()],
            MockHealthProbe::healthy(),
            vec![1, 2, 3],
        );
        let report = f.pipeline.run(&f.config).await.unwrap();
        assert_eq!(report.completed, vec![1, 2, 3]);
        assert!(report.failed.is_empty());
        assert!(!report.halted);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(f.agent.invocation_count(), 3);
    }

    #[tokio::test]
    async fn test_on_hold_is_tracked_separately() {
        let f = fixture(
            vec![success(), Outcome::new(ErrorKind::OnHold, "ON_HOLD: blocked")],
            MockHealthProbe::healthy(),
            vec![1, 2],
        );
        let report = f.pipeline.run(&f.config).await.unwrap();
        assert_eq!(report.completed, vec![1]);
        assert_eq!(report.on_hold, vec![2]);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_auth_error_halts_queue() {
        let f = fixture(
            vec![success(), Outcome::new(ErrorKind::AuthError, "401 Unauthorized")],
            MockHealthProbe::healthy(),
            vec![1, 2, 3],
        );
        let report = f.pipeline.run(&f.config).await.unwrap();
        assert_eq!(report.completed, vec![1]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.halted);
        assert_eq!(report.exit_code(), 1);
        // Task 3 was never attempted.
        assert_eq!(f.agent.invocation_count(), 2);
        let events = f.notifier.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, NotifyEvent::PipelineStopped { .. })));
    }

    #[tokio::test]
    async fn test_unknown_failure_does_not_halt_queue() {
        let f = fixture(
            vec![Outcome::new(ErrorKind::Unknown, "no result record"), success()],
            MockHealthProbe::healthy(),
            vec![1, 2],
        );
        let report = f.pipeline.run(&f.config).await.unwrap();
        assert_eq!(report.completed, vec![2]);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.halted);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_context_overflow_retries_fresh_then_fails() {
        let overflow = Outcome::new(ErrorKind::ContextOverflow, "prompt is too long")
            .with_session_id("s-1");
        let f = fixture(
            vec![overflow.clone(), overflow.clone(), overflow],
            MockHealthProbe::healthy(),
            vec![1],
        );
        let report = f.pipeline.run(&f.config).await.unwrap();
        assert!(report.completed.is_empty());
        assert_eq!(report.failed.len(), 1);

        // Initial attempt plus exactly two fresh retries.
        let requests = f.agent.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].resume_session.is_none());
        assert!(!requests[0].prompt.contains("context overflow"));
        for request in &requests[1..] {
            assert!(request.resume_session.is_none());
            assert!(request.prompt.contains("context overflow"));
            assert!(request.prompt.contains("essential changes"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_waits_then_resumes_session() {
        let f = fixture(
            vec![
                Outcome::new(ErrorKind::RateLimited, "429 rate limit").with_session_id("sess-7"),
                success(),
            ],
            MockHealthProbe::with_results(vec![
                Err(ErrorKind::RateLimited),
                Err(ErrorKind::RateLimited),
                Ok(()),
            ]),
            vec![1],
        );
        let started = tokio::time::Instant::now();
        let report = f.pipeline.run(&f.config).await.unwrap();
        assert_eq!(report.completed, vec![1]);

        // Both configured delays were waited out.
        assert!(started.elapsed() >= Duration::from_secs(3));

        let requests = f.agent.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].resume_session.as_deref(), Some("sess-7"));
        assert!(requests[1].prompt.contains("recovery resume"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_recovery_window_fails_task() {
        let f = fixture(
            vec![Outcome::new(ErrorKind::Overloaded, "529 overloaded")],
            MockHealthProbe::with_results(vec![
                Err(ErrorKind::Overloaded),
                Err(ErrorKind::Overloaded),
                Err(ErrorKind::Overloaded),
            ]),
            vec![1],
        );
        let report = f.pipeline.run(&f.config).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("recovery window exhausted"));
        assert!(!report.halted);
        assert_eq!(f.agent.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_recovery_fails_on_first_error() {
        let mut f = fixture(
            vec![Outcome::new(ErrorKind::RateLimited, "429"), success()],
            MockHealthProbe::healthy(),
            vec![1, 2],
        );
        f.config.recovery.enabled = false;
        let report = f.pipeline.run(&f.config).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.completed, vec![2]);
        assert_eq!(f.agent.invocation_count(), 2);
    }

    #[tokio::test]
    async fn test_batch_check_runs_after_completions() {
        let mut f = fixture(
            vec![success(), success(), Outcome::new(ErrorKind::Success, "batch ok")],
            MockHealthProbe::healthy(),
            vec![1, 2],
        );
        f.config.run_batch_check = true;
        let report = f.pipeline.run(&f.config).await.unwrap();
        assert_eq!(report.completed, vec![1, 2]);

        let requests = f.agent.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].prompt, "/batch-check demo#1 demo#2");
    }

    #[tokio::test]
    async fn test_shutdown_before_start_halts_immediately() {
        let f = fixture(vec![success()], MockHealthProbe::healthy(), vec![1, 2]);
        f.shutdown.trigger();
        let report = f.pipeline.run(&f.config).await.unwrap();
        assert!(report.halted);
        assert!(report.completed.is_empty());
        assert_eq!(f.agent.invocation_count(), 0);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_session_events_notified() {
        let f = fixture(vec![success()], MockHealthProbe::healthy(), vec![1]);
        f.pipeline.run(&f.config).await.unwrap();
        let events = f.notifier.events();
        assert!(matches!(events.first(), Some(NotifyEvent::SessionStart { .. })));
        assert!(matches!(events.last(), Some(NotifyEvent::SessionComplete { .. })));
    }

    #[tokio::test]
    async fn test_session_log_written() {
        let f = fixture(vec![success()], MockHealthProbe::healthy(), vec![1]);
        f.pipeline.run(&f.config).await.unwrap();

        let log_dir = f.config.log_dir.clone();
        let entries: Vec<_> = std::fs::read_dir(&log_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        let session = entries
            .iter()
            .find(|name| name.contains("session"))
            .expect("session log exists");
        let content = std::fs::read_to_string(log_dir.join(session)).unwrap();
        assert!(content.contains("SESSION START: demo"));
        assert!(content.contains("Task demo#1: SUCCESS"));
        assert!(content.contains("Completed: 1"));
    }
}
