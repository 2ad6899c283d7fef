//! Drover drives a coding agent CLI through a queue of numbered tasks,
//! classifying every attempt's output and recovering from the failures
//! worth recovering from.
//!
//! # Architecture
//!
//! - [`stream`] turns the agent's `stream-json` output into one classified
//!   outcome per attempt.
//! - [`agent`] owns the subprocess: one process per attempt, streamed,
//!   bounded by wall clock and cost budget, reaped exactly once.
//! - [`recovery`] is the pure decision machine: done, retry fresh, retry
//!   after backoff, or give up.
//! - [`pipeline`] runs the queue sequentially, cleaning the working tree
//!   between tasks and aggregating completed / on-hold / failed.
//! - [`health`], [`notify`], [`git`], and [`session_log`] are the
//!   collaborators the pipeline reaches through the traits in [`testing`].

pub mod agent;
pub mod config;
pub mod error;
pub mod git;
pub mod health;
pub mod notify;
pub mod outcome;
pub mod pipeline;
pub mod prompt;
pub mod recovery;
pub mod session_log;
pub mod stream;
pub mod tasks;
pub mod testing;

pub use agent::{CliAgentRunner, InvocationRequest};
pub use config::Config;
pub use error::{DroverError, Result};
pub use health::{CliHealthProbe, HealthStatus};
pub use notify::{DisabledNotifier, NotifyEvent, TelegramNotifier};
pub use outcome::{ErrorKind, Outcome};
pub use pipeline::{PipelineConfig, PipelineReport, ShutdownSignal, TaskPipeline};
pub use recovery::{AttemptState, RecoveryConfig, RecoveryStep};
pub use stream::StreamClassifier;
pub use tasks::{expand_task_ranges, TaskRef};
