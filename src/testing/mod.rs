//! Trait seams and test doubles.
//!
//! The pipeline talks to the outside world (agent process, health probe,
//! notifier, git) only through the traits in [`traits`], so tests can drive
//! it with the scripted doubles in [`mocks`] instead of a live agent.

pub mod mocks;
pub mod traits;

pub use mocks::{MockAgent, MockHealthProbe, NoopCleaner, RecordingNotifier};
pub use traits::{AgentRunner, HealthProbe, Notify, WorkspaceCleaner};
