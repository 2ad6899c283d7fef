//! Prompt assembly for agent invocations.
//!
//! Pure functions; called before every invocation, including retries, so a
//! recovery note from the controller lands in the next attempt's prompt.

use crate::tasks::TaskRef;

/// Build the implementation prompt for one attempt.
///
/// `skill` is the slash-command skill the agent should run; the recovery
/// note, when present, tells the agent how to approach a retry.
#[must_use]
pub fn build_prompt(skill: &str, task: &TaskRef, recovery_note: Option<&str>) -> String {
    let mut prompt = format!("/{skill} {task}");
    if let Some(note) = recovery_note {
        prompt.push_str("\n\n");
        prompt.push_str(note);
    }
    prompt
}

/// Build the best-effort batch-verification prompt run after the queue.
#[must_use]
pub fn build_batch_check_prompt(skill: &str, tasks: &[TaskRef]) -> String {
    let refs: Vec<String> = tasks.iter().map(ToString::to_string).collect();
    format!("/{skill} {}", refs.join(" "))
}
