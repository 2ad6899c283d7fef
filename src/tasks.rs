//! Task identifiers and range expansion.
//!
//! Operators address tasks by number, with ranges: `drover implement proj 1-4 6 8-10`
//! runs tasks 1,2,3,4,6,8,9,10. Pure parsing, no decision logic.

use tracing::warn;

/// Reference to one task within a project, e.g. `billing#7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef {
    /// Project name.
    pub project: String,
    /// Task number within the project.
    pub number: u32,
}

impl TaskRef {
    /// Create a task reference.
    pub fn new(project: impl Into<String>, number: u32) -> Self {
        Self {
            project: project.into(),
            number,
        }
    }

    /// Filesystem-safe form (`project_7`), used for log file names.
    #[must_use]
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.project, self.number)
    }
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.project, self.number)
    }
}

/// Expand task tokens into an ordered, distinct sequence of task numbers.
///
/// Tokens are single numbers (`"6"`) or inclusive ranges (`"1-4"`).
/// Invalid tokens and reversed ranges are skipped with a warning rather
/// than aborting, so one typo does not lose a whole overnight run.
#[must_use]
pub fn expand_task_ranges(tokens: &[String]) -> Vec<u32> {
    let mut out: Vec<u32> = Vec::new();
    let mut push = |n: u32, out: &mut Vec<u32>| {
        if !out.contains(&n) {
            out.push(n);
        }
    };

    for token in tokens {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        if let Some((start, end)) = token.split_once('-') {
            match (start.trim().parse::<u32>(), end.trim().parse::<u32>()) {
                (Ok(start), Ok(end)) if start <= end => {
                    for n in start..=end {
                        push(n, &mut out);
                    }
                }
                (Ok(start), Ok(end)) => {
                    warn!("Skipping reversed task range {start}-{end}");
                }
                _ => warn!("Skipping invalid task range token: {token}"),
            }
        } else {
            match token.parse::<u32>() {
                Ok(n) => push(n, &mut out),
                Err(_) => warn!("Skipping invalid task token: {token}"),
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &[&str]) -> Vec<String> {
        s.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn test_expand_mixed_ranges() {
        assert_eq!(
            expand_task_ranges(&tokens(&["1-4", "6", "8-10"])),
            vec![1, 2, 3, 4, 6, 8, 9, 10]
        );
    }

    #[test]
    fn test_expand_single_numbers() {
        assert_eq!(expand_task_ranges(&tokens(&["3", "1", "2"])), vec![3, 1, 2]);
    }

    #[test]
    fn test_expand_deduplicates_preserving_order() {
        assert_eq!(
            expand_task_ranges(&tokens(&["2-4", "3", "1-3"])),
            vec![2, 3, 4, 1]
        );
    }

    #[test]
    fn test_expand_skips_invalid_tokens() {
        assert_eq!(
            expand_task_ranges(&tokens(&["x", "2", "a-b", "4-2", "5"])),
            vec![2, 5]
        );
    }

    #[test]
    fn test_expand_empty_input() {
        assert!(expand_task_ranges(&[]).is_empty());
        assert!(expand_task_ranges(&tokens(&["junk"])).is_empty());
    }

    #[test]
    fn test_task_ref_display_and_stem() {
        let task = TaskRef::new("billing", 7);
        assert_eq!(task.to_string(), "billing#7");
        assert_eq!(task.file_stem(), "billing_7");
    }
}
