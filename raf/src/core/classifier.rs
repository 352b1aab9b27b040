//! Deterministic classification of a single agent attempt.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::outcome::{Marker, last_marker};
use crate::core::types::AgentRun;

static NON_RETRYABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s>*_-]*retryable[*_]*\s*:[*_]*\s*(no|false)\b").expect("retryable regex")
});

/// What the orchestrator does after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptVerdict {
    /// The agent reported `COMPLETE`.
    Success,
    /// Try again if attempts remain.
    Retry { reason: String },
    /// Stop retrying this task.
    Terminal { reason: String },
}

/// Classify an agent run.
///
/// - context overflow is terminal (the same prompt will overflow again);
/// - a timeout retries unless the output opted out of retries;
/// - `COMPLETE` succeeds;
/// - `FAILED` with `Retryable: no` is terminal, otherwise it retries;
/// - `BLOCKED` or no marker at all retries.
pub fn classify_attempt(run: &AgentRun) -> AttemptVerdict {
    if run.context_overflow {
        return AttemptVerdict::Terminal {
            reason: "context overflow: the prompt exceeds the agent's context window".to_string(),
        };
    }
    let non_retryable = is_non_retryable(&run.output);
    if run.timed_out {
        if non_retryable {
            return AttemptVerdict::Terminal {
                reason: "timed out and marked non-retryable".to_string(),
            };
        }
        return AttemptVerdict::Retry {
            reason: "timed out".to_string(),
        };
    }
    match last_marker(&run.output) {
        Some(Marker::Complete) => AttemptVerdict::Success,
        Some(Marker::Failed) if non_retryable => AttemptVerdict::Terminal {
            reason: "agent reported failure and marked it non-retryable".to_string(),
        },
        Some(Marker::Failed) => AttemptVerdict::Retry {
            reason: "agent reported failure".to_string(),
        },
        Some(Marker::Blocked) => AttemptVerdict::Retry {
            reason: "agent reported the task as blocked".to_string(),
        },
        None => AttemptVerdict::Retry {
            reason: match run.exit_code {
                Some(code) if code != 0 => {
                    format!("no completion marker found (exit code {code})")
                }
                _ => "no completion marker found".to_string(),
            },
        },
    }
}

/// True when the output carries a `Retryable: no` (or `false`) line.
pub fn is_non_retryable(output: &str) -> bool {
    NON_RETRYABLE_RE.is_match(output)
}
