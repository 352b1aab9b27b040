//! Outcome markers and outcome file rendering.
//!
//! An outcome file is markdown ending in `<promise>MARKER</promise>`. The
//! same marker syntax is used by the execution agent to report its result, so
//! parsing lives here and is shared by derivation and attempt classification.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::core::types::TaskStatus;

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<promise>(COMPLETE|FAILED|BLOCKED)</promise>").expect("marker regex")
});

static ANY_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<promise>[^<]*</promise>").expect("any marker regex"));

/// Terminal marker reported by the agent or recorded in an outcome file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Complete,
    Failed,
    Blocked,
}

impl Marker {
    pub fn as_str(self) -> &'static str {
        match self {
            Marker::Complete => "COMPLETE",
            Marker::Failed => "FAILED",
            Marker::Blocked => "BLOCKED",
        }
    }

    pub fn status(self) -> TaskStatus {
        match self {
            Marker::Complete => TaskStatus::Completed,
            Marker::Failed => TaskStatus::Failed,
            Marker::Blocked => TaskStatus::Blocked,
        }
    }

    /// The marker line as it appears in files and agent output.
    pub fn line(self) -> String {
        format!("<promise>{}</promise>", self.as_str())
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "COMPLETE" => Some(Marker::Complete),
            "FAILED" => Some(Marker::Failed),
            "BLOCKED" => Some(Marker::Blocked),
            _ => None,
        }
    }
}

/// Return the last marker in `text`, if any.
pub fn last_marker(text: &str) -> Option<Marker> {
    MARKER_RE
        .captures_iter(text)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| Marker::from_token(m.as_str()))
}

/// Resolve an outcome file's status from its last marker.
///
/// `None` means the file carries no marker and the task counts as pending.
pub fn parse_outcome_status(outcome_text: &str) -> Option<TaskStatus> {
    last_marker(outcome_text).map(Marker::status)
}

/// Remove every `<promise>..</promise>` marker so embedded agent output can
/// never override the marker the orchestrator appends.
pub fn strip_markers(text: &str) -> String {
    ANY_MARKER_RE.replace_all(text, "").into_owned()
}

/// Fields recorded in an outcome file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub task_id: String,
    pub task_name: String,
    pub marker: Marker,
    pub attempts: u32,
    pub elapsed: Duration,
    pub commit: Option<String>,
    pub stash: Option<String>,
    /// Failure reason; only rendered for non-complete outcomes.
    pub reason: Option<String>,
    pub summary: String,
    /// RFC 3339 timestamp; left out when `None` so tests stay deterministic.
    pub finished_at: Option<String>,
}

/// Render an outcome file whose last line is the marker.
pub fn render_outcome(record: &OutcomeRecord) -> String {
    let mut buf = String::new();
    buf.push_str(&format!(
        "## Outcome: {} {}\n\n",
        record.task_id, record.task_name
    ));
    let status = match record.marker {
        Marker::Complete => "completed",
        Marker::Failed => "failed",
        Marker::Blocked => "blocked",
    };
    buf.push_str(&format!("- **Status:** {status}\n"));
    buf.push_str(&format!("- **Attempts:** {}\n", record.attempts));
    buf.push_str(&format!(
        "- **Elapsed:** {}\n",
        format_elapsed(record.elapsed)
    ));
    if let Some(commit) = &record.commit {
        buf.push_str(&format!("- **Commit:** {commit}\n"));
    }
    if let Some(stash) = &record.stash {
        buf.push_str(&format!("- **Stash:** {stash}\n"));
    }
    if let Some(at) = &record.finished_at {
        buf.push_str(&format!("- **Finished:** {at}\n"));
    }
    if record.marker != Marker::Complete
        && let Some(reason) = &record.reason
    {
        buf.push_str(&format!("\n### Failure reason\n\n{}\n", reason.trim()));
    }
    let summary = strip_markers(&record.summary);
    let summary = summary.trim();
    if !summary.is_empty() {
        buf.push_str(&format!("\n### Summary\n\n{summary}\n"));
    }
    buf.push('\n');
    buf.push_str(&record.marker.line());
    buf.push('\n');
    buf
}

/// Format a duration as `1h 2m 3s`, dropping leading zero units.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Keep at most `limit` bytes from the end of `text`, on a char boundary.
pub fn tail_bytes(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
