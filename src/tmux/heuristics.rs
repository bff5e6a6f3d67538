use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Status of an AI agent session, inferred from its terminal output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Status cannot be determined
    #[default]
    Unknown,
    /// Agent is actively working (spinner, tool activity)
    Running,
    /// Agent sits at a prompt waiting for the user
    Waiting,
    /// Nothing recognisable and no recent activity
    Idle,
    /// Agent reported an error
    Error,
}

impl AgentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            AgentStatus::Unknown => "unknown",
            AgentStatus::Running => "running",
            AgentStatus::Waiting => "waiting",
            AgentStatus::Idle => "idle",
            AgentStatus::Error => "error",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How many non-blank lines, counting back from the newest, are inspected.
const MAX_SCANNED_LINES: usize = 10;

/// Sessions quieter than this fall back to idle instead of unknown.
pub const IDLE_AFTER: Duration = Duration::from_secs(30);

static RE_WAITING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([>❯›]\s*$|enter a command|waiting for|^\s*[$%](\s|$))")
        .expect("waiting pattern is valid")
});

static RE_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(error:|failed:|exception:|panic:)").expect("error pattern is valid")
});

static RE_RUNNING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]|reading|writing|searching|running)")
        .expect("running pattern is valid")
});

fn classify_line(line: &str) -> Option<AgentStatus> {
    if RE_WAITING.is_match(line) {
        Some(AgentStatus::Waiting)
    } else if RE_ERROR.is_match(line) {
        Some(AgentStatus::Error)
    } else if RE_RUNNING.is_match(line) {
        Some(AgentStatus::Running)
    } else {
        None
    }
}

/// Classify captured pane content.
///
/// Lines are examined newest first, so whatever the agent printed last
/// decides the status. Each line is checked waiting, then error, then
/// running. When none of the recent lines match, the session's quiet time
/// (`since_activity`) picks between idle and unknown.
pub fn classify(content: &str, since_activity: Duration) -> AgentStatus {
    content
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .take(MAX_SCANNED_LINES)
        .find_map(classify_line)
        .unwrap_or(if since_activity > IDLE_AFTER {
            AgentStatus::Idle
        } else {
            AgentStatus::Unknown
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRESH: Duration = Duration::from_secs(1);
    const STALE: Duration = Duration::from_secs(31);

    #[test]
    fn test_detect_waiting() {
        assert_eq!(classify("Some output\n\n> ", FRESH), AgentStatus::Waiting);
        assert_eq!(classify("done\n❯", FRESH), AgentStatus::Waiting);
        assert_eq!(classify("user@host:~/src$ ls\n$ ", FRESH), AgentStatus::Waiting);
        assert_eq!(classify("% make", FRESH), AgentStatus::Waiting);
        assert_eq!(
            classify("Please Enter a command to continue", FRESH),
            AgentStatus::Waiting
        );
        assert_eq!(classify("Waiting for approval", FRESH), AgentStatus::Waiting);
    }

    #[test]
    fn test_detect_error() {
        let content = "Something went wrong\nError: connection refused";
        assert_eq!(classify(content, FRESH), AgentStatus::Error);
        assert_eq!(classify("thread 'main' PANIC: boom", FRESH), AgentStatus::Error);
        assert_eq!(classify("build FAILED: 3 tests", FRESH), AgentStatus::Error);
    }

    #[test]
    fn test_detect_running() {
        assert_eq!(classify("⠙ Thinking", FRESH), AgentStatus::Running);
        assert_eq!(classify("Reading src/main.rs", FRESH), AgentStatus::Running);
        assert_eq!(classify("Searching for usages", FRESH), AgentStatus::Running);
    }

    #[test]
    fn test_newest_line_wins() {
        let content = "error: first attempt failed\n⠸ Retrying the build\n";
        assert_eq!(classify(content, FRESH), AgentStatus::Running);

        let content = "⠸ Compiling\nerror: could not compile\n\n\n";
        assert_eq!(classify(content, FRESH), AgentStatus::Error);
    }

    #[test]
    fn test_rule_order_within_line() {
        // A prompt glyph outranks an error phrase on the same line.
        assert_eq!(classify("error: retry? >", FRESH), AgentStatus::Waiting);
        // An error phrase outranks activity words on the same line.
        assert_eq!(classify("error: running hook", FRESH), AgentStatus::Error);
    }

    #[test]
    fn test_only_ten_lines_scanned() {
        let mut content = String::from("⠋ Working\n");
        for i in 0..10 {
            content.push_str(&format!("plain output {}\n", i));
        }
        assert_eq!(classify(&content, FRESH), AgentStatus::Unknown);
    }

    #[test]
    fn test_blank_lines_not_counted() {
        let mut content = String::from("⠋ Working\n");
        for i in 0..9 {
            content.push_str(&format!("plain output {}\n\n   \n", i));
        }
        assert_eq!(classify(&content, FRESH), AgentStatus::Running);
    }

    #[test]
    fn test_idle_fallback() {
        let content = "compiled 3 crates\nplain text";
        assert_eq!(classify(content, STALE), AgentStatus::Idle);
        assert_eq!(classify(content, FRESH), AgentStatus::Unknown);
        assert_eq!(classify("", STALE), AgentStatus::Idle);
    }
}
