mod cache;
mod client;
mod detector;
mod heuristics;

pub use cache::SessionCache;
pub use client::TmuxClient;
pub use detector::StatusDetector;
pub use heuristics::AgentStatus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Represents a live tmux session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session name (unique among live sessions)
    pub name: String,
    /// Unix timestamp when session was created
    pub created_at: u64,
    /// Unix timestamp of the most recent activity in any window
    pub last_activity: u64,
    /// Number of windows in the session
    pub windows: usize,
    /// Whether any client is attached
    pub attached: bool,
    /// Working directory of the most recently active pane
    pub cwd: PathBuf,
}

#[derive(Debug, Error)]
pub enum MuxError {
    /// The multiplexer has no server running or no sessions to report.
    #[error("no tmux server running")]
    NoServer,
    #[error("`tmux {command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("failed to execute tmux: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal multiplexer capability consumed by the session cache, the status
/// detector and the session actions.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// One row per window across all sessions, tab separated:
    /// `name, created, window_count, attached, window_activity, current_path`.
    async fn list_windows(&self) -> Result<String, MuxError>;

    /// Last `lines` lines of the session's active pane.
    async fn capture_pane(&self, session: &str, lines: usize) -> Result<String, MuxError>;

    async fn new_session(&self, name: &str, workdir: &Path) -> Result<(), MuxError>;

    async fn rename_session(&self, old: &str, new: &str) -> Result<(), MuxError>;

    async fn kill_session(&self, name: &str) -> Result<(), MuxError>;

    /// Types `keys` literally into the session and presses Enter.
    async fn send_keys(&self, session: &str, keys: &str) -> Result<(), MuxError>;

    /// Command line that attaches the current terminal to `session`.
    fn attach_command(&self, session: &str) -> Vec<String>;
}
