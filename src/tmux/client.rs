use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};

use super::{MuxError, Multiplexer};

/// One row per window; tabs never appear in tmux session names.
const WINDOW_FORMAT: &str = "#{session_name}\t#{session_created}\t#{session_windows}\t#{session_attached}\t#{window_activity}\t#{pane_current_path}";

/// Client for interacting with tmux via CLI
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
}

impl TmuxClient {
    pub fn new(tmux_path: impl Into<String>) -> Self {
        Self {
            tmux_path: tmux_path.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output, MuxError> {
        let output = Command::new(&self.tmux_path).args(args).output().await?;

        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_no_server(&stderr) {
            return Err(MuxError::NoServer);
        }
        Err(MuxError::CommandFailed {
            command: args.first().copied().unwrap_or_default().to_string(),
            stderr,
        })
    }
}

/// `=name` matches a session by exact name; a bare name falls back to
/// prefix and pattern matching and can hit a different session.
fn session_target(name: &str) -> String {
    format!("={}", name)
}

/// Active pane of the session named exactly `name`.
fn pane_target(name: &str) -> String {
    format!("={}:", name)
}

/// tmux reports an absent server (or a server with nothing left) on stderr
/// rather than with a distinct exit code.
fn is_no_server(stderr: &str) -> bool {
    stderr.contains("no server running")
        || stderr.contains("no sessions")
        || stderr.contains("error connecting to")
}

#[async_trait]
impl Multiplexer for TmuxClient {
    async fn list_windows(&self) -> Result<String, MuxError> {
        let output = self.run(&["list-windows", "-a", "-F", WINDOW_FORMAT]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn capture_pane(&self, session: &str, lines: usize) -> Result<String, MuxError> {
        let start = format!("-{}", lines);
        let target = pane_target(session);
        let output = self
            .run(&["capture-pane", "-p", "-t", &target, "-S", &start])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Create a detached session with isolated shell history
    async fn new_session(&self, name: &str, workdir: &Path) -> Result<(), MuxError> {
        let history_dir = dirs::data_dir()
            .unwrap_or_default()
            .join("agent-fleet")
            .join("history");
        tokio::fs::create_dir_all(&history_dir).await?;
        let history_file = history_dir.join(format!("{}.hist", name));

        let workdir = workdir.to_string_lossy();
        let args = ["new-session", "-d", "-s", name, "-c", &*workdir];
        let output = Command::new(&self.tmux_path)
            .args(args)
            .env("HISTFILE", &history_file)
            .output()
            .await?;

        if !output.status.success() {
            return Err(MuxError::CommandFailed {
                command: "new-session".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(session = %name, workdir = %workdir, "tmux session created");
        Ok(())
    }

    async fn rename_session(&self, old: &str, new: &str) -> Result<(), MuxError> {
        self.run(&["rename-session", "-t", &session_target(old), new]).await?;
        info!(old = %old, new = %new, "tmux session renamed");
        Ok(())
    }

    async fn kill_session(&self, name: &str) -> Result<(), MuxError> {
        self.run(&["kill-session", "-t", &session_target(name)]).await?;
        info!(session = %name, "tmux session killed");
        Ok(())
    }

    async fn send_keys(&self, session: &str, keys: &str) -> Result<(), MuxError> {
        debug!(session = %session, keys_len = keys.len(), "sending keys");
        // -l keeps words like "Enter" literal; the real Enter goes separately.
        let target = pane_target(session);
        self.run(&["send-keys", "-t", &target, "-l", keys]).await?;
        self.run(&["send-keys", "-t", &target, "Enter"]).await?;
        Ok(())
    }

    fn attach_command(&self, session: &str) -> Vec<String> {
        vec![
            self.tmux_path.clone(),
            "attach-session".to_string(),
            "-t".to_string(),
            session_target(session),
        ]
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new("tmux")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_server_messages() {
        assert!(is_no_server("no server running on /tmp/tmux-1000/default"));
        assert!(is_no_server("no sessions"));
        assert!(is_no_server(
            "error connecting to /tmp/tmux-1000/default (No such file or directory)"
        ));
        assert!(!is_no_server("can't find session: foo"));
    }

    #[test]
    fn test_attach_command() {
        let client = TmuxClient::new("/usr/bin/tmux");
        assert_eq!(
            client.attach_command("work"),
            vec!["/usr/bin/tmux", "attach-session", "-t", "=work"]
        );
    }

    #[test]
    fn test_targets_match_exact_session() {
        assert_eq!(session_target("api"), "=api");
        assert_eq!(pane_target("api"), "=api:");
        assert_eq!(session_target("api-work"), "=api-work");
    }
}
