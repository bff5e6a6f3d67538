//! Configuration loaded from `config.toml`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Launch command override for one agent type.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AgentCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct Config {
    /// Directories searched for projects.
    #[serde(default = "default_project_roots")]
    pub project_roots: Vec<PathBuf>,
    /// How deep below each root a project may sit.
    #[serde(default = "default_scan_depth")]
    pub scan_depth: usize,
    /// Period of the full background refresh.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Staleness bound of the session list.
    #[serde(default = "default_ttl_ms")]
    pub session_ttl_ms: u64,
    /// How long an agent status is reused before the pane is recaptured.
    #[serde(default = "default_ttl_ms")]
    pub status_ttl_ms: u64,
    /// Output lines kept per component process.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Pane lines captured for status detection.
    #[serde(default = "default_capture_lines")]
    pub capture_lines: usize,
    #[serde(default = "default_tmux_path")]
    pub tmux_path: String,
    /// Agent-mail SQLite database.
    #[serde(default = "default_mail_db")]
    pub mail_db: PathBuf,
    /// Agent type used by the dashboard when creating sessions.
    #[serde(default = "default_agent")]
    pub default_agent: String,
    #[serde(default)]
    pub agents: HashMap<String, AgentCommand>,
}

fn default_project_roots() -> Vec<PathBuf> {
    vec![dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))]
}

fn default_scan_depth() -> usize {
    3
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_ttl_ms() -> u64 {
    2000
}

fn default_log_capacity() -> usize {
    crate::process::DEFAULT_LOG_CAPACITY
}

fn default_capture_lines() -> usize {
    50
}

fn default_tmux_path() -> String {
    "tmux".into()
}

fn default_mail_db() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".mcp_agent_mail")
        .join("storage.sqlite3")
}

fn default_agent() -> String {
    "claude".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_roots: default_project_roots(),
            scan_depth: default_scan_depth(),
            refresh_interval_secs: default_refresh_interval_secs(),
            session_ttl_ms: default_ttl_ms(),
            status_ttl_ms: default_ttl_ms(),
            log_capacity: default_log_capacity(),
            capture_lines: default_capture_lines(),
            tmux_path: default_tmux_path(),
            mail_db: default_mail_db(),
            default_agent: default_agent(),
            agents: HashMap::new(),
        }
    }
}

impl Config {
    /// `<config_dir>/agent-fleet/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("agent-fleet").join("config.toml"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicitly given file must exist; a missing default file yields
    /// the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !required && !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.refresh_interval_secs == 0 {
            bail!("refresh_interval_secs must be greater than zero");
        }
        if self.session_ttl_ms == 0 || self.status_ttl_ms == 0 {
            bail!("cache TTLs must be greater than zero");
        }
        if self.log_capacity == 0 || self.capture_lines == 0 {
            bail!("log_capacity and capture_lines must be greater than zero");
        }
        if self.scan_depth == 0 {
            bail!("scan_depth must be greater than zero");
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms)
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_millis(self.status_ttl_ms)
    }
}
