//! Data sources the aggregator composes: project discovery, per-project
//! statistics, the agent-mail store and the agent launch commands.

mod discovery;
mod mail;
mod resolver;
mod stats;

pub use discovery::ProjectScanner;
pub use mail::SqliteMailStore;
pub use resolver::{CommandResolver, LaunchCommand};
pub use stats::FsStatsReader;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An auxiliary process a project can run, e.g. a dev or MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub open: usize,
    pub done: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocStats {
    pub files: usize,
    /// Unix timestamp of the most recently modified document
    pub latest: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
    pub components: Vec<ComponentSpec>,
    pub tasks: Option<TaskStats>,
    pub specs: Option<DocStats>,
    pub research: Option<DocStats>,
}

impl Project {
    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// An agent registered in the agent-mail store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub program: String,
    pub model: String,
    pub task_description: String,
    pub project_path: Option<PathBuf>,
    pub last_active: Option<String>,
}

pub trait ProjectSource: Send + Sync {
    /// Every known project, ordered by path.
    fn scan(&self) -> Result<Vec<Project>>;
}

/// Per-project statistics. `Ok(None)` means the project has no such data.
pub trait StatsReader: Send + Sync {
    fn task_stats(&self, project: &Path) -> Result<Option<TaskStats>>;
    fn spec_stats(&self, project: &Path) -> Result<Option<DocStats>>;
    fn research_stats(&self, project: &Path) -> Result<Option<DocStats>>;
}

/// Read-only view of the agent-mail store.
pub trait MailStore: Send + Sync {
    fn is_available(&self) -> bool;
    fn all_agents(&self) -> Result<Vec<Agent>>;
}
