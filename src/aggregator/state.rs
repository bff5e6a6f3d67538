use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::process::ComponentStatus;
use crate::sources::{Agent, Project};
use crate::tmux::{AgentStatus, Session};

/// A session together with what the refresh pass learned about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    /// Path of the project the session works in, if any.
    pub project: Option<PathBuf>,
    pub status: AgentStatus,
}

/// A mail-store agent and the session it is running in, if known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    pub session: Option<String>,
}

/// One immutable snapshot, built from a single refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub projects: Vec<Project>,
    pub sessions: Vec<SessionView>,
    pub agents: Vec<AgentView>,
    pub components: Vec<ComponentStatus>,
    /// Unix timestamp of the pass; 0 before the first refresh.
    pub refreshed_at: u64,
}

impl State {
    pub fn project(&self, path: &Path) -> Option<&Project> {
        self.projects.iter().find(|p| p.path == path)
    }

    pub fn session(&self, name: &str) -> Option<&SessionView> {
        self.sessions.iter().find(|s| s.session.name == name)
    }

    pub fn agent(&self, name: &str) -> Option<&AgentView> {
        self.agents.iter().find(|a| a.agent.name == name)
    }

    pub fn components_of<'a>(
        &'a self,
        project: &'a Path,
    ) -> impl Iterator<Item = &'a ComponentStatus> + 'a {
        self.components.iter().filter(move |c| c.project == project)
    }
}

/// The deepest project containing `cwd`.
pub(crate) fn owning_project(projects: &[Project], cwd: &Path) -> Option<PathBuf> {
    projects
        .iter()
        .filter(|p| cwd.starts_with(&p.path))
        .max_by_key(|p| p.path.components().count())
        .map(|p| p.path.clone())
}

/// Link each agent to a session: same name first, then same project.
pub(crate) fn link_agents(agents: Vec<Agent>, sessions: &[SessionView]) -> Vec<AgentView> {
    agents
        .into_iter()
        .map(|agent| {
            let by_name = sessions
                .iter()
                .find(|s| s.session.name.eq_ignore_ascii_case(&agent.name));
            let by_project = || {
                let path = agent.project_path.as_deref()?;
                sessions.iter().find(|s| s.project.as_deref() == Some(path))
            };
            let session = by_name.or_else(by_project).map(|s| s.session.name.clone());
            AgentView { agent, session }
        })
        .collect()
}
