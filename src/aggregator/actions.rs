//! User-triggered operations on sessions and component processes.
//!
//! Session mutations go straight to the multiplexer; the snapshot catches up
//! on the next refresh pass, which every action requests.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use super::Aggregator;
use crate::process::{ComponentStatus, ProcessError, ProcessKey};
use crate::sources::LaunchCommand;
use crate::tmux::{MuxError, Session};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown agent type `{0}`")]
    UnknownAgentType(String),
    #[error("invalid session name `{0}`")]
    InvalidSessionName(String),
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    #[error("session `{0}` already exists")]
    SessionExists(String),
    #[error("unknown project {}", .0.display())]
    UnknownProject(PathBuf),
    #[error("project {} has no component `{component}`", .project.display())]
    UnknownComponent { project: PathBuf, component: String },
    #[error("attach failed: {0}")]
    Attach(String),
    #[error(transparent)]
    Mux(#[from] MuxError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("failed to run attach command: {0}")]
    Io(#[from] std::io::Error),
}

/// tmux reserves `.` and `:` as target separators.
fn check_name(name: &str) -> Result<(), ActionError> {
    if name.trim().is_empty() || name.contains(['.', ':']) {
        return Err(ActionError::InvalidSessionName(name.to_string()));
    }
    Ok(())
}

impl Aggregator {
    /// Create a session in `project` and launch `agent_type` inside it.
    pub async fn new_session(
        &self,
        name: &str,
        project: &Path,
        agent_type: &str,
    ) -> Result<(), ActionError> {
        check_name(name)?;
        self.check_free(name).await?;
        let launch = self
            .resolver
            .resolve(agent_type, project)
            .ok_or_else(|| ActionError::UnknownAgentType(agent_type.to_string()))?;

        self.create_and_launch(name, project, &launch).await?;
        info!(session = name, project = %project.display(), agent = agent_type, "session created");
        self.request_refresh();
        Ok(())
    }

    /// Kill `name` and create it again in the same directory.
    ///
    /// Not atomic: if creation fails after the kill, the session stays gone.
    pub async fn restart_session(&self, name: &str, agent_type: &str) -> Result<(), ActionError> {
        let session = self.find_session(name).await?;
        let launch = self
            .resolver
            .resolve(agent_type, &self.launch_dir(&session))
            .ok_or_else(|| ActionError::UnknownAgentType(agent_type.to_string()))?;

        self.sessions.kill_session(name).await?;
        self.request_refresh();
        self.create_and_launch(name, &session.cwd, &launch).await?;
        info!(session = name, agent = agent_type, "session restarted");
        Ok(())
    }

    /// Start `new_name` in the directory of `source`, continuing the source
    /// conversation where the agent supports it.
    pub async fn fork_session(
        &self,
        source: &str,
        new_name: &str,
        agent_type: &str,
    ) -> Result<(), ActionError> {
        check_name(new_name)?;
        let session = self.find_session(source).await?;
        self.check_free(new_name).await?;
        let launch = self
            .resolver
            .resolve_fork(agent_type, &self.launch_dir(&session))
            .ok_or_else(|| ActionError::UnknownAgentType(agent_type.to_string()))?;

        self.create_and_launch(new_name, &session.cwd, &launch).await?;
        info!(source, session = new_name, agent = agent_type, "session forked");
        self.request_refresh();
        Ok(())
    }

    pub async fn rename_session(&self, old: &str, new: &str) -> Result<(), ActionError> {
        check_name(new)?;
        self.find_session(old).await?;
        self.sessions.rename_session(old, new).await?;
        info!(old, new, "session renamed");
        self.request_refresh();
        Ok(())
    }

    pub async fn kill_session(&self, name: &str) -> Result<(), ActionError> {
        self.sessions.kill_session(name).await?;
        info!(session = name, "session killed");
        self.request_refresh();
        Ok(())
    }

    /// Attach the current terminal to `name`, returning once the user
    /// detaches. The caller must release the terminal first.
    pub async fn attach_session(&self, name: &str) -> Result<(), ActionError> {
        self.find_session(name).await?;
        let argv = self.sessions.multiplexer().attach_command(name);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ActionError::Attach("empty attach command".to_string()))?;

        let status = tokio::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::inherit())
            .stdout(std::process::Stdio::inherit())
            .stderr(std::process::Stdio::inherit())
            .status()
            .await?;
        self.request_refresh();
        if !status.success() {
            return Err(ActionError::Attach(format!("`{}` exited with {}", program, status)));
        }
        Ok(())
    }

    /// Start a component declared by a project in the current snapshot.
    /// Starting a running component succeeds without spawning.
    pub async fn start_mcp(&self, project: &Path, component: &str) -> Result<(), ActionError> {
        let state = self.get_state();
        let known = state
            .project(project)
            .ok_or_else(|| ActionError::UnknownProject(project.to_path_buf()))?;
        let spec = known
            .component(component)
            .ok_or_else(|| ActionError::UnknownComponent {
                project: project.to_path_buf(),
                component: component.to_string(),
            })?;

        let key = ProcessKey::new(&known.path, &spec.name);
        let result = self.processes.start(key, &spec.command, &known.path).await;
        self.request_refresh();
        result.map_err(ActionError::from)
    }

    /// Stop a component. Stopping one that is not running succeeds.
    pub async fn stop_mcp(&self, project: &Path, component: &str) -> Result<(), ActionError> {
        self.processes
            .stop(&ProcessKey::new(project, component))
            .await;
        self.request_refresh();
        Ok(())
    }

    /// Live view of one component; never started reads as stopped.
    pub async fn component_status(&self, project: &Path, component: &str) -> ComponentStatus {
        let key = ProcessKey::new(project, component);
        self.processes
            .status(&key)
            .await
            .unwrap_or_else(|| ComponentStatus::stopped(&key))
    }

    /// Live view of every component a project declares, read straight from
    /// the process manager rather than the last snapshot.
    pub async fn project_components(&self, project: &Path) -> Vec<ComponentStatus> {
        let Some(known) = self.get_project(project) else {
            return Vec::new();
        };
        let mut components = Vec::with_capacity(known.components.len());
        for spec in &known.components {
            components.push(self.component_status(&known.path, &spec.name).await);
        }
        components
    }

    async fn find_session(&self, name: &str) -> Result<Session, ActionError> {
        self.sessions.list_sessions().await?;
        self.sessions
            .get_session(name)
            .await
            .ok_or_else(|| ActionError::SessionNotFound(name.to_string()))
    }

    /// Only catches names the cache already knows; tmux rejects the rest.
    async fn check_free(&self, name: &str) -> Result<(), ActionError> {
        if self.sessions.session_exists(name).await {
            return Err(ActionError::SessionExists(name.to_string()));
        }
        Ok(())
    }

    /// Project a session belongs to, or its own directory.
    fn launch_dir(&self, session: &Session) -> PathBuf {
        super::state::owning_project(&self.get_state().projects, &session.cwd)
            .unwrap_or_else(|| session.cwd.clone())
    }

    async fn create_and_launch(
        &self,
        name: &str,
        workdir: &Path,
        launch: &LaunchCommand,
    ) -> Result<(), ActionError> {
        self.sessions.new_session(name, workdir).await?;
        if !launch.is_empty() {
            self.sessions.send_keys(name, &launch.command_line()).await?;
        }
        Ok(())
    }
}
