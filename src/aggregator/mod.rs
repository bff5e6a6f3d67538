//! Composes sessions, agent statuses, component processes and the data
//! sources into one [`State`] snapshot per refresh pass.
//!
//! Readers get the last published snapshot without waiting on a refresh in
//! progress. A pass assembles its snapshot privately and publishes it with a
//! single pointer swap, so a reader never sees fields from two passes.

mod actions;
mod state;

pub use actions::ActionError;
pub use state::{AgentView, SessionView, State};

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::process::{ComponentStatus, ProcessKey, ProcessManager, ProcessRunner};
use crate::sources::{Agent, CommandResolver, MailStore, Project, ProjectSource, StatsReader};
use crate::tmux::{unix_now, Multiplexer, SessionCache, StatusDetector};

/// The external data sources a refresh pass reads.
pub struct Sources {
    pub projects: Arc<dyn ProjectSource>,
    pub stats: Arc<dyn StatsReader>,
    pub mail: Arc<dyn MailStore>,
}

pub struct Aggregator {
    sources: Sources,
    sessions: SessionCache,
    detector: StatusDetector,
    processes: ProcessManager,
    resolver: CommandResolver,
    state: RwLock<Arc<State>>,
    /// One refresh pass at a time.
    refresh_lock: Mutex<()>,
    wake: Notify,
}

impl Aggregator {
    pub fn new(
        config: &Config,
        sources: Sources,
        mux: Arc<dyn Multiplexer>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            sources,
            sessions: SessionCache::new(mux.clone(), config.session_ttl()),
            detector: StatusDetector::new(mux, config.status_ttl(), config.capture_lines),
            processes: ProcessManager::new(runner, config.log_capacity),
            resolver: CommandResolver::new(config.agents.clone()),
            state: RwLock::new(Arc::new(State::default())),
            refresh_lock: Mutex::new(()),
            wake: Notify::new(),
        }
    }

    /// The most recently published snapshot.
    pub fn get_state(&self) -> Arc<State> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_project(&self, path: &Path) -> Option<Project> {
        self.get_state().project(path).cloned()
    }

    pub fn get_agent(&self, name: &str) -> Option<AgentView> {
        self.get_state().agent(name).cloned()
    }

    /// Run one aggregation pass and publish its snapshot.
    ///
    /// Only a failed project scan fails the pass; every other source
    /// degrades to missing or empty data.
    pub async fn refresh(&self) -> Result<Arc<State>> {
        let _pass = self.refresh_lock.lock().await;

        let source = self.sources.projects.clone();
        let projects = tokio::task::spawn_blocking(move || source.scan())
            .await
            .context("project scan task failed")?
            .context("project scan failed")?;

        let stats = self.sources.stats.clone();
        let projects = tokio::task::spawn_blocking(move || {
            projects
                .into_iter()
                .map(|project| enrich(stats.as_ref(), project))
                .collect::<Vec<_>>()
        })
        .await
        .context("project enrichment task failed")?;

        let mail = self.sources.mail.clone();
        let agents = tokio::task::spawn_blocking(move || load_agents(mail.as_ref()))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "agent load task failed");
                Vec::new()
            });

        let sessions = match self.sessions.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "tmux unavailable, reporting no sessions");
                Vec::new()
            }
        };
        self.detector.retain_sessions(&sessions);

        let mut session_views = Vec::with_capacity(sessions.len());
        for session in sessions {
            let status = self.detector.status(&session).await;
            let project = state::owning_project(&projects, &session.cwd);
            session_views.push(SessionView {
                session,
                project,
                status,
            });
        }

        let mut components = Vec::new();
        for project in &projects {
            for spec in &project.components {
                let key = ProcessKey::new(&project.path, &spec.name);
                let status = self
                    .processes
                    .status(&key)
                    .await
                    .unwrap_or_else(|| ComponentStatus::stopped(&key));
                components.push(status);
            }
        }

        let agents = state::link_agents(agents, &session_views);
        let snapshot = Arc::new(State {
            projects,
            sessions: session_views,
            agents,
            components,
            refreshed_at: unix_now(),
        });

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        debug!(
            projects = snapshot.projects.len(),
            sessions = snapshot.sessions.len(),
            agents = snapshot.agents.len(),
            "state refreshed"
        );
        Ok(snapshot)
    }

    /// Ask the background loop to refresh before its next tick.
    pub fn request_refresh(&self) {
        self.wake.notify_one();
    }

    /// Sleep until `interval` passes or a refresh is requested.
    pub async fn next_tick(&self, interval: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = self.wake.notified() => {}
        }
    }

    /// Refresh now, then every `interval` or on request, sending each
    /// outcome to `tx`. Returns once the receiver is gone.
    pub async fn run(&self, interval: Duration, tx: mpsc::UnboundedSender<Result<Arc<State>>>) {
        loop {
            let outcome = self.refresh().await;
            if let Err(e) = &outcome {
                warn!(error = %format!("{:#}", e), "refresh failed");
            }
            if tx.send(outcome).is_err() {
                debug!("state receiver closed, stopping refresh loop");
                return;
            }
            self.next_tick(interval).await;
        }
    }

    /// Stop every component process.
    pub async fn shutdown(&self) {
        info!("stopping component processes");
        self.processes.shutdown().await;
    }
}

fn enrich(stats: &dyn StatsReader, mut project: Project) -> Project {
    match stats.task_stats(&project.path) {
        Ok(tasks) => project.tasks = tasks,
        Err(e) => warn!(project = %project.path.display(), error = %e, "task stats unavailable"),
    }
    match stats.spec_stats(&project.path) {
        Ok(specs) => project.specs = specs,
        Err(e) => warn!(project = %project.path.display(), error = %e, "spec stats unavailable"),
    }
    match stats.research_stats(&project.path) {
        Ok(research) => project.research = research,
        Err(e) => warn!(project = %project.path.display(), error = %e, "research stats unavailable"),
    }
    project
}

fn load_agents(mail: &dyn MailStore) -> Vec<Agent> {
    if !mail.is_available() {
        debug!("mail store unavailable, reporting no agents");
        return Vec::new();
    }
    mail.all_agents().unwrap_or_else(|e| {
        warn!(error = %e, "failed to read agents");
        Vec::new()
    })
}
