//! Throttled, batched view of the multiplexer's sessions.
//!
//! A refresh issues one `list-windows -a` call and folds its per-window rows
//! into per-session records. Mutating calls pass straight through to the
//! multiplexer and are only reflected after the next refresh.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use super::{MuxError, Multiplexer, Session};

#[derive(Default)]
struct CacheState {
    sessions: Vec<Session>,
    refreshed_at: Option<Instant>,
}

pub struct SessionCache {
    mux: Arc<dyn Multiplexer>,
    ttl: Duration,
    state: RwLock<CacheState>,
    /// Serializes TTL-triggered refreshes so concurrent readers share one query.
    refresh_gate: Mutex<()>,
}

impl SessionCache {
    pub fn new(mux: Arc<dyn Multiplexer>, ttl: Duration) -> Self {
        Self {
            mux,
            ttl,
            state: RwLock::new(CacheState::default()),
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn multiplexer(&self) -> &Arc<dyn Multiplexer> {
        &self.mux
    }

    /// Re-read every session with a single batched query.
    pub async fn refresh(&self) -> Result<(), MuxError> {
        let fresh = match self.mux.list_windows().await {
            Ok(raw) => parse_windows(&raw),
            Err(MuxError::NoServer) => {
                debug!("tmux reports no server, clearing session cache");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut state = self.state.write().await;
        let sessions = carry_activity(&state.sessions, fresh);
        *state = CacheState {
            sessions,
            refreshed_at: Some(Instant::now()),
        };
        Ok(())
    }

    /// Cached sessions, refreshed first when older than the TTL.
    pub async fn list_sessions(&self) -> Result<Vec<Session>, MuxError> {
        if self.is_stale().await {
            let _gate = self.refresh_gate.lock().await;
            // Another caller may have refreshed while we waited.
            if self.is_stale().await {
                self.refresh().await?;
            }
        }
        Ok(self.state.read().await.sessions.clone())
    }

    pub async fn get_session(&self, name: &str) -> Option<Session> {
        self.state
            .read()
            .await
            .sessions
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    pub async fn session_exists(&self, name: &str) -> bool {
        self.state.read().await.sessions.iter().any(|s| s.name == name)
    }

    pub async fn new_session(&self, name: &str, workdir: &Path) -> Result<(), MuxError> {
        self.mux.new_session(name, workdir).await
    }

    pub async fn rename_session(&self, old: &str, new: &str) -> Result<(), MuxError> {
        self.mux.rename_session(old, new).await
    }

    pub async fn kill_session(&self, name: &str) -> Result<(), MuxError> {
        self.mux.kill_session(name).await
    }

    pub async fn send_keys(&self, session: &str, keys: &str) -> Result<(), MuxError> {
        self.mux.send_keys(session, keys).await
    }

    async fn is_stale(&self) -> bool {
        match self.state.read().await.refreshed_at {
            Some(at) => at.elapsed() >= self.ttl,
            None => true,
        }
    }
}

/// Fold per-window rows into sessions, in first-seen order.
///
/// Activity is the newest across a session's windows and the working
/// directory comes from that newest window. `session_windows` is already a
/// per-session count, so the last row's value is taken rather than summed.
fn parse_windows(raw: &str) -> Vec<Session> {
    let mut sessions: Vec<Session> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let Some(row) = parse_row(line) else {
            debug!(line = %line, "skipping malformed list-windows row");
            continue;
        };

        match index.get(&row.name) {
            Some(&i) => {
                let existing = &mut sessions[i];
                existing.windows = row.windows;
                existing.attached = row.attached;
                if row.last_activity > existing.last_activity {
                    existing.last_activity = row.last_activity;
                    existing.cwd = row.cwd;
                }
            }
            None => {
                index.insert(row.name.clone(), sessions.len());
                sessions.push(row);
            }
        }
    }

    sessions
}

fn parse_row(line: &str) -> Option<Session> {
    let mut fields = line.splitn(6, '\t');
    let name = fields.next()?.to_string();
    let created_at = fields.next()?.trim().parse().ok()?;
    let windows = fields.next()?.trim().parse().ok()?;
    let attached = fields.next()?.trim() != "0";
    let last_activity = fields.next()?.trim().parse().ok()?;
    let cwd = PathBuf::from(fields.next()?.trim_end());

    if name.is_empty() {
        return None;
    }

    Some(Session {
        name,
        created_at,
        last_activity,
        windows,
        attached,
        cwd,
    })
}

/// Keep last-activity from moving backwards for a session that survived the
/// refresh, e.g. when its most active window was closed.
fn carry_activity(previous: &[Session], mut fresh: Vec<Session>) -> Vec<Session> {
    for session in &mut fresh {
        if let Some(old) = previous
            .iter()
            .find(|old| old.name == session.name && old.created_at == session.created_at)
        {
            session.last_activity = session.last_activity.max(old.last_activity);
        }
    }
    fresh
}
