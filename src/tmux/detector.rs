use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::heuristics::{classify, AgentStatus};
use super::{unix_now, Multiplexer, Session};

/// Classifies sessions from their pane content, remembering each answer for
/// `ttl` so repeated lookups do not recapture the pane.
pub struct StatusDetector {
    mux: Arc<dyn Multiplexer>,
    ttl: Duration,
    capture_lines: usize,
    cache: Mutex<HashMap<String, (AgentStatus, Instant)>>,
}

impl StatusDetector {
    pub fn new(mux: Arc<dyn Multiplexer>, ttl: Duration, capture_lines: usize) -> Self {
        Self {
            mux,
            ttl,
            capture_lines,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn status(&self, session: &Session) -> AgentStatus {
        if let Some(status) = self.cached(&session.name) {
            return status;
        }

        let quiet_for = Duration::from_secs(unix_now().saturating_sub(session.last_activity));
        let content = match self.mux.capture_pane(&session.name, self.capture_lines).await {
            Ok(content) => content,
            Err(e) => {
                // Not cached, so the next lookup captures again.
                debug!(session = %session.name, error = %e, "capture-pane failed");
                return classify("", quiet_for);
            }
        };
        let status = classify(&content, quiet_for);

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.name.clone(), (status, Instant::now()));
        status
    }

    /// Drop cached entries for sessions that no longer exist.
    pub fn retain_sessions(&self, live: &[Session]) {
        let names: HashSet<&str> = live.iter().map(|s| s.name.as_str()).collect();
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|name, _| names.contains(name.as_str()));
    }

    fn cached(&self, name: &str) -> Option<AgentStatus> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(name)
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(status, _)| *status)
    }
}
