//! Lifecycle of auxiliary dev-server processes ("components"), one per
//! (project, component) key.
//!
//! Each started process gets two reader tasks that drain stdout and stderr
//! into a shared [`LogTail`], and a supervisor task that owns the process
//! and waits for either its natural exit or a stop request. Whichever comes
//! first, the supervisor marks the handle stopped.

mod runner;
mod tail;

pub use runner::{ExitInfo, ProcessControl, ProcessRunner, ShellRunner, SpawnedProcess};
pub use tail::{LogTail, DEFAULT_LOG_CAPACITY};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{oneshot, watch, RwLock};
use tracing::{debug, info, warn};

use runner::OutputStream;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process exited before its pid could be read")]
    ExitedEarly,
    #[error("child {0} was not piped")]
    MissingPipe(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessKey {
    pub project: PathBuf,
    pub component: String,
}

impl ProcessKey {
    pub fn new(project: impl Into<PathBuf>, component: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            component: component.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Starting,
    Running,
    Stopped,
}

/// Serializable view of one component process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub project: PathBuf,
    pub component: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub logs: Vec<String>,
    pub last_error: Option<String>,
}

impl ComponentStatus {
    /// View for a key that has never been started.
    pub fn stopped(key: &ProcessKey) -> Self {
        Self {
            project: key.project.clone(),
            component: key.component.clone(),
            state: ProcessState::Stopped,
            pid: None,
            logs: Vec::new(),
            last_error: None,
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: ProcessState,
    last_error: Option<String>,
}

/// State shared between a handle, its readers and its supervisor.
#[derive(Debug)]
struct Shared {
    lifecycle: Mutex<Lifecycle>,
    logs: LogTail,
    /// Flips to `true` once the supervisor has seen the process exit.
    exited: watch::Sender<bool>,
}

impl Shared {
    fn new(capacity: usize, state: ProcessState) -> Self {
        let (exited, _) = watch::channel(state == ProcessState::Stopped);
        Self {
            lifecycle: Mutex::new(Lifecycle {
                state,
                last_error: None,
            }),
            logs: LogTail::new(capacity),
            exited,
        }
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ProcessState {
        self.lifecycle().state
    }

    fn mark_stopped(&self, error: Option<String>) {
        {
            let mut lifecycle = self.lifecycle();
            lifecycle.state = ProcessState::Stopped;
            if error.is_some() {
                lifecycle.last_error = error;
            }
        }
        self.exited.send_replace(true);
    }
}

struct ProcessHandle {
    pid: Option<u32>,
    shared: Arc<Shared>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    fn status(&self, key: &ProcessKey) -> ComponentStatus {
        let lifecycle = self.shared.lifecycle();
        ComponentStatus {
            project: key.project.clone(),
            component: key.component.clone(),
            state: lifecycle.state,
            pid: self.pid,
            logs: self.shared.logs.snapshot(),
            last_error: lifecycle.last_error.clone(),
        }
    }
}

pub struct ProcessManager {
    runner: Arc<dyn ProcessRunner>,
    log_capacity: usize,
    handles: RwLock<HashMap<ProcessKey, ProcessHandle>>,
}

impl ProcessManager {
    pub fn new(runner: Arc<dyn ProcessRunner>, log_capacity: usize) -> Self {
        Self {
            runner,
            log_capacity,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Start `command` for `key` unless a live process already exists.
    ///
    /// The map's write lock is held across the check and the spawn, so
    /// concurrent starts of the same key spawn exactly one process.
    pub async fn start(
        &self,
        key: ProcessKey,
        command: &str,
        workdir: &Path,
    ) -> Result<(), ProcessError> {
        let mut handles = self.handles.write().await;

        if let Some(existing) = handles.get(&key) {
            if existing.shared.state() != ProcessState::Stopped {
                debug!(project = %key.project.display(), component = %key.component, "already running");
                return Ok(());
            }
        }

        let shared = Arc::new(Shared::new(self.log_capacity, ProcessState::Starting));
        let spawned = match self.runner.spawn(command, workdir) {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(project = %key.project.display(), component = %key.component, error = %e, "component failed to start");
                shared.mark_stopped(Some(e.to_string()));
                handles.insert(
                    key,
                    ProcessHandle {
                        pid: None,
                        shared,
                        stop_tx: None,
                    },
                );
                return Err(e);
            }
        };

        let SpawnedProcess {
            pid,
            stdout,
            stderr,
            control,
        } = spawned;

        shared.lifecycle().state = ProcessState::Running;
        tokio::spawn(drain(stdout, shared.clone()));
        tokio::spawn(drain(stderr, shared.clone()));

        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(supervise(control, stop_rx, shared.clone(), key.clone()));

        info!(project = %key.project.display(), component = %key.component, pid, "component started");
        handles.insert(
            key,
            ProcessHandle {
                pid: Some(pid),
                shared,
                stop_tx: Some(stop_tx),
            },
        );
        Ok(())
    }

    /// Stop the process for `key` and wait until it has exited.
    ///
    /// Stopping an unknown or already stopped key is a no-op. Termination
    /// failures are recorded as the handle's last error.
    pub async fn stop(&self, key: &ProcessKey) {
        let (stop_tx, shared) = {
            let mut handles = self.handles.write().await;
            match handles.get_mut(key) {
                Some(handle) => (handle.stop_tx.take(), handle.shared.clone()),
                None => return,
            }
        };

        if let Some(stop_tx) = stop_tx {
            // A closed receiver means the process already exited.
            let _ = stop_tx.send(());
        }

        let mut exited = shared.exited.subscribe();
        if exited.wait_for(|done| *done).await.is_err() {
            debug!(component = %key.component, "supervisor gone before reporting exit");
        }
    }

    /// Current view of `key`, or `None` if it was never started.
    pub async fn status(&self, key: &ProcessKey) -> Option<ComponentStatus> {
        self.handles
            .read()
            .await
            .get(key)
            .map(|handle| handle.status(key))
    }

    /// Forget a stopped handle. Returns `false` if it is unknown or still live.
    pub async fn dispose(&self, key: &ProcessKey) -> bool {
        let mut handles = self.handles.write().await;
        match handles.get(key) {
            Some(handle) if handle.shared.state() == ProcessState::Stopped => {
                handles.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Stop every managed process.
    pub async fn shutdown(&self) {
        let keys: Vec<ProcessKey> = self.handles.read().await.keys().cloned().collect();
        for key in keys {
            self.stop(&key).await;
        }
    }
}

/// Append every line of `stream` to the tail until it closes. Output that is
/// not UTF-8 is kept lossily rather than ending the reader.
async fn drain(stream: OutputStream, shared: Arc<Shared>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => shared.logs.push(decode_line(&buf)),
            Err(e) => {
                debug!(error = %e, "output stream closed with error");
                break;
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

async fn supervise(
    mut control: Box<dyn ProcessControl>,
    stop_rx: oneshot::Receiver<()>,
    shared: Arc<Shared>,
    key: ProcessKey,
) {
    // A dropped sender (handle replaced or manager dropped) also stops.
    let (outcome, requested) = tokio::select! {
        exit = control.wait() => (exit, false),
        _ = stop_rx => (control.stop().await, true),
    };

    let error = match outcome {
        Ok(exit) if requested || exit.success() => {
            info!(project = %key.project.display(), component = %key.component, %exit, "component stopped");
            None
        }
        Ok(exit) => {
            warn!(project = %key.project.display(), component = %key.component, %exit, "component exited");
            Some(format!("exited with {}", exit))
        }
        Err(e) => {
            warn!(project = %key.project.display(), component = %key.component, error = %e, "component wait failed");
            Some(e.to_string())
        }
    };
    shared.mark_stopped(error);
}
