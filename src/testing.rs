//! In-memory fakes for the multiplexer, the process runner and the data
//! sources, shared by the unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::process::{ExitInfo, ProcessControl, ProcessError, ProcessRunner, SpawnedProcess};
use crate::sources::{Agent, ComponentSpec, DocStats, MailStore, Project, ProjectSource, StatsReader, TaskStats};
use crate::tmux::{unix_now, Multiplexer, MuxError, Session};

pub fn session(name: &str, cwd: &str) -> Session {
    let now = unix_now();
    Session {
        name: name.to_string(),
        created_at: now - 600,
        last_activity: now,
        windows: 1,
        attached: false,
        cwd: PathBuf::from(cwd),
    }
}

pub fn project(path: &str, components: &[(&str, &str)]) -> Project {
    let path = PathBuf::from(path);
    Project {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path,
        components: components
            .iter()
            .map(|(name, command)| ComponentSpec {
                name: name.to_string(),
                command: command.to_string(),
            })
            .collect(),
        tasks: None,
        specs: None,
        research: None,
    }
}

enum WindowsReply {
    Rows(String),
    NoServer,
    Failure(String),
}

/// Stateful tmux stand-in: mutating calls edit the row table that the next
/// `list_windows` reports.
pub struct FakeMux {
    windows: Mutex<WindowsReply>,
    panes: Mutex<HashMap<String, String>>,
    commands: Mutex<Vec<String>>,
    fail_new_session: Mutex<bool>,
    list_calls: AtomicUsize,
    capture_calls: AtomicUsize,
}

impl FakeMux {
    pub fn new() -> Self {
        Self::with_rows("")
    }

    pub fn with_rows(rows: &str) -> Self {
        Self {
            windows: Mutex::new(WindowsReply::Rows(rows.to_string())),
            panes: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            fail_new_session: Mutex::new(false),
            list_calls: AtomicUsize::new(0),
            capture_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_rows(&self, rows: &str) {
        *self.windows.lock().unwrap() = WindowsReply::Rows(rows.to_string());
    }

    pub fn set_no_server(&self) {
        *self.windows.lock().unwrap() = WindowsReply::NoServer;
    }

    pub fn set_failure(&self, stderr: &str) {
        *self.windows.lock().unwrap() = WindowsReply::Failure(stderr.to_string());
    }

    pub fn set_pane(&self, session: &str, content: &str) {
        self.panes
            .lock()
            .unwrap()
            .insert(session.to_string(), content.to_string());
    }

    pub fn fail_new_session(&self) {
        *self.fail_new_session.lock().unwrap() = true;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn record(&self, command: String) {
        self.commands.lock().unwrap().push(command);
    }

    fn edit_rows(&self, edit: impl FnOnce(Vec<String>) -> Vec<String>) {
        let mut windows = self.windows.lock().unwrap();
        let rows = match &*windows {
            WindowsReply::Rows(rows) => rows.lines().map(str::to_string).collect(),
            _ => Vec::new(),
        };
        let mut joined = edit(rows).join("\n");
        if !joined.is_empty() {
            joined.push('\n');
        }
        *windows = WindowsReply::Rows(joined);
    }

    fn has_session(&self, name: &str) -> bool {
        match &*self.windows.lock().unwrap() {
            WindowsReply::Rows(rows) => rows.lines().any(|row| row.split('\t').next() == Some(name)),
            _ => false,
        }
    }
}

#[async_trait]
impl Multiplexer for FakeMux {
    async fn list_windows(&self) -> Result<String, MuxError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        match &*self.windows.lock().unwrap() {
            WindowsReply::Rows(rows) => Ok(rows.clone()),
            WindowsReply::NoServer => Err(MuxError::NoServer),
            WindowsReply::Failure(stderr) => Err(MuxError::CommandFailed {
                command: "list-windows".to_string(),
                stderr: stderr.clone(),
            }),
        }
    }

    async fn capture_pane(&self, session: &str, _lines: usize) -> Result<String, MuxError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        self.panes
            .lock()
            .unwrap()
            .get(session)
            .cloned()
            .ok_or_else(|| MuxError::CommandFailed {
                command: "capture-pane".to_string(),
                stderr: format!("can't find session: {}", session),
            })
    }

    async fn new_session(&self, name: &str, workdir: &Path) -> Result<(), MuxError> {
        self.record(format!("new-session {} {}", name, workdir.display()));
        if *self.fail_new_session.lock().unwrap() || self.has_session(name) {
            return Err(MuxError::CommandFailed {
                command: "new-session".to_string(),
                stderr: format!("duplicate session: {}", name),
            });
        }
        let now = unix_now();
        let row = format!("{}\t{}\t1\t0\t{}\t{}", name, now, now, workdir.display());
        self.edit_rows(|mut rows| {
            rows.push(row);
            rows
        });
        Ok(())
    }

    async fn rename_session(&self, old: &str, new: &str) -> Result<(), MuxError> {
        self.record(format!("rename-session {} {}", old, new));
        self.edit_rows(|rows| {
            rows.into_iter()
                .map(|row| match row.split_once('\t') {
                    Some((name, rest)) if name == old => format!("{}\t{}", new, rest),
                    _ => row,
                })
                .collect()
        });
        Ok(())
    }

    async fn kill_session(&self, name: &str) -> Result<(), MuxError> {
        self.record(format!("kill-session {}", name));
        if !self.has_session(name) {
            return Err(MuxError::CommandFailed {
                command: "kill-session".to_string(),
                stderr: format!("can't find session: {}", name),
            });
        }
        self.edit_rows(|rows| {
            rows.into_iter()
                .filter(|row| row.split('\t').next() != Some(name))
                .collect()
        });
        Ok(())
    }

    async fn send_keys(&self, session: &str, keys: &str) -> Result<(), MuxError> {
        self.record(format!("send-keys {} {}", session, keys));
        Ok(())
    }

    fn attach_command(&self, session: &str) -> Vec<String> {
        vec!["true".to_string(), session.to_string()]
    }
}

/// Process runner whose children live until `exit_all` or a stop request.
pub struct FakeRunner {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    fail: bool,
    spawned: AtomicUsize,
    stops: Arc<AtomicUsize>,
    exits: Mutex<Vec<oneshot::Sender<i32>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::with_output("", "")
    }

    pub fn with_stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self::with_output(stdout, "")
    }

    pub fn with_output(stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            fail: false,
            spawned: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
            exits: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Make every live child exit on its own with `code`.
    pub fn exit_all(&self, code: i32) {
        for exit in self.exits.lock().unwrap().drain(..) {
            let _ = exit.send(code);
        }
    }
}

impl ProcessRunner for FakeRunner {
    fn spawn(&self, command: &str, _workdir: &Path) -> Result<SpawnedProcess, ProcessError> {
        if self.fail {
            return Err(ProcessError::Spawn {
                command: command.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        let index = self.spawned.fetch_add(1, Ordering::SeqCst);
        let (exit_tx, exit_rx) = oneshot::channel();
        self.exits.lock().unwrap().push(exit_tx);

        Ok(SpawnedProcess {
            pid: 1000 + index as u32,
            stdout: Box::new(std::io::Cursor::new(self.stdout.clone())),
            stderr: Box::new(std::io::Cursor::new(self.stderr.clone())),
            control: Box::new(FakeControl {
                exit_rx,
                stops: self.stops.clone(),
            }),
        })
    }
}

struct FakeControl {
    exit_rx: oneshot::Receiver<i32>,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessControl for FakeControl {
    async fn wait(&mut self) -> std::io::Result<ExitInfo> {
        match (&mut self.exit_rx).await {
            Ok(code) => Ok(ExitInfo { code: Some(code) }),
            Err(_) => std::future::pending().await,
        }
    }

    async fn stop(&mut self) -> std::io::Result<ExitInfo> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(ExitInfo { code: None })
    }
}

/// Project source returning a fixed list, or failing.
pub struct FakeProjects {
    pub projects: Mutex<Result<Vec<Project>, String>>,
    pub scans: AtomicUsize,
}

impl FakeProjects {
    pub fn new(projects: Vec<Project>) -> Self {
        Self {
            projects: Mutex::new(Ok(projects)),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn fail(&self, message: &str) {
        *self.projects.lock().unwrap() = Err(message.to_string());
    }
}

impl ProjectSource for FakeProjects {
    fn scan(&self) -> Result<Vec<Project>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.projects.lock().unwrap().clone().map_err(|e| anyhow!(e))
    }
}

/// Stats reader that fails for any project path listed in `broken`.
#[derive(Default)]
pub struct FakeStats {
    pub broken: Vec<PathBuf>,
}

impl StatsReader for FakeStats {
    fn task_stats(&self, project: &Path) -> Result<Option<TaskStats>> {
        if self.broken.iter().any(|p| p == project) {
            return Err(anyhow!("tasks file unreadable"));
        }
        Ok(Some(TaskStats { open: 2, done: 1 }))
    }

    fn spec_stats(&self, _project: &Path) -> Result<Option<DocStats>> {
        Ok(None)
    }

    fn research_stats(&self, _project: &Path) -> Result<Option<DocStats>> {
        Ok(Some(DocStats {
            files: 1,
            latest: None,
        }))
    }
}

pub struct FakeMail {
    pub available: bool,
    pub agents: Vec<Agent>,
}

impl FakeMail {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            agents: Vec::new(),
        }
    }
}

impl MailStore for FakeMail {
    fn is_available(&self) -> bool {
        self.available
    }

    fn all_agents(&self) -> Result<Vec<Agent>> {
        Ok(self.agents.clone())
    }
}
