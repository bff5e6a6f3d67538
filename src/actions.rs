use crossterm::event::KeyEvent;
use std::path::PathBuf;
use std::sync::Arc;

use crate::aggregator::State;
use crate::process::ComponentStatus;

/// Actions that can be dispatched through the application
#[derive(Debug, Clone)]
pub enum Action {
    /// A key was pressed
    KeyPress(KeyEvent),
    /// A refresh pass published a new snapshot
    StateUpdated(Arc<State>),
    /// An operation failed
    Error(String),
    /// An operation succeeded and wants to say so
    Notice(String),
    /// Request to quit the application
    Quit,
    /// Attach to a session
    AttachSession(String),
    /// Create a new session in a project
    CreateSession { name: String, project: PathBuf },
    /// Start a new session continuing an existing one
    ForkSession { source: String, name: String },
    RenameSession { old: String, new: String },
    RestartSession(String),
    /// Kill a session
    DeleteSession(String),
    /// Start a stopped component, or stop a running one
    ToggleComponent { project: PathBuf, component: String },
    /// Refresh now instead of waiting for the next tick
    Refresh,
    /// Periodic UI tick
    Tick,
    /// Read the live component status of a project
    WatchComponents(PathBuf),
    ComponentsUpdated {
        project: PathBuf,
        components: Vec<ComponentStatus>,
    },
}
