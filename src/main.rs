use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyEventKind};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod actions;
mod aggregator;
mod app;
mod config;
mod process;
mod sources;
mod tmux;

#[cfg(test)]
mod testing;

use actions::Action;
use aggregator::{Aggregator, Sources};
use app::App;
use config::Config;
use process::{ProcessState, ShellRunner};
use sources::{FsStatsReader, ProjectScanner, SqliteMailStore};
use tmux::TmuxClient;

const UI_TICK: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "agent-fleet", version, about = "Dashboard for AI coding agents running in tmux")]
struct Cli {
    /// Config file (default: <config dir>/agent-fleet/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh once and print the aggregated state as JSON
    Snapshot,
}

/// The dashboard owns the terminal, so it logs to a file; `snapshot` logs
/// to stderr.
fn init_logging(to_file: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if !to_file {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    }

    let dir = dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("agent-fleet");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join("agent-fleet.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn build_aggregator(config: &Config) -> Arc<Aggregator> {
    let mail = SqliteMailStore::new(&config.mail_db);
    info!(
        roots = ?config.project_roots,
        mail_db = %mail.path().display(),
        tmux = %config.tmux_path,
        "starting"
    );

    let sources = Sources {
        projects: Arc::new(ProjectScanner::new(
            config.project_roots.clone(),
            config.scan_depth,
        )),
        stats: Arc::new(FsStatsReader),
        mail: Arc::new(mail),
    };
    Arc::new(Aggregator::new(
        config,
        sources,
        Arc::new(TmuxClient::new(config.tmux_path.clone())),
        Arc::new(ShellRunner),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Some(Command::Snapshot) => {
            init_logging(false)?;
            let aggregator = build_aggregator(&config);
            let state = aggregator.refresh().await?;
            println!("{}", serde_json::to_string_pretty(&*state)?);
            Ok(())
        }
        None => {
            init_logging(true)?;
            run_dashboard(build_aggregator(&config), config).await
        }
    }
}

async fn run_dashboard(aggregator: Arc<Aggregator>, config: Config) -> Result<()> {
    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();

    // Initialize terminal
    let mut terminal = ratatui::init();

    // Input is paused while an attached tmux client owns the terminal.
    let input_paused = Arc::new(AtomicBool::new(false));
    let input_tx = tx.clone();
    let paused = input_paused.clone();
    tokio::task::spawn_blocking(move || loop {
        if input_tx.is_closed() {
            break;
        }
        if paused.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(100));
            continue;
        }
        if event::poll(Duration::from_millis(100)).unwrap_or(false) {
            if let Ok(Event::Key(key)) = event::read() {
                if key.kind == KeyEventKind::Press && input_tx.send(Action::KeyPress(key)).is_err() {
                    break;
                }
            }
        }
    });

    // Background refresh loop, forwarded into the action channel
    let (state_tx, mut state_rx) = mpsc::unbounded_channel();
    let refresher = aggregator.clone();
    let interval = config.refresh_interval();
    tokio::spawn(async move { refresher.run(interval, state_tx).await });
    let state_fwd = tx.clone();
    tokio::spawn(async move {
        while let Some(outcome) = state_rx.recv().await {
            let action = match outcome {
                Ok(state) => Action::StateUpdated(state),
                Err(e) => Action::Error(format!("Refresh failed: {:#}", e)),
            };
            if state_fwd.send(action).is_err() {
                break;
            }
        }
    });

    // UI tick: redraws and polls the selected project's components
    let tick_tx = tx.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(UI_TICK);
        loop {
            ticker.tick().await;
            if tick_tx.send(Action::Tick).is_err() {
                break;
            }
        }
    });

    // Create app state
    let mut app = App::new();

    // Main event loop
    let result = loop {
        // Render
        terminal.draw(|f| app.render(f))?;

        // Process any pending actions from the app
        for pending_action in app.take_pending_actions() {
            match pending_action {
                Action::AttachSession(name) => {
                    // Suspend TUI and attach to session
                    input_paused.store(true, Ordering::SeqCst);
                    ratatui::restore();
                    let attached = aggregator.attach_session(&name).await;
                    // Resume TUI
                    terminal = ratatui::init();
                    input_paused.store(false, Ordering::SeqCst);

                    if let Err(e) = attached {
                        app.handle_action(Action::Error(format!("Failed to attach: {}", e)))?;
                    }
                }
                Action::Refresh => aggregator.request_refresh(),
                action => {
                    let aggregator = aggregator.clone();
                    let agent = config.default_agent.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let outcome = dispatch(&aggregator, action, &agent).await;
                        let _ = tx.send(outcome);
                    });
                }
            }
        }

        // Handle events from channel
        match rx.recv().await {
            Some(action) => match app.handle_action(action) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => break Err(e),
            },
            None => break Ok(()),
        }
    };

    // Restore terminal
    ratatui::restore();
    aggregator.shutdown().await;
    result
}

/// Run one session or component action, reporting the outcome as a
/// notice or error for the footer.
async fn dispatch(aggregator: &Aggregator, action: Action, agent: &str) -> Action {
    let outcome = match action {
        Action::CreateSession { name, project } => aggregator
            .new_session(&name, &project, agent)
            .await
            .map(|_| format!("Session '{}' created", name)),
        Action::ForkSession { source, name } => aggregator
            .fork_session(&source, &name, agent)
            .await
            .map(|_| format!("Forked '{}' as '{}'", source, name)),
        Action::RenameSession { old, new } => aggregator
            .rename_session(&old, &new)
            .await
            .map(|_| format!("Renamed '{}' to '{}'", old, new)),
        Action::RestartSession(name) => aggregator
            .restart_session(&name, agent)
            .await
            .map(|_| format!("Session '{}' restarted", name)),
        Action::DeleteSession(name) => aggregator
            .kill_session(&name)
            .await
            .map(|_| format!("Session '{}' killed", name)),
        Action::WatchComponents(project) => {
            let components = aggregator.project_components(&project).await;
            return Action::ComponentsUpdated {
                project,
                components,
            };
        }
        Action::ToggleComponent { project, component } => {
            let status = aggregator.component_status(&project, &component).await;
            if status.state == ProcessState::Stopped {
                aggregator
                    .start_mcp(&project, &component)
                    .await
                    .map(|_| format!("Started {}", component))
            } else {
                aggregator
                    .stop_mcp(&project, &component)
                    .await
                    .map(|_| format!("Stopped {}", component))
            }
        }
        other => return other,
    };

    match outcome {
        Ok(notice) => Action::Notice(notice),
        Err(e) => {
            error!(error = %e, "action failed");
            Action::Error(e.to_string())
        }
    }
}
