use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use std::path::PathBuf;
use std::sync::Arc;

use crate::actions::Action;
use crate::aggregator::{SessionView, State};
use crate::process::{ComponentStatus, ProcessState};
use crate::tmux::{unix_now, AgentStatus};

/// Log lines shown per component in the detail pane.
const LOG_PREVIEW_LINES: usize = 5;

/// Theme colors inspired by Claude Code
pub struct Theme {
    pub bg: Color,
    pub fg: Color,
    pub accent: Color,
    pub dim: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            bg: Color::Rgb(30, 30, 30),
            fg: Color::Rgb(220, 220, 220),
            accent: Color::Rgb(217, 119, 87), // Claude orange
            dim: Color::Rgb(100, 100, 100),
            success: Color::Rgb(80, 200, 120),
            warning: Color::Rgb(255, 193, 7),
            error: Color::Rgb(220, 53, 69),
        }
    }
}

impl Theme {
    fn status_color(&self, status: AgentStatus) -> Color {
        match status {
            AgentStatus::Running => self.warning,
            AgentStatus::Waiting => self.accent,
            AgentStatus::Idle => self.success,
            AgentStatus::Error => self.error,
            AgentStatus::Unknown => self.dim,
        }
    }
}

fn status_glyph(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Running => "● ",
        AgentStatus::Waiting => "? ",
        AgentStatus::Idle => "● ",
        AgentStatus::Error => "✗ ",
        AgentStatus::Unknown => "○ ",
    }
}

/// Input mode for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Creating,
    Forking,
    Renaming,
    Confirming,
}

/// Footer message from the last operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub is_error: bool,
}

/// Main application state
pub struct App {
    /// Last snapshot received from the aggregator
    pub state: Arc<State>,
    /// Currently selected session index
    pub list_state: ListState,
    pub message: Option<StatusMessage>,
    /// Theme
    pub theme: Theme,
    /// Current input mode
    pub input_mode: InputMode,
    /// Text input buffer
    pub input_buffer: String,
    /// Pending action queue
    pub pending_actions: Vec<Action>,
    /// Components of the selected project, polled between snapshots
    pub live_components: Option<(PathBuf, Vec<ComponentStatus>)>,
}

impl App {
    pub fn new() -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            state: Arc::new(State::default()),
            list_state,
            message: None,
            theme: Theme::default(),
            input_mode: InputMode::Normal,
            input_buffer: String::new(),
            pending_actions: Vec::new(),
            live_components: None,
        }
    }

    /// Get the currently selected session
    pub fn selected_session(&self) -> Option<&SessionView> {
        self.list_state
            .selected()
            .and_then(|i| self.state.sessions.get(i))
    }

    /// Where a new session goes: the selected session's project, else its
    /// directory, else the first known project.
    fn target_project(&self) -> Option<PathBuf> {
        match self.selected_session() {
            Some(view) => Some(view.project.clone().unwrap_or_else(|| view.session.cwd.clone())),
            None => self.state.projects.first().map(|p| p.path.clone()),
        }
    }

    /// Take pending actions (drains the queue)
    pub fn take_pending_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Handle an action and return whether to quit
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::KeyPress(key) => self.handle_key(key),
            Action::StateUpdated(state) => {
                self.set_state(state);
                self.live_components = None;
                Ok(false)
            }
            Action::Tick => {
                self.watch_selected_components();
                Ok(false)
            }
            Action::ComponentsUpdated {
                project,
                components,
            } => {
                self.live_components = Some((project, components));
                Ok(false)
            }
            Action::Error(text) => {
                self.message = Some(StatusMessage {
                    text,
                    is_error: true,
                });
                Ok(false)
            }
            Action::Notice(text) => {
                self.message = Some(StatusMessage {
                    text,
                    is_error: false,
                });
                Ok(false)
            }
            Action::Quit => Ok(true),
            _ => Ok(false),
        }
    }

    /// Swap in a new snapshot, keeping the same session selected if it
    /// still exists.
    fn set_state(&mut self, state: Arc<State>) {
        let selected_name = self.selected_session().map(|s| s.session.name.clone());
        self.state = state;

        let sessions = &self.state.sessions;
        let index = selected_name
            .and_then(|name| sessions.iter().position(|s| s.session.name == name))
            .or_else(|| {
                self.list_state
                    .selected()
                    .map(|i| i.min(sessions.len().saturating_sub(1)))
            })
            .unwrap_or(0);
        self.list_state.select(Some(index));
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        // Clear message on any key press
        if self.message.is_some() && self.input_mode == InputMode::Normal {
            self.message = None;
        }

        match self.input_mode {
            InputMode::Normal => self.handle_normal_key(key),
            InputMode::Creating | InputMode::Forking | InputMode::Renaming => {
                self.handle_input_key(key)
            }
            InputMode::Confirming => self.handle_confirming_key(key),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        let selected = self.selected_session().map(|s| s.session.name.clone());
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(true);
            }
            KeyCode::Char('j') | KeyCode::Down => self.next_session(),
            KeyCode::Char('k') | KeyCode::Up => self.previous_session(),
            KeyCode::Enter => {
                if let Some(name) = selected {
                    self.pending_actions.push(Action::AttachSession(name));
                }
            }
            KeyCode::Char('n') => self.begin_input(InputMode::Creating, String::new()),
            KeyCode::Char('f') => {
                if let Some(name) = selected {
                    self.begin_input(InputMode::Forking, format!("{}-fork", name));
                }
            }
            KeyCode::Char('e') => {
                if let Some(name) = selected {
                    self.begin_input(InputMode::Renaming, name);
                }
            }
            KeyCode::Char('r') => {
                if let Some(name) = selected {
                    self.pending_actions.push(Action::RestartSession(name));
                }
            }
            KeyCode::Char('d') => {
                if selected.is_some() {
                    self.input_mode = InputMode::Confirming;
                }
            }
            KeyCode::Char('s') => self.toggle_first_component(),
            KeyCode::Char('u') => self.pending_actions.push(Action::Refresh),
            _ => {}
        }
        Ok(false)
    }

    /// Ask for the selected project's components if it declares any.
    fn watch_selected_components(&mut self) {
        let Some(project) = self.selected_session().and_then(|s| s.project.clone()) else {
            return;
        };
        let declares = self
            .state
            .project(&project)
            .is_some_and(|p| !p.components.is_empty());
        if declares {
            self.pending_actions.push(Action::WatchComponents(project));
        }
    }

    fn begin_input(&mut self, mode: InputMode, initial: String) {
        self.input_mode = mode;
        self.input_buffer = initial;
    }

    fn toggle_first_component(&mut self) {
        let Some(project) = self.selected_session().and_then(|s| s.project.clone()) else {
            return;
        };
        let first = self
            .state
            .project(&project)
            .and_then(|p| p.components.first())
            .map(|c| c.name.clone());
        match first {
            Some(component) => self
                .pending_actions
                .push(Action::ToggleComponent { project, component }),
            None => {
                self.message = Some(StatusMessage {
                    text: format!("{} declares no components", project.display()),
                    is_error: false,
                })
            }
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Enter => {
                let name = std::mem::take(&mut self.input_buffer);
                if !name.is_empty() {
                    if let Some(action) = self.input_action(name) {
                        self.pending_actions.push(action);
                    }
                }
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char(c) => {
                // Only allow valid session name characters
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    self.input_buffer.push(c);
                }
            }
            KeyCode::Backspace => {
                self.input_buffer.pop();
            }
            _ => {}
        }
        Ok(false)
    }

    fn input_action(&self, name: String) -> Option<Action> {
        let selected = self.selected_session().map(|s| s.session.name.clone());
        match self.input_mode {
            InputMode::Creating => {
                let project = self.target_project()?;
                Some(Action::CreateSession { name, project })
            }
            InputMode::Forking => Some(Action::ForkSession {
                source: selected?,
                name,
            }),
            InputMode::Renaming => {
                let old = selected?;
                (old != name).then_some(Action::RenameSession { old, new: name })
            }
            InputMode::Normal | InputMode::Confirming => None,
        }
    }

    fn handle_confirming_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                if let Some(view) = self.selected_session() {
                    let name = view.session.name.clone();
                    self.pending_actions.push(Action::DeleteSession(name));
                }
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
            }
            _ => {}
        }
        Ok(false)
    }

    fn next_session(&mut self) {
        let len = self.state.sessions.len();
        if len == 0 {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.list_state.select(Some(i));
    }

    fn previous_session(&mut self) {
        let len = self.state.sessions.len();
        if len == 0 {
            return;
        }
        let i = match self.list_state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.list_state.select(Some(i));
    }

    pub fn render(&mut self, frame: &mut Frame) {
        frame.render_widget(
            Block::default().style(Style::default().bg(self.theme.bg)),
            frame.area(),
        );

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Main content
                Constraint::Length(3), // Footer/status
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0]);
        self.render_main(frame, chunks[1]);
        self.render_footer(frame, chunks[2]);

        // Render modal dialogs on top
        match self.input_mode {
            InputMode::Creating => self.render_input_dialog(frame, " New Session ", "Session name:"),
            InputMode::Forking => self.render_input_dialog(frame, " Fork Session ", "Name of the fork:"),
            InputMode::Renaming => self.render_input_dialog(frame, " Rename Session ", "New name:"),
            InputMode::Confirming => self.render_confirm_dialog(frame),
            InputMode::Normal => {}
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let refreshed = if self.state.refreshed_at == 0 {
            "loading…".to_string()
        } else {
            format!(
                "refreshed {}s ago",
                unix_now().saturating_sub(self.state.refreshed_at)
            )
        };
        let title = Paragraph::new(Line::from(vec![
            Span::styled(
                " AgentFleet ",
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(
                    "│ {} sessions │ {} projects │ {} agents │ {}",
                    self.state.sessions.len(),
                    self.state.projects.len(),
                    self.state.agents.len(),
                    refreshed
                ),
                Style::default().fg(self.theme.dim),
            ),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(title, area);
    }

    fn render_main(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(40), // Session list
                Constraint::Percentage(60), // Detail pane
            ])
            .split(area);

        self.render_session_list(frame, chunks[0]);
        self.render_detail_pane(frame, chunks[1]);
    }

    fn render_session_list(&mut self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = if self.state.sessions.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "  No sessions found. Press 'n' to create one.",
                Style::default().fg(self.theme.dim),
            )))]
        } else {
            self.state
                .sessions
                .iter()
                .map(|view| {
                    let icon = Span::styled(
                        status_glyph(view.status),
                        Style::default().fg(self.theme.status_color(view.status)),
                    );
                    let name = Span::styled(
                        view.session.name.clone(),
                        Style::default().fg(self.theme.fg),
                    );
                    let mut spans = vec![icon, name];
                    if view.session.attached {
                        spans.push(Span::styled(" (attached)", Style::default().fg(self.theme.dim)));
                    }
                    ListItem::new(Line::from(spans))
                })
                .collect()
        };

        let list = List::new(items)
            .block(
                Block::default()
                    .title(" Sessions ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::Rgb(50, 50, 50))
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");

        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn field<'a>(&self, label: &'a str, value: String, color: Color) -> Line<'a> {
        Line::from(vec![
            Span::styled(label, Style::default().fg(self.theme.dim)),
            Span::styled(value, Style::default().fg(color)),
        ])
    }

    fn render_detail_pane(&self, frame: &mut Frame, area: Rect) {
        let content = match self.selected_session() {
            Some(view) => self.session_details(view),
            None => vec![
                Line::from(Span::styled(
                    "No session selected",
                    Style::default().fg(self.theme.dim),
                )),
                Line::from(""),
                Line::from(Span::styled(
                    "Press 'n' to create a new session",
                    Style::default().fg(self.theme.dim),
                )),
            ],
        };

        let detail = Paragraph::new(content)
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .title(" Details ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            );
        frame.render_widget(detail, area);
    }

    fn session_details(&self, view: &SessionView) -> Vec<Line<'static>> {
        let fg = self.theme.fg;
        let session = &view.session;
        let mut lines = vec![
            self.field("Name: ", session.name.clone(), fg),
            self.field(
                "Status: ",
                view.status.to_string(),
                self.theme.status_color(view.status),
            ),
            self.field("Directory: ", session.cwd.display().to_string(), fg),
            self.field(
                "Windows: ",
                format!(
                    "{}{}",
                    session.windows,
                    if session.attached { " (attached)" } else { "" }
                ),
                fg,
            ),
            self.field(
                "Idle for: ",
                format!("{}s", unix_now().saturating_sub(session.last_activity)),
                fg,
            ),
        ];

        if let Some(agent) = self
            .state
            .agents
            .iter()
            .find(|a| a.session.as_deref() == Some(session.name.as_str()))
        {
            lines.push(self.field(
                "Agent: ",
                format!("{} ({} {})", agent.agent.name, agent.agent.program, agent.agent.model),
                self.theme.accent,
            ));
        }

        let Some(project) = view.project.as_deref().and_then(|p| self.state.project(p)) else {
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                "Not inside a known project",
                Style::default().fg(self.theme.dim),
            )));
            return lines;
        };

        lines.push(Line::from(""));
        lines.push(self.field("Project: ", project.name.clone(), self.theme.accent));
        if let Some(tasks) = project.tasks {
            lines.push(self.field(
                "Tasks: ",
                format!("{} open, {} done", tasks.open, tasks.done),
                fg,
            ));
        }
        if let Some(specs) = project.specs {
            lines.push(self.field("Specs: ", specs.files.to_string(), fg));
        }
        if let Some(research) = project.research {
            lines.push(self.field("Research: ", research.files.to_string(), fg));
        }

        let components: Vec<&ComponentStatus> = match &self.live_components {
            Some((path, live)) if *path == project.path => live.iter().collect(),
            _ => self.state.components_of(&project.path).collect(),
        };
        for component in components {
            let color = match component.state {
                ProcessState::Running => self.theme.success,
                ProcessState::Starting => self.theme.warning,
                ProcessState::Stopped if component.last_error.is_some() => self.theme.error,
                ProcessState::Stopped => self.theme.dim,
            };
            let pid = component.pid.map(|p| format!(" pid {}", p)).unwrap_or_default();
            lines.push(Line::from(""));
            lines.push(self.field(
                "Component: ",
                format!("{} [{:?}{}]", component.component, component.state, pid),
                color,
            ));
            if let Some(error) = &component.last_error {
                lines.push(self.field("  error: ", error.clone(), self.theme.error));
            }
            let skip = component.logs.len().saturating_sub(LOG_PREVIEW_LINES);
            for log in &component.logs[skip..] {
                lines.push(Line::from(Span::styled(
                    format!("  {}", log),
                    Style::default().fg(self.theme.dim),
                )));
            }
        }
        lines
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let help_text = " q: Quit │ j/k: Navigate │ Enter: Attach │ n: New │ f: Fork │ e: Rename │ r: Restart │ d: Kill │ s: Component │ u: Refresh ";

        let content = match &self.message {
            Some(message) => {
                let color = if message.is_error {
                    self.theme.error
                } else {
                    self.theme.success
                };
                Line::from(Span::styled(
                    format!(" {} ", message.text),
                    Style::default().fg(color),
                ))
            }
            None => Line::from(Span::styled(help_text, Style::default().fg(self.theme.dim))),
        };

        let footer = Paragraph::new(content).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(footer, area);
    }

    fn render_input_dialog(&self, frame: &mut Frame, title: &str, prompt: &str) {
        let area = centered_rect(50, 20, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(title.to_string())
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.accent));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(
                prompt.to_string(),
                Style::default().fg(self.theme.fg),
            )),
            Line::from(""),
            Line::from(Span::styled(
                format!("▶ {}_", self.input_buffer),
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Press Enter to confirm, Esc to cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];

        let paragraph = Paragraph::new(text);
        frame.render_widget(paragraph, inner);
    }

    fn render_confirm_dialog(&self, frame: &mut Frame) {
        let area = centered_rect(50, 20, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" Confirm Kill ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.error));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let session_name = self
            .selected_session()
            .map(|s| s.session.name.as_str())
            .unwrap_or("unknown");

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(
                format!("Kill session '{}'?", session_name),
                Style::default().fg(self.theme.fg),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "The agent running in it is terminated.",
                Style::default().fg(self.theme.warning),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Press 'y' to confirm, 'n' or Esc to cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];

        let paragraph = Paragraph::new(text);
        frame.render_widget(paragraph, inner);
    }
}

/// Helper function to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
