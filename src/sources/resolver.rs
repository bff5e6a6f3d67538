use std::collections::HashMap;
use std::path::Path;

use crate::config::AgentCommand;

/// Program plus arguments typed into a fresh session to start an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// A plain shell session has nothing to launch.
    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }

    /// Shell line suitable for `send-keys`.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn builtin(agent_type: &str) -> Option<LaunchCommand> {
    let command = match agent_type {
        "claude" => LaunchCommand::new("claude", &[]),
        "codex" => LaunchCommand::new("codex", &[]),
        "gemini" => LaunchCommand::new("gemini", &[]),
        "opencode" => LaunchCommand::new("opencode", &[]),
        "shell" => LaunchCommand::new("", &[]),
        _ => return None,
    };
    Some(command)
}

/// Maps agent types to launch commands; configured commands take precedence
/// over the built-in ones. `{project}` in configured arguments expands to
/// the project path.
pub struct CommandResolver {
    overrides: HashMap<String, AgentCommand>,
}

impl CommandResolver {
    pub fn new(overrides: HashMap<String, AgentCommand>) -> Self {
        Self { overrides }
    }

    pub fn resolve(&self, agent_type: &str, project: &Path) -> Option<LaunchCommand> {
        if let Some(configured) = self.overrides.get(agent_type) {
            let project = project.to_string_lossy();
            return Some(LaunchCommand {
                program: configured.command.clone(),
                args: configured
                    .args
                    .iter()
                    .map(|arg| arg.replace("{project}", &project))
                    .collect(),
            });
        }
        builtin(agent_type)
    }

    /// Launch command for a session forked from an existing conversation.
    pub fn resolve_fork(&self, agent_type: &str, project: &Path) -> Option<LaunchCommand> {
        let mut command = self.resolve(agent_type, project)?;
        if agent_type == "claude" {
            command.args.push("--continue".to_string());
            command.args.push("--fork-session".to_string());
        }
        Some(command)
    }
}
