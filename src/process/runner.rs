use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::ProcessError;

/// How long a stopped process gets to exit after SIGTERM before SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// A freshly spawned child: its pid, both output streams and a control
/// handle used to stop it or wait for it.
pub struct SpawnedProcess {
    pub pid: u32,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub control: Box<dyn ProcessControl>,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// `None` when the process was ended by a signal.
    pub code: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => f.write_str("signal"),
        }
    }
}

pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, command: &str, workdir: &Path) -> Result<SpawnedProcess, ProcessError>;
}

#[async_trait]
pub trait ProcessControl: Send {
    /// Wait for the process to exit on its own.
    async fn wait(&mut self) -> std::io::Result<ExitInfo>;

    /// Terminate the process and wait for it to exit.
    async fn stop(&mut self) -> std::io::Result<ExitInfo>;
}

/// Runs component commands through `sh -c` in their own process group.
#[derive(Debug, Default)]
pub struct ShellRunner;

impl ProcessRunner for ShellRunner {
    fn spawn(&self, command: &str, workdir: &Path) -> Result<SpawnedProcess, ProcessError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let pid = child.id().ok_or(ProcessError::ExitedEarly)?;
        let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ProcessError::MissingPipe("stderr"))?;

        info!(pid, command = %command, workdir = %workdir.display(), "process spawned");
        Ok(SpawnedProcess {
            pid,
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            control: Box::new(ChildControl { child, pid }),
        })
    }
}

struct ChildControl {
    child: Child,
    pid: u32,
}

impl ChildControl {
    /// Signal the whole group so `sh -c` children go down with the shell.
    #[cfg(unix)]
    fn signal_group(&mut self, signal: nix::sys::signal::Signal) -> std::io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let group = i32::try_from(self.pid)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        match killpg(Pid::from_raw(group), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(std::io::Error::from(errno)),
        }
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> std::io::Result<()> {
        self.signal_group(nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(unix)]
    fn kill_group(&mut self) -> std::io::Result<()> {
        self.signal_group(nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }

    #[cfg(not(unix))]
    fn kill_group(&mut self) -> std::io::Result<()> {
        match self.child.start_kill() {
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }
}

#[async_trait]
impl ProcessControl for ChildControl {
    async fn wait(&mut self) -> std::io::Result<ExitInfo> {
        let status = self.child.wait().await?;
        Ok(ExitInfo {
            code: status.code(),
        })
    }

    async fn stop(&mut self) -> std::io::Result<ExitInfo> {
        self.terminate()?;
        let exit = match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
            Ok(status) => ExitInfo {
                code: status?.code(),
            },
            Err(_) => {
                debug!(pid = self.pid, "process ignored SIGTERM, killing group");
                self.kill_group()?;
                self.wait().await?
            }
        };
        // The shell may be gone while children that ignore SIGTERM live on.
        if let Err(e) = self.kill_group() {
            debug!(pid = self.pid, error = %e, "failed to kill remaining group members");
        }
        Ok(exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_shell_runner_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = ShellRunner
            .spawn("echo hello; echo oops >&2", dir.path())
            .unwrap();

        let mut stdout = BufReader::new(process.stdout).lines();
        let mut stderr = BufReader::new(process.stderr).lines();
        assert_eq!(stdout.next_line().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(stderr.next_line().await.unwrap().as_deref(), Some("oops"));
        assert!(process.control.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_shell_runner_stop_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = ShellRunner.spawn("sleep 30", dir.path()).unwrap();
        assert!(process.pid > 0);

        let exit = process.control.stop().await.unwrap();
        assert!(!exit.success());
    }

    #[cfg(target_os = "linux")]
    fn is_gone(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            // Field 3 is the state; a zombie is dead but not yet reaped.
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => true,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_stop_kills_children_that_ignore_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = ShellRunner
            .spawn("(trap '' TERM; sleep 300) & echo $!; wait", dir.path())
            .unwrap();

        let mut stdout = BufReader::new(process.stdout).lines();
        let child: i32 = stdout.next_line().await.unwrap().unwrap().trim().parse().unwrap();
        assert!(!is_gone(child));

        process.control.stop().await.unwrap();

        let mut gone = false;
        for _ in 0..200 {
            if is_gone(child) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(gone, "pid {} outlived stop", child);
    }

    #[test]
    fn test_exit_info_display() {
        assert_eq!(ExitInfo { code: Some(2) }.to_string(), "exit code 2");
        assert_eq!(ExitInfo { code: None }.to_string(), "signal");
    }
}
