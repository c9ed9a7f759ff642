// src/exec/process.rs

//! The supervised backend process.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::stream::{Diagnostics, OutputStreams};

/// How many trailing stderr bytes of the backend are kept for diagnostics.
pub const BACKEND_DIAGNOSTICS_LIMIT: usize = 64 * 1024;

/// How long to wait for the pipes to drain after the child exited.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A launched backend plus the tasks streaming its output.
///
/// The child is spawned with `kill_on_drop`, so dropping this without
/// calling [`SupervisedProcess::terminate`] still does not leave an orphan.
#[derive(Debug)]
pub struct SupervisedProcess {
    child: Child,
    pid: Option<u32>,
    streams: OutputStreams,
    diagnostics: Diagnostics,
    started_at: Instant,
    exit_status: Option<ExitStatus>,
}

impl SupervisedProcess {
    /// Spawn `cmd` with piped output and start streaming it.
    pub fn spawn(cmd: &mut Command) -> std::io::Result<Self> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let diagnostics = Diagnostics::with_limit(BACKEND_DIAGNOSTICS_LIMIT);
        let streams = OutputStreams::spawn(
            "backend",
            child.stdout.take(),
            child.stderr.take(),
            diagnostics.clone(),
        );

        Ok(Self {
            child,
            pid,
            streams,
            diagnostics,
            started_at: Instant::now(),
            exit_status: None,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Non-blocking check whether the child has exited on its own.
    pub fn has_exited(&mut self) -> bool {
        if self.exit_status.is_some() {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(pid = ?self.pid, error = %e, "failed to poll backend status; assuming exited");
                true
            }
        }
    }

    /// Wait until the child exits, then return everything it wrote to stderr
    /// (bounded to the last [`BACKEND_DIAGNOSTICS_LIMIT`] bytes).
    ///
    /// Cancel safe: dropping the future leaves the process untouched.
    pub async fn wait_exit(&mut self) -> String {
        if self.exit_status.is_none() {
            match self.child.wait().await {
                Ok(status) => self.exit_status = Some(status),
                Err(e) => warn!(pid = ?self.pid, error = %e, "failed to wait for backend"),
            }
        }
        self.streams.settle(EXIT_DRAIN_GRACE).await;

        let text = self.diagnostics.text();
        if text.trim().is_empty() {
            match self.exit_status {
                Some(status) => format!("backend exited before accepting connections ({status})"),
                None => "backend exited before accepting connections".to_string(),
            }
        } else {
            text
        }
    }

    /// Ask the process to stop, wait for it, and release its pipes.
    pub async fn terminate(mut self) {
        if self.exit_status.is_none() {
            if let Err(e) = send_terminate(&mut self.child) {
                debug!(pid = ?self.pid, error = %e, "could not signal backend; it may have exited");
            }
            match self.child.wait().await {
                Ok(status) => {
                    info!(pid = ?self.pid, %status, uptime_ms = self.uptime().as_millis() as u64, "backend stopped")
                }
                Err(e) => warn!(pid = ?self.pid, error = %e, "failed to wait for backend exit"),
            }
        }
        self.streams.close().await;
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        // `id()` is `None` once the child has been reaped, so we never
        // signal a recycled pid.
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn terminate_stops_a_long_running_child() {
        let proc = SupervisedProcess::spawn(&mut sh("sleep 30")).unwrap();
        assert!(proc.pid().is_some());

        tokio::time::timeout(Duration::from_secs(5), proc.terminate())
            .await
            .expect("terminate should finish promptly");
    }

    #[tokio::test]
    async fn terminate_releases_pipes_held_by_grandchildren() {
        // The background `sleep` keeps the pipes open after `sh` is gone.
        let proc = SupervisedProcess::spawn(&mut sh("sleep 30 & wait")).unwrap();

        tokio::time::timeout(Duration::from_secs(5), proc.terminate())
            .await
            .expect("terminate should not wait for grandchildren");
    }

    #[tokio::test]
    async fn wait_exit_reports_stderr() {
        let mut proc =
            SupervisedProcess::spawn(&mut sh("echo 'listen tcp :3000: bind: address already in use' >&2; exit 1"))
                .unwrap();

        let text = tokio::time::timeout(Duration::from_secs(5), proc.wait_exit())
            .await
            .unwrap();
        assert!(text.contains("address already in use"));
        assert!(proc.has_exited());
    }

    #[tokio::test]
    async fn wait_exit_without_stderr_mentions_status() {
        let mut proc = SupervisedProcess::spawn(&mut sh("exit 3")).unwrap();
        let text = proc.wait_exit().await;
        assert!(text.contains("backend exited before accepting connections"));
    }
}
