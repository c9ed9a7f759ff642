// src/exec/runner.rs

//! Build and lifecycle operations on the backend.
//!
//! The coordinator talks to a [`ProcessRunner`] rather than spawning
//! processes itself, so tests can swap in a fake that binds a socket instead
//! of compiling anything. [`CommandRunner`] is the real implementation.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::RefreshError;

use super::process::SupervisedProcess;
use super::stream::{Diagnostics, OutputStreams};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How long the build's pipes may stay open after the build command exited.
const BUILD_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Operations the reload coordinator needs from the process layer.
///
/// Implementations own the supervised process; at most one is live at a time.
pub trait ProcessRunner: Send {
    /// Run the build. On failure the error carries the build's stderr.
    fn build(&mut self) -> BoxFuture<'_, Result<(), RefreshError>>;

    /// Launch the backend and return as soon as it is spawned.
    ///
    /// A backend that is still running is stopped first.
    fn start(&mut self) -> BoxFuture<'_, Result<(), RefreshError>>;

    /// Stop the backend if one is running. Returns whether anything was
    /// stopped; calling it with nothing running is a no-op.
    fn stop(&mut self) -> BoxFuture<'_, bool>;

    /// Whether a backend process is live. A backend that exited on its own
    /// is forgotten here.
    fn is_running(&mut self) -> bool;

    /// Resolves with the backend's diagnostics once it exits. Never resolves
    /// while no backend is running.
    fn exited(&mut self) -> BoxFuture<'_, String>;
}

/// What to run, and where.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Working directory for both the build and the backend.
    pub workdir: PathBuf,
    /// Build command and its arguments, e.g. `["go", "install", "-v"]`.
    pub build_cmd: Vec<String>,
    /// Directory the build places the binary into.
    pub bindir: PathBuf,
    /// Environment variable naming `bindir` for the build, e.g. `GOBIN`.
    pub out_dir_env: String,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub port: u16,
    /// Environment variable carrying `port`, e.g. `PORT`.
    pub port_env: String,
}

/// Runs the configured build command and backend binary as OS processes.
#[derive(Debug)]
pub struct CommandRunner {
    config: RunnerConfig,
    process: Option<SupervisedProcess>,
}

impl CommandRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            process: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid())
    }

    async fn run_build(&mut self) -> Result<(), RefreshError> {
        let cfg = &self.config;
        let Some((program, args)) = cfg.build_cmd.split_first() else {
            return Err(RefreshError::Build("no build command configured".to_string()));
        };

        if !cfg.bindir.exists() {
            std::fs::create_dir_all(&cfg.bindir).map_err(|e| {
                RefreshError::Build(format!("creating output directory {:?}: {e}", cfg.bindir))
            })?;
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&cfg.workdir)
            .env(&cfg.out_dir_env, &cfg.bindir)
            .env(&cfg.port_env, cfg.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(cmd = ?cfg.build_cmd, workdir = ?cfg.workdir, "running build command");

        let mut child = cmd
            .spawn()
            .map_err(|e| RefreshError::Build(format!("spawning build command {program:?}: {e}")))?;

        let diagnostics = Diagnostics::unbounded();
        let mut streams = OutputStreams::spawn(
            "build",
            child.stdout.take(),
            child.stderr.take(),
            diagnostics.clone(),
        );

        let status = child
            .wait()
            .await
            .map_err(|e| RefreshError::Build(format!("waiting for build command: {e}")))?;

        // Everything written to stderr must be in the buffer before we
        // decide what to report.
        streams.settle(BUILD_DRAIN_GRACE).await;

        if status.success() {
            return Ok(());
        }

        warn!(%status, "build failed");
        if diagnostics.is_empty() {
            Err(RefreshError::Build(format!("build command exited with {status}")))
        } else {
            Err(RefreshError::Build(diagnostics.text()))
        }
    }

    async fn run_start(&mut self) -> Result<(), RefreshError> {
        self.run_stop().await;

        let cfg = &self.config;
        let mut cmd = Command::new(&cfg.binary);
        cmd.args(&cfg.args)
            .current_dir(&cfg.workdir)
            .env(&cfg.port_env, cfg.port.to_string());

        let process = SupervisedProcess::spawn(&mut cmd)
            .map_err(|e| RefreshError::Start(format!("starting {:?}: {e}", cfg.binary)))?;

        info!(pid = ?process.pid(), binary = ?cfg.binary, port = cfg.port, "backend started");
        self.process = Some(process);
        Ok(())
    }

    async fn run_stop(&mut self) -> bool {
        match self.process.take() {
            Some(process) => {
                process.terminate().await;
                true
            }
            None => false,
        }
    }
}

impl ProcessRunner for CommandRunner {
    fn build(&mut self) -> BoxFuture<'_, Result<(), RefreshError>> {
        Box::pin(self.run_build())
    }

    fn start(&mut self) -> BoxFuture<'_, Result<(), RefreshError>> {
        Box::pin(self.run_start())
    }

    fn stop(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(self.run_stop())
    }

    fn is_running(&mut self) -> bool {
        let exited = match self.process.as_mut() {
            Some(p) => p.has_exited(),
            None => return false,
        };
        if exited {
            if let Some(p) = self.process.take() {
                info!(pid = ?p.pid(), "backend is no longer running");
            }
            return false;
        }
        true
    }

    fn exited(&mut self) -> BoxFuture<'_, String> {
        Box::pin(async move {
            match self.process.as_mut() {
                Some(p) => p.wait_exit().await,
                None => std::future::pending().await,
            }
        })
    }
}
