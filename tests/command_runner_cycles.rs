// tests/command_runner_cycles.rs

//! Reload cycles against real processes. The "build" and "backend" are
//! small shell and python scripts, so these only run on unix.

#![cfg(unix)]

mod common;
use crate::common::{
    fingerprinter, init_tracing, project, settings_for, with_timeout, write_source, TestResult,
};

use std::path::{Path, PathBuf};
use std::process::Command;

use tokio::net::TcpStream;

use devproxy::coordinator::ReloadCoordinator;
use devproxy::errors::RefreshError;
use devproxy::exec::CommandRunner;
use devproxy::types::RefreshOutcome;

/// Backend that binds `$PORT`, logs each start, and logs `term` when it
/// receives SIGTERM.
const LISTENING_BACKEND: &str = r#"
import os, signal, socket, sys, time

def on_term(*_):
    with open("stops.log", "a") as f:
        f.write("term\n")
    sys.exit(0)

signal.signal(signal.SIGTERM, on_term)
with open("starts.log", "a") as f:
    f.write("start\n")

s = socket.socket()
s.setsockopt(socket.SOL_SOCKET, socket.SO_REUSEADDR, 1)
s.bind(("127.0.0.1", int(os.environ["PORT"])))
s.listen()
while True:
    time.sleep(1)
"#;

/// Absolute path of `python3`; relative binaries resolve against the
/// project root.
fn python3() -> Option<PathBuf> {
    let out = Command::new("sh").args(["-c", "command -v python3"]).output().ok()?;
    let path = String::from_utf8(out.stdout).ok()?;
    let path = path.trim();
    (out.status.success() && !path.is_empty()).then(|| PathBuf::from(path))
}

fn log_lines(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn successful_cycles_rebuild_only_when_sources_change() -> TestResult {
    init_tracing();
    let Some(python) = python3() else {
        eprintln!("python3 not available; skipping");
        return Ok(());
    };

    let dir = project();
    write_source(dir.path(), "backend.py", LISTENING_BACKEND);
    let settings = settings_for(dir.path())
        .with_build_cmd(&["sh", "-c", "echo build >> \"$GOBIN/builds.log\""])
        .with_binary(python)
        .with_backend_args(&["backend.py"])
        .build();
    let coordinator = ReloadCoordinator::new(
        fingerprinter(&settings),
        CommandRunner::new(settings.runner_config()),
        settings.probe(),
    );
    let builds = settings.bindir.join("builds.log");
    let starts = dir.path().join("starts.log");
    let stops = dir.path().join("stops.log");

    assert_eq!(with_timeout(coordinator.ensure_fresh()).await?, RefreshOutcome::Rebuilt);
    TcpStream::connect(settings.ready_addr()).await?;
    assert_eq!((log_lines(&builds), log_lines(&starts)), (1, 1));

    // Same tree, live backend: no subprocess runs at all.
    assert_eq!(with_timeout(coordinator.ensure_fresh()).await?, RefreshOutcome::Unchanged);
    assert_eq!((log_lines(&builds), log_lines(&starts)), (1, 1));
    assert_eq!(log_lines(&stops), 0);

    write_source(dir.path(), "main.go", "package main\n\nfunc main() { serve() }\n");
    assert_eq!(with_timeout(coordinator.ensure_fresh()).await?, RefreshOutcome::Rebuilt);
    assert_eq!(log_lines(&stops), 1, "old backend got SIGTERM before the rebuild");
    assert_eq!((log_lines(&builds), log_lines(&starts)), (2, 2));
    TcpStream::connect(settings.ready_addr()).await?;

    assert!(coordinator.shutdown().await);
    assert_eq!(log_lines(&stops), 2);
    Ok(())
}

#[tokio::test]
async fn compiler_errors_come_back_verbatim() -> TestResult {
    init_tracing();
    let dir = project();
    let settings = settings_for(dir.path())
        .with_build_cmd(&[
            "sh",
            "-c",
            "printf './main.go:3:1: syntax error: non-declaration statement outside function body\\n' >&2; exit 2",
        ])
        .build();
    let coordinator = ReloadCoordinator::new(
        fingerprinter(&settings),
        CommandRunner::new(settings.runner_config()),
        settings.probe(),
    );

    let err = with_timeout(coordinator.ensure_fresh()).await.unwrap_err();
    assert_eq!(
        err,
        RefreshError::Build(
            "./main.go:3:1: syntax error: non-declaration statement outside function body\n"
                .to_string()
        )
    );
    assert!(coordinator.last_fingerprint().await.is_none());
    assert!(settings.bindir.is_dir(), "output directory is created before building");
    Ok(())
}

#[tokio::test]
async fn backend_dying_on_startup_reports_its_stderr() -> TestResult {
    init_tracing();
    let dir = project();
    let settings = settings_for(dir.path())
        .with_build_cmd(&["true"])
        .with_binary("/bin/sh")
        .with_backend_args(&["-c", "echo 'listen tcp: address already in use' >&2; exit 1"])
        .build();
    let coordinator = ReloadCoordinator::new(
        fingerprinter(&settings),
        CommandRunner::new(settings.runner_config()),
        settings.probe(),
    );

    let err = with_timeout(coordinator.ensure_fresh()).await.unwrap_err();
    assert_eq!(err.kind(), "start");
    assert!(
        err.to_string().contains("listen tcp: address already in use"),
        "got: {err}"
    );
    assert!(!coordinator.shutdown().await, "nothing left running");
    Ok(())
}
