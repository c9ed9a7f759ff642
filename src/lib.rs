// src/lib.rs

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod exec;
pub mod fingerprint;
pub mod fs;
pub mod gateway;
pub mod logging;
pub mod probe;
pub mod proxy;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{load_settings, Settings};
use crate::coordinator::ReloadCoordinator;
use crate::exec::CommandRunner;
use crate::fingerprint::TreeFingerprinter;
use crate::fs::RealFileSystem;
use crate::gateway::Gateway;
use crate::proxy::Forwarder;

/// How long the backend gets to exit after Ctrl-C before we give up on it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - settings (config file + CLI overrides)
/// - fingerprinter, process runner and readiness probe
/// - the reload coordinator and the forwarder
/// - the listening gateway
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let settings = load_settings(&args)?;

    if args.dry_run {
        print_dry_run(&settings);
        return Ok(());
    }

    let fingerprinter = TreeFingerprinter::new(
        Arc::new(RealFileSystem),
        settings.root.clone(),
        settings.tree_rules(),
    );
    let runner = CommandRunner::new(settings.runner_config());
    let coordinator = ReloadCoordinator::new(fingerprinter, runner, settings.probe());
    let forwarder = Forwarder::new(settings.upstream.clone());

    let listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;

    info!(
        listen = %settings.listen,
        upstream = %settings.upstream,
        root = %settings.root.display(),
        "devproxy ready; the backend is built on the first request"
    );

    Gateway::new(coordinator.clone(), forwarder)
        .serve(listener, shutdown_signal())
        .await
        .context("serving connections")?;

    match tokio::time::timeout(SHUTDOWN_GRACE, coordinator.shutdown()).await {
        Ok(_) => {}
        Err(_) => warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "backend did not stop in time"),
    }

    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}

/// Simple dry-run output: print the effective settings.
fn print_dry_run(settings: &Settings) {
    println!("devproxy dry-run");
    println!("  listen   = {}", settings.listen);
    println!("  upstream = {}", settings.upstream);
    println!("  root     = {}", settings.root.display());
    println!();

    println!("build:");
    println!("  cmd: {}", settings.build_cmd.join(" "));
    println!("  {}={}", settings.out_dir_env, settings.bindir.display());
    println!();

    println!("backend:");
    println!("  binary: {}", settings.binary.display());
    if !settings.args.is_empty() {
        println!("  args: {:?}", settings.args);
    }
    println!("  {}={}", settings.port_env, settings.port);
    println!("  ready: {} every {:?}", settings.ready_addr(), settings.ready_poll);
    if let Some(timeout) = settings.ready_timeout {
        println!("  ready_timeout: {timeout:?}");
    }
    println!();

    println!("watch:");
    println!("  extensions: {:?}", settings.extensions);
    println!("  ignore: {:?}", settings.ignore);

    debug!("dry-run complete (nothing built or started)");
}
