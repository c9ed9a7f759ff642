// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `devproxy`.
///
/// Every flag overrides the matching setting from the config file.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "devproxy",
    version,
    about = "Rebuild and restart a backend on source changes, and proxy requests to it.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Devproxy.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory the build installs the binary into.
    #[arg(long, value_name = "DIR")]
    pub bindir: Option<PathBuf>,

    /// Backend binary to run after each build.
    #[arg(long, value_name = "PATH")]
    pub binary: Option<PathBuf>,

    /// Port the backend listens on.
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// URL requests are forwarded to, e.g. `http://localhost:3000`.
    #[arg(long, value_name = "URL")]
    pub upstream: Option<String>,

    /// Address the proxy listens on, e.g. `:3030`.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Project root to fingerprint and build in.
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DEVPROXY_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Resolve and print the settings, but don't build or listen.
    #[arg(long)]
    pub dry_run: bool,

    /// Arguments passed to the backend.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "BACKEND_ARGS")]
    pub backend_args: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
