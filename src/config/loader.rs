// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cli::CliArgs;
use crate::config::model::{RawConfigFile, Settings};
use crate::config::validate::resolve_settings;
use crate::errors::{DevproxyError, Result};

/// Load a configuration file from a given path and return the raw
/// `RawConfigFile`.
///
/// This only performs TOML deserialization; defaults and validation happen
/// in [`resolve_settings`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Build the effective settings for a run.
///
/// - An explicit `--config` must exist.
/// - Otherwise `Devproxy.toml` in the current directory is used if present.
/// - CLI flags override the file; relative paths given on the command line
///   are taken relative to the current directory, those in the file relative
///   to the file's directory.
pub fn load_settings(args: &CliArgs) -> Result<Settings> {
    let cwd = std::env::current_dir()?;

    let (raw, base_dir) = match &args.config {
        Some(path) => {
            if !path.is_file() {
                return Err(DevproxyError::ConfigError(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            (load_from_path(path)?, config_dir(path, &cwd))
        }
        None => {
            let path = default_config_path();
            if path.is_file() {
                debug!(path = %path.display(), "using config file");
                (load_from_path(&path)?, config_dir(&path, &cwd))
            } else {
                (RawConfigFile::default(), cwd.clone())
            }
        }
    };

    let raw = apply_cli_overrides(raw, args, &cwd);
    resolve_settings(raw, &base_dir)
}

/// Overlay command-line flags onto a loaded config file.
pub fn apply_cli_overrides(mut raw: RawConfigFile, args: &CliArgs, cwd: &Path) -> RawConfigFile {
    if let Some(root) = &args.root {
        raw.watch.root = Some(cwd.join(root));
    }
    if let Some(bindir) = &args.bindir {
        raw.build.bindir = Some(cwd.join(bindir));
    }
    if let Some(binary) = &args.binary {
        raw.backend.binary = Some(cwd.join(binary));
    }
    if let Some(port) = args.port {
        raw.backend.port = Some(port);
    }
    if let Some(upstream) = &args.upstream {
        raw.proxy.upstream = Some(upstream.clone());
    }
    if let Some(listen) = &args.listen {
        raw.proxy.listen = Some(listen.clone());
    }
    if !args.backend_args.is_empty() {
        raw.backend.args = Some(args.backend_args.clone());
    }
    raw
}

/// `Devproxy.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Devproxy.toml")
}

fn config_dir(config_path: &Path, cwd: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => cwd.join(parent),
        _ => cwd.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn args(argv: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("devproxy").chain(argv.iter().copied()))
    }

    #[test]
    fn parses_all_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[proxy]
listen = "127.0.0.1:4000"

[build]
cmd = ["make", "server"]

[backend]
port = 8080
args = ["-v"]
ready_timeout_ms = 5000

[watch]
extensions = ["go", "tmpl"]
"#
        )
        .unwrap();

        let raw = load_from_path(file.path()).unwrap();
        assert_eq!(raw.proxy.listen.as_deref(), Some("127.0.0.1:4000"));
        assert_eq!(raw.build.cmd, Some(vec!["make".to_string(), "server".to_string()]));
        assert_eq!(raw.backend.port, Some(8080));
        assert_eq!(raw.backend.ready_timeout_ms, Some(5000));
        assert_eq!(raw.watch.extensions.as_ref().map(Vec::len), Some(2));
        assert!(raw.proxy.upstream.is_none());
    }

    #[test]
    fn malformed_toml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[backend]\nport = \"not a number\"\n").unwrap();

        match load_from_path(file.path()) {
            Err(DevproxyError::TomlError(_)) => {}
            other => panic!("expected TomlError, got {other:?}"),
        }
    }

    #[test]
    fn cli_flags_win_over_file() {
        let mut raw = RawConfigFile::default();
        raw.backend.port = Some(3000);
        raw.proxy.listen = Some(":3030".into());

        let cli = args(&["--port", "9000", "--root", "app", "--", "--dev", "-x"]);
        let merged = apply_cli_overrides(raw, &cli, Path::new("/work"));

        assert_eq!(merged.backend.port, Some(9000));
        assert_eq!(merged.proxy.listen.as_deref(), Some(":3030"));
        assert_eq!(merged.watch.root, Some(PathBuf::from("/work/app")));
        assert_eq!(
            merged.backend.args,
            Some(vec!["--dev".to_string(), "-x".to_string()])
        );
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let cli = args(&["--config", "/definitely/not/here/Devproxy.toml"]);
        match load_settings(&cli) {
            Err(DevproxyError::ConfigError(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }
}
