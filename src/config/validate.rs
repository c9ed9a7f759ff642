// src/config/validate.rs

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::model::{RawConfigFile, Settings};
use crate::errors::{DevproxyError, Result};
use crate::fingerprint::{TreeRules, DEFAULT_EXTENSIONS, DEFAULT_IGNORE_DIRS};
use crate::probe::DEFAULT_POLL_INTERVAL;
use crate::proxy::Upstream;

pub const DEFAULT_LISTEN: &str = ":3030";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BUILD_CMD: &[&str] = &["go", "install", "-v"];
pub const DEFAULT_OUT_DIR_ENV: &str = "GOBIN";
pub const DEFAULT_PORT_ENV: &str = "PORT";

fn config_error(msg: impl Into<String>) -> DevproxyError {
    DevproxyError::ConfigError(msg.into())
}

/// Apply defaults to `raw` and validate the result.
///
/// Relative paths are resolved against `base_dir` (the project root is
/// `base_dir` itself unless `[watch].root` says otherwise).
pub fn resolve_settings(raw: RawConfigFile, base_dir: &Path) -> Result<Settings> {
    let root = absolutize(base_dir, raw.watch.root.as_deref().unwrap_or(Path::new(".")));

    let build_cmd: Vec<String> = raw
        .build
        .cmd
        .unwrap_or_else(|| DEFAULT_BUILD_CMD.iter().map(|s| s.to_string()).collect());
    if build_cmd.first().is_none_or(|p| p.trim().is_empty()) {
        return Err(config_error("[build].cmd must name a program"));
    }

    let bindir = absolutize(&root, raw.build.bindir.as_deref().unwrap_or(Path::new("bin")));

    let binary = match raw.backend.binary {
        Some(bin) => absolutize(&root, &bin),
        None => {
            let name = root.file_name().ok_or_else(|| {
                config_error(format!(
                    "cannot derive backend binary name from root {:?}; set [backend].binary",
                    root
                ))
            })?;
            bindir.join(name)
        }
    };

    let port = raw.backend.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(config_error("[backend].port must be between 1 and 65535"));
    }

    let upstream_url = raw
        .proxy
        .upstream
        .unwrap_or_else(|| format!("http://localhost:{port}"));
    let upstream = Upstream::parse(&upstream_url).map_err(config_error)?;

    let listen = parse_listen(raw.proxy.listen.as_deref().unwrap_or(DEFAULT_LISTEN))?;

    let out_dir_env = env_name(raw.build.out_dir_env, DEFAULT_OUT_DIR_ENV, "[build].out_dir_env")?;
    let port_env = env_name(raw.backend.port_env, DEFAULT_PORT_ENV, "[backend].port_env")?;

    let ready_poll = match raw.backend.ready_poll_ms {
        Some(0) => return Err(config_error("[backend].ready_poll_ms must be >= 1 (got 0)")),
        Some(ms) => Duration::from_millis(ms),
        None => DEFAULT_POLL_INTERVAL,
    };
    let ready_timeout = match raw.backend.ready_timeout_ms {
        None | Some(0) => None,
        Some(ms) => Some(Duration::from_millis(ms)),
    };

    let extensions = raw
        .watch
        .extensions
        .unwrap_or_else(|| DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect());
    let ignore = raw
        .watch
        .ignore
        .unwrap_or_else(|| DEFAULT_IGNORE_DIRS.iter().map(|s| s.to_string()).collect());

    let rules = TreeRules::new(&ignore, &extensions).map_err(|e| config_error(format!("{e:#}")))?;
    if rules.extensions().is_empty() {
        return Err(config_error("[watch].extensions must list at least one extension"));
    }

    Ok(Settings {
        root,
        listen,
        upstream,
        build_cmd,
        bindir,
        out_dir_env,
        binary,
        args: raw.backend.args.unwrap_or_default(),
        port,
        port_env,
        ready_poll,
        ready_timeout,
        extensions,
        ignore,
        rules,
    })
}

/// Parse a listen address. A bare `":port"` binds all interfaces.
pub fn parse_listen(s: &str) -> Result<SocketAddr> {
    let s = s.trim();
    let full = if s.starts_with(':') {
        format!("0.0.0.0{s}")
    } else {
        s.to_string()
    };

    if let Ok(addr) = full.parse::<SocketAddr>() {
        return Ok(addr);
    }

    full.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| config_error(format!("invalid listen address '{s}'")))
}

fn env_name(value: Option<String>, default: &str, field: &str) -> Result<String> {
    let name = value.unwrap_or_else(|| default.to_string());
    if name.is_empty() || name.contains('=') || name.contains('\0') {
        return Err(config_error(format!("{field} is not a valid environment variable name: '{name}'")));
    }
    Ok(name)
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else if path == Path::new(".") {
        base.to_path_buf()
    } else {
        base.join(path)
    }
}
