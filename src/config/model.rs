// src/config/model.rs

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::exec::RunnerConfig;
use crate::fingerprint::TreeRules;
use crate::probe::ReadinessProbe;
use crate::proxy::Upstream;

/// Top-level configuration as read from `Devproxy.toml`.
///
/// ```toml
/// [proxy]
/// listen = ":3030"
/// upstream = "http://localhost:3000"
///
/// [build]
/// cmd = ["go", "install", "-v"]
/// bindir = "bin"
///
/// [backend]
/// port = 3000
/// args = ["--dev"]
///
/// [watch]
/// extensions = ["go", "tmpl"]
/// ignore = ["vendor", "node_modules"]
/// ```
///
/// Every field is optional. Command-line flags override the file, and
/// anything left unset falls back to a default when the file is turned into
/// [`Settings`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub proxy: ProxySection,

    #[serde(default)]
    pub build: BuildSection,

    #[serde(default)]
    pub backend: BackendSection,

    #[serde(default)]
    pub watch: WatchSection,
}

/// `[proxy]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxySection {
    /// Address the proxy binds. `":3030"` means all interfaces.
    pub listen: Option<String>,

    /// Where requests are forwarded. Defaults to `http://localhost:<port>`.
    pub upstream: Option<String>,
}

/// `[build]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildSection {
    /// Build command and arguments.
    pub cmd: Option<Vec<String>>,

    /// Output directory for the built binary; relative to the project root.
    pub bindir: Option<PathBuf>,

    /// Environment variable through which `bindir` is passed to the build.
    pub out_dir_env: Option<String>,
}

/// `[backend]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendSection {
    /// Binary to run after a build. Defaults to `<bindir>/<project dir name>`.
    pub binary: Option<PathBuf>,

    pub args: Option<Vec<String>>,

    /// Port the backend listens on (passed via `port_env`).
    pub port: Option<u16>,

    pub port_env: Option<String>,

    /// Pause between readiness probes, in milliseconds.
    pub ready_poll_ms: Option<u64>,

    /// Give up waiting for readiness after this many milliseconds.
    /// Unset or `0` waits indefinitely.
    pub ready_timeout_ms: Option<u64>,
}

/// `[watch]` section: which files make up the fingerprint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchSection {
    pub root: Option<PathBuf>,
    pub extensions: Option<Vec<String>>,
    /// Directory-name globs to skip. Replaces the default list.
    pub ignore: Option<Vec<String>>,
}

/// Fully resolved and validated settings.
///
/// Construct through [`crate::config::resolve_settings`] (or
/// [`crate::config::load_settings`]); every path is absolute.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub listen: SocketAddr,
    pub upstream: Upstream,
    pub build_cmd: Vec<String>,
    pub bindir: PathBuf,
    pub out_dir_env: String,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub port: u16,
    pub port_env: String,
    pub ready_poll: Duration,
    pub ready_timeout: Option<Duration>,
    pub extensions: Vec<String>,
    pub ignore: Vec<String>,
    pub(crate) rules: TreeRules,
}

impl Settings {
    pub fn tree_rules(&self) -> TreeRules {
        self.rules.clone()
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            workdir: self.root.clone(),
            build_cmd: self.build_cmd.clone(),
            bindir: self.bindir.clone(),
            out_dir_env: self.out_dir_env.clone(),
            binary: self.binary.clone(),
            args: self.args.clone(),
            port: self.port,
            port_env: self.port_env.clone(),
        }
    }

    /// Where readiness is checked: the backend port on loopback.
    pub fn ready_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.port))
    }

    pub fn probe(&self) -> ReadinessProbe {
        ReadinessProbe::new(self.ready_addr())
            .with_poll_interval(self.ready_poll)
            .with_timeout(self.ready_timeout)
    }
}
