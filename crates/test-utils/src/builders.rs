#![allow(dead_code)]

use std::path::{Path, PathBuf};

use devproxy::config::{resolve_settings, RawConfigFile, Settings};

/// Builder for `Settings` to simplify test setup.
///
/// Starts from an empty config file rooted at `root`; anything not set falls
/// back to the regular defaults.
pub struct SettingsBuilder {
    root: PathBuf,
    config: RawConfigFile,
}

impl SettingsBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: RawConfigFile::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.backend.port = Some(port);
        self
    }

    pub fn with_upstream(mut self, url: &str) -> Self {
        self.config.proxy.upstream = Some(url.to_string());
        self
    }

    pub fn with_build_cmd(mut self, cmd: &[&str]) -> Self {
        self.config.build.cmd = Some(cmd.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.config.backend.binary = Some(binary.into());
        self
    }

    pub fn with_backend_args(mut self, args: &[&str]) -> Self {
        self.config.backend.args = Some(args.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_ready_timeout_ms(mut self, ms: u64) -> Self {
        self.config.backend.ready_timeout_ms = Some(ms);
        self
    }

    pub fn with_extensions(mut self, exts: &[&str]) -> Self {
        self.config.watch.extensions = Some(exts.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_ignore(mut self, globs: &[&str]) -> Self {
        self.config.watch.ignore = Some(globs.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn raw(&self) -> &RawConfigFile {
        &self.config
    }

    pub fn build(self) -> Settings {
        resolve_settings(self.config, &self.root).expect("valid test settings")
    }
}

/// Write `contents` to `root/rel`, creating parent directories.
pub fn write_source(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(&path, contents).expect("write source file");
}
