// src/config/mod.rs

//! Configuration loading and validation for devproxy.
//!
//! Responsibilities:
//! - Define the TOML-backed data model and resolved settings (`model.rs`).
//! - Load the optional config file and merge CLI overrides (`loader.rs`).
//! - Apply defaults and validate (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{apply_cli_overrides, default_config_path, load_from_path, load_settings};
pub use model::{BackendSection, BuildSection, ProxySection, RawConfigFile, Settings, WatchSection};
pub use validate::{parse_listen, resolve_settings};
