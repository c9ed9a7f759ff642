// src/fingerprint/rules.rs

use std::fmt;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Directory names skipped by default: vendored code, dependency managers
/// and generated assets.
pub const DEFAULT_IGNORE_DIRS: &[&str] = &["vendor", "node_modules", "bundler", "public", "assets"];

/// Default source-file extension.
pub const DEFAULT_EXTENSIONS: &[&str] = &["go"];

/// Compiled rules deciding which parts of the tree feed the fingerprint.
///
/// - Directories are skipped when their *name* starts with `.` or matches one
///   of the ignore globs (e.g. `"node_modules"`, `"build-*"`).
/// - Files are included when their name ends in `.<ext>` for one of the
///   configured extensions.
#[derive(Clone)]
pub struct TreeRules {
    ignore_set: GlobSet,
    ignore_patterns: Vec<String>,
    extensions: Vec<String>,
}

impl fmt::Debug for TreeRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeRules")
            .field("ignore", &self.ignore_patterns)
            .field("extensions", &self.extensions)
            .finish()
    }
}

impl TreeRules {
    pub fn new<I, S, E, T>(ignore: I, extensions: E) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        E: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let ignore_patterns: Vec<String> =
            ignore.into_iter().map(|s| s.as_ref().to_string()).collect();

        let mut builder = GlobSetBuilder::new();
        for pat in &ignore_patterns {
            let glob = Glob::new(pat).with_context(|| format!("invalid ignore pattern '{pat}'"))?;
            builder.add(glob);
        }
        let ignore_set = builder.build().context("compiling ignore patterns")?;

        let extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_string())
            .filter(|e| !e.is_empty())
            .collect();

        Ok(Self {
            ignore_set,
            ignore_patterns,
            extensions,
        })
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Whether the directory named `name` (and everything below it) is
    /// left out of the fingerprint. Never called for the walk root.
    pub fn skips_dir(&self, name: &str) -> bool {
        name.starts_with('.') || self.ignore_set.is_match(name)
    }

    /// Whether a regular file named `name` is a source file.
    pub fn includes_file(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| {
            name.len() > ext.len()
                && name.ends_with(ext.as_str())
                && name.as_bytes()[name.len() - ext.len() - 1] == b'.'
        })
    }
}
