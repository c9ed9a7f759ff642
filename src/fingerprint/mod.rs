// src/fingerprint/mod.rs

//! Source-tree fingerprinting.
//!
//! The fingerprint is a blake3 digest over the raw bytes of every source
//! file, fed in walk order. Walk order is fixed (entries sorted by name), so
//! the same tree always yields the same digest. Hashing contents rather than
//! mtimes means a `touch` does not cause a rebuild and an edit always does.

pub mod rules;

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::{debug, trace};

use crate::errors::RefreshError;
use crate::fs::FileSystem;

pub use rules::{TreeRules, DEFAULT_EXTENSIONS, DEFAULT_IGNORE_DIRS};

/// Digest of the source tree. Only ever compared for equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 12 hex chars; enough to tell cycles apart in logs.
    pub fn short(&self) -> String {
        let mut s = self.to_string();
        s.truncate(12);
        s
    }
}

impl From<blake3::Hash> for Fingerprint {
    fn from(hash: blake3::Hash) -> Self {
        Fingerprint(*hash.as_bytes())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// Walks a project root and fingerprints its source files.
///
/// Cheap to clone; clones share the filesystem handle.
#[derive(Debug, Clone)]
pub struct TreeFingerprinter {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    rules: TreeRules,
}

impl TreeFingerprinter {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>, rules: TreeRules) -> Self {
        Self {
            fs,
            root: root.into(),
            rules,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute the fingerprint synchronously.
    ///
    /// Any I/O error aborts the walk; no partial digest is returned.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        let mut hasher = Hasher::new();
        let mut files = 0usize;
        self.walk_dir(&self.root, &mut hasher, &mut files)?;

        let fp = Fingerprint::from(hasher.finalize());
        debug!(root = ?self.root, files, fingerprint = %fp.short(), "fingerprinted source tree");
        Ok(fp)
    }

    /// Compute the fingerprint on the blocking thread pool.
    pub async fn fingerprint_async(&self) -> std::result::Result<Fingerprint, RefreshError> {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.fingerprint()).await {
            Ok(Ok(fp)) => Ok(fp),
            Ok(Err(e)) => Err(RefreshError::Fingerprint(format!("{e:#}"))),
            Err(join) => Err(RefreshError::Fingerprint(join.to_string())),
        }
    }

    fn walk_dir(&self, dir: &Path, hasher: &mut Hasher, files: &mut usize) -> Result<()> {
        let mut entries = self.fs.read_dir(dir)?;
        entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        for path in entries {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
                continue;
            };

            if self.fs.is_dir(&path) {
                if self.rules.skips_dir(&name) {
                    trace!(dir = ?path, "skipping directory");
                    continue;
                }
                self.walk_dir(&path, hasher, files)?;
            } else if self.fs.is_file(&path) && self.rules.includes_file(&name) {
                self.hash_file(&path, hasher)?;
                *files += 1;
            }
        }

        Ok(())
    }

    fn hash_file(&self, path: &Path, hasher: &mut Hasher) -> Result<()> {
        let mut reader = self.fs.open_read(path)?;
        let mut buf = [0u8; 8192];
        loop {
            let n = reader
                .read(&mut buf)
                .with_context(|| format!("reading {:?} for fingerprint", path))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn fingerprinter(fs: &MockFileSystem) -> TreeFingerprinter {
        let rules = TreeRules::new(DEFAULT_IGNORE_DIRS, DEFAULT_EXTENSIONS).unwrap();
        TreeFingerprinter::new(Arc::new(fs.clone()), ".", rules)
    }

    fn sample_tree() -> MockFileSystem {
        let fs = MockFileSystem::new();
        fs.add_file("./main.go", b"package main\nfunc main() {}\n");
        fs.add_file("./handlers/users.go", b"package handlers\n");
        fs.add_file("./README.md", b"# app");
        fs
    }

    #[test]
    fn identical_trees_have_identical_fingerprints() {
        let a = sample_tree();
        let b = MockFileSystem::new();
        // Different insertion order, same content.
        b.add_file("./README.md", b"# app");
        b.add_file("./handlers/users.go", b"package handlers\n");
        b.add_file("./main.go", b"package main\nfunc main() {}\n");

        assert_eq!(
            fingerprinter(&a).fingerprint().unwrap(),
            fingerprinter(&b).fingerprint().unwrap()
        );
    }

    #[test]
    fn editing_a_source_file_changes_the_fingerprint() {
        let fs = sample_tree();
        let fp = fingerprinter(&fs);
        let before = fp.fingerprint().unwrap();

        fs.add_file("./handlers/users.go", b"package handlers\n// edited\n");
        assert_ne!(before, fp.fingerprint().unwrap());
    }

    #[test]
    fn non_source_files_are_ignored() {
        let fs = sample_tree();
        let fp = fingerprinter(&fs);
        let before = fp.fingerprint().unwrap();

        fs.add_file("./README.md", b"# app, now with docs");
        fs.add_file("./notes.txt", b"todo");
        assert_eq!(before, fp.fingerprint().unwrap());
    }

    #[test]
    fn hidden_and_ignored_directories_are_ignored() {
        let fs = sample_tree();
        let fp = fingerprinter(&fs);
        let before = fp.fingerprint().unwrap();

        fs.add_file("./.git/hooks/pre-commit.go", b"package hooks");
        fs.add_file("./vendor/github.com/lib/pq/conn.go", b"package pq");
        fs.add_file("./node_modules/x/y.go", b"package y");
        fs.add_file("./assets/gen.go", b"package assets");
        assert_eq!(before, fp.fingerprint().unwrap());
    }

    #[test]
    fn hidden_root_is_still_walked() {
        let fs = MockFileSystem::new();
        fs.add_file("./.project/main.go", b"package main");
        let rules = TreeRules::new(DEFAULT_IGNORE_DIRS, DEFAULT_EXTENSIONS).unwrap();
        let fp = TreeFingerprinter::new(Arc::new(fs.clone()), "./.project", rules);

        let before = fp.fingerprint().unwrap();
        fs.add_file("./.project/main.go", b"package main // v2");
        assert_ne!(before, fp.fingerprint().unwrap());
    }

    #[test]
    fn empty_tree_has_stable_fingerprint() {
        let a = MockFileSystem::new();
        let b = MockFileSystem::new();
        b.add_file("./docs/index.md", b"hello");
        assert_eq!(
            fingerprinter(&a).fingerprint().unwrap(),
            fingerprinter(&b).fingerprint().unwrap()
        );
    }

    #[test]
    fn empty_directories_do_not_count() {
        let fs = sample_tree();
        let fp = fingerprinter(&fs);
        let before = fp.fingerprint().unwrap();

        fs.add_dir("./internal/empty");
        assert_eq!(before, fp.fingerprint().unwrap());
    }

    #[test]
    fn unreadable_source_file_aborts_the_walk() {
        let fs = sample_tree();
        fs.add_unreadable("./handlers/admin.go");
        let err = fingerprinter(&fs).fingerprint().unwrap_err();
        assert!(format!("{err:#}").contains("admin.go"));
    }

    #[tokio::test]
    async fn async_errors_map_to_fingerprint_error() {
        let fs = sample_tree();
        fs.add_unreadable("./broken.go");
        match fingerprinter(&fs).fingerprint_async().await {
            Err(RefreshError::Fingerprint(msg)) => assert!(msg.contains("broken.go")),
            other => panic!("expected fingerprint error, got {other:?}"),
        }
    }

    #[test]
    fn display_is_lowercase_hex() {
        let fp = fingerprinter(&sample_tree()).fingerprint().unwrap();
        let s = fp.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp.short(), s[..12]);
    }
}
