// src/fs/mod.rs

//! Filesystem access used by the fingerprinter.
//!
//! Going through a trait lets tests describe a source tree in memory with
//! [`mock::MockFileSystem`] instead of touching disk.

use std::fmt::Debug;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub mod mock;

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>>;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;

    /// Return the entries of a directory as full paths.
    ///
    /// No ordering is promised; callers that need a stable order sort.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = fs::File::open(path).with_context(|| format!("opening file {:?}", path))?;
        Ok(Box::new(file))
    }

    // Symlinked files count as files; symlinked directories are never
    // descended into (see `is_dir`).
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|m| m.file_type().is_dir())
            .unwrap_or(false)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry.with_context(|| format!("reading entry of dir {:?}", path))?;
            entries.push(entry.path());
        }
        Ok(entries)
    }
}
