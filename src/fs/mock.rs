// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(Vec<u8>),
    /// A file that shows up in listings but fails to open.
    Unreadable,
    Dir(Vec<String>), // child names, in insertion order
}

/// In-memory source tree rooted at `"."`.
///
/// Clones share the same tree, so a test can keep a handle and edit files
/// after giving a clone to the fingerprinter.
#[derive(Debug, Clone)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut files = HashMap::new();
        files.insert(PathBuf::from("."), MockEntry::Dir(Vec::new()));

        Self {
            files: Arc::new(Mutex::new(files)),
        }
    }

    /// Create or overwrite a file, creating parent directories as needed.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.insert(path.as_ref(), MockEntry::File(content.into()));
    }

    pub fn add_unreadable(&self, path: impl AsRef<Path>) {
        self.insert(path.as_ref(), MockEntry::Unreadable);
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut files = self.files.lock().unwrap();
        Self::ensure_dir(&mut files, path.as_ref());
    }

    fn insert(&self, path: &Path, entry: MockEntry) {
        let mut files = self.files.lock().unwrap();
        let parent = parent_or_root(path);
        Self::ensure_dir(&mut files, parent);
        Self::link_child(&mut files, parent, path);
        files.insert(path.to_path_buf(), entry);
    }

    fn ensure_dir(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        if files.contains_key(path) {
            return;
        }
        files.insert(path.to_path_buf(), MockEntry::Dir(Vec::new()));

        let parent = parent_or_root(path);
        if parent != path {
            Self::ensure_dir(files, parent);
            Self::link_child(files, parent, path);
        }
    }

    fn link_child(files: &mut HashMap<PathBuf, MockEntry>, parent: &Path, child: &Path) {
        let Some(name) = child.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        if let Some(MockEntry::Dir(children)) = files.get_mut(parent) {
            if !children.iter().any(|c| c == name) {
                children.push(name.to_string());
            }
        }
    }
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn parent_or_root(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

impl FileSystem for MockFileSystem {
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let files = self.files.lock().unwrap();
        match files.get(path) {
            Some(MockEntry::File(content)) => Ok(Box::new(Cursor::new(content.clone()))),
            Some(MockEntry::Unreadable) => Err(anyhow!("Permission denied: {:?}", path)),
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(
            self.files.lock().unwrap().get(path),
            Some(MockEntry::File(_) | MockEntry::Unreadable)
        )
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.files.lock().unwrap().get(path), Some(MockEntry::Dir(_)))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let files = self.files.lock().unwrap();
        match files.get(path) {
            Some(MockEntry::Dir(children)) => {
                Ok(children.iter().map(|name| path.join(name)).collect())
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_files_create_parent_dirs() {
        let fs = MockFileSystem::new();
        fs.add_file("./pkg/api/handler.go", b"package api");

        assert!(fs.is_dir(Path::new("./pkg")));
        assert!(fs.is_dir(Path::new("./pkg/api")));
        assert!(fs.is_file(Path::new("./pkg/api/handler.go")));
        assert_eq!(
            fs.read_dir(Path::new(".")).unwrap(),
            vec![PathBuf::from("./pkg")]
        );
    }

    #[test]
    fn overwrite_keeps_single_listing() {
        let fs = MockFileSystem::new();
        fs.add_file("./main.go", b"v1");
        fs.add_file("./main.go", b"v2");

        assert_eq!(fs.read_dir(Path::new(".")).unwrap().len(), 1);
        let mut content = String::new();
        fs.open_read(Path::new("./main.go"))
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "v2");
    }

    #[test]
    fn unreadable_file_fails_to_open() {
        let fs = MockFileSystem::new();
        fs.add_unreadable("./secret.go");
        assert!(fs.is_file(Path::new("./secret.go")));
        assert!(fs.open_read(Path::new("./secret.go")).is_err());
    }
}
