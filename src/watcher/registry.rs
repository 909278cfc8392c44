//! Registry of watched paths
//!
//! Tracks exactly the set of paths the watch backend holds. The backend
//! watches every directory non-recursively, so a recursive registration
//! expands into one entry per directory in the subtree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, WatchError};
use crate::watcher::filtering::PathFilter;

/// A directory or file under observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedPath {
    pub path: PathBuf,
    pub recursive: bool,
    /// The path originally passed to `add_path` that produced this entry
    pub root: PathBuf,
}

#[derive(Debug, Default)]
pub struct PathRegistry {
    paths: RwLock<BTreeMap<PathBuf, WatchedPath>>,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: WatchedPath) {
        debug!("Registering watched path {}", entry.path.display());
        self.paths
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.path.clone(), entry);
    }

    pub fn remove(&self, path: &Path) -> Option<WatchedPath> {
        self.paths
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Option<WatchedPath> {
        self.paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.paths.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of every watched path
    pub fn list_paths(&self) -> Vec<PathBuf> {
        self.paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn entries(&self) -> Vec<WatchedPath> {
        self.paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Paths that go away when `path` is removed: the path itself plus every
    /// entry a recursive registration of `path` produced.
    pub fn removal_set(&self, path: &Path) -> Vec<PathBuf> {
        self.paths
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entry| entry.path == path || (entry.root == path && entry.path.starts_with(path)))
            .map(|entry| entry.path.clone())
            .collect()
    }

    /// Registration root responsible for a record at `path`.
    ///
    /// Records arrive for entries inside watched directories, so the parent
    /// lookup is the common case. Falls back to the parent itself for records
    /// that outlived their registration.
    pub fn root_for(&self, path: &Path) -> PathBuf {
        let paths = self.paths.read().unwrap_or_else(PoisonError::into_inner);
        path.ancestors()
            .find_map(|ancestor| paths.get(ancestor).map(|entry| entry.root.clone()))
            .unwrap_or_else(|| path.parent().unwrap_or(path).to_path_buf())
    }

    /// Nearest watched directory above `path` that was registered recursively
    pub fn recursive_parent(&self, path: &Path) -> Option<WatchedPath> {
        let parent = path.parent()?;
        self.get(parent).filter(|entry| entry.recursive)
    }
}

/// Resolve a user supplied path to the absolute form the registry stores
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(WatchError::PathNotFound(path.to_path_buf()));
    }
    Ok(path.canonicalize()?)
}

/// Every path a registration of `root` must watch.
///
/// Non-recursive registrations and plain files yield just the root. Recursive
/// directory registrations walk the subtree, pruning skipped directories
/// together with everything beneath them.
pub fn enumerate(root: &Path, recursive: bool, filter: &PathFilter) -> Result<Vec<PathBuf>> {
    if !recursive || !root.is_dir() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut targets = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !filter.skip_directory(entry.path().strip_prefix(root).unwrap_or(entry.path()))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // Unreadable subdirectories are skipped, the root must be readable
                if e.depth() == 0 {
                    return Err(WatchError::Io(std::io::Error::other(e.to_string())));
                }
                debug!("Skipping unreadable entry during enumeration: {}", e);
                continue;
            }
        };
        if entry.file_type().is_dir() {
            targets.push(entry.into_path());
        }
    }

    Ok(targets)
}
