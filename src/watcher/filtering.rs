//! Path filtering for watcher operations
//!
//! Decides which directories are registered during recursive enumeration and
//! which raw records are dropped before normalization.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

use crate::config::{Config, normalize_extension};
use crate::error::{Result, WatchError};

/// Exclusion rules derived from a config snapshot
#[derive(Debug, Clone)]
pub struct PathFilter {
    exclusions: GlobSet,
    include_hidden: bool,
}

impl PathFilter {
    pub fn new(patterns: &[String], include_hidden: bool) -> Result<Self> {
        Ok(Self {
            exclusions: build_exclusion_set(patterns)?,
            include_hidden,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.exclude_patterns, config.include_hidden)
    }

    /// True when a directory should be skipped, subtree included, during enumeration.
    ///
    /// `relative` is the directory's path below the watch root.
    pub fn skip_directory(&self, relative: &Path) -> bool {
        (!self.include_hidden && is_hidden(relative)) || self.matches_exclusion(relative)
    }

    /// True when a raw record for `path` should never reach the normalizer.
    ///
    /// Only the part of `path` below `root` is tested, so a root that itself
    /// lives under a dot-directory or a directory matching a pattern is still watched.
    pub fn is_excluded(&self, path: &Path, root: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        if self.exclusions.is_match(relative) {
            return true;
        }
        relative.components().any(|component| {
            let name = Path::new(component.as_os_str());
            (!self.include_hidden && is_hidden(name)) || self.exclusions.is_match(name)
        })
    }

    fn matches_exclusion(&self, relative: &Path) -> bool {
        self.exclusions.is_match(relative) || self.matches_name(relative)
    }

    fn matches_name(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.exclusions.is_match(Path::new(name)))
            .unwrap_or(false)
    }
}

/// Compile exclusion globs. Each pattern is tested against the root-relative path and each name in it.
pub fn build_exclusion_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| WatchError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| WatchError::InvalidPattern {
        pattern: patterns.join(", "),
        source,
    })
}

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.') && name != "." && name != "..")
        .unwrap_or(false)
}

/// Case-insensitive extension allow-list check. An empty list allows everything.
pub fn matches_extension(path: &Path, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = normalize_extension(ext);
    allowed.iter().any(|a| normalize_extension(a) == ext)
}
