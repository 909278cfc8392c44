//! Type definitions for raw change records and semantic events
//!
//! Raw records are what the watch backend hands us; semantic events are what
//! subscribers receive after filtering, debounce and move detection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use crate::error::WatchError;

/// Bitmask of raw operations reported for a path.
///
/// A single record can carry several bits (for example a create that was
/// coalesced with its first write).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChangeOp(u8);

impl ChangeOp {
    pub const CREATE: ChangeOp = ChangeOp(1);
    pub const WRITE: ChangeOp = ChangeOp(1 << 1);
    pub const REMOVE: ChangeOp = ChangeOp(1 << 2);
    pub const RENAME: ChangeOp = ChangeOp(1 << 3);
    pub const CHMOD: ChangeOp = ChangeOp(1 << 4);

    const NAMES: [(ChangeOp, &'static str); 5] = [
        (ChangeOp::CREATE, "CREATE"),
        (ChangeOp::WRITE, "WRITE"),
        (ChangeOp::REMOVE, "REMOVE"),
        (ChangeOp::RENAME, "RENAME"),
        (ChangeOp::CHMOD, "CHMOD"),
    ];

    pub const fn empty() -> Self {
        ChangeOp(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`. The empty op is never contained.
    pub const fn contains(self, other: ChangeOp) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl BitOr for ChangeOp {
    type Output = ChangeOp;

    fn bitor(self, rhs: ChangeOp) -> ChangeOp {
        ChangeOp(self.0 | rhs.0)
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (op, name) in Self::NAMES {
            if self.contains(op) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Unprocessed notification from the watch backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChangeRecord {
    pub path: PathBuf,
    pub op: ChangeOp,
}

impl RawChangeRecord {
    pub fn new(path: impl Into<PathBuf>, op: ChangeOp) -> Self {
        Self {
            path: path.into(),
            op,
        }
    }
}

/// Kinds of semantic events delivered to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Modify,
    Delete,
    Rename,
    Move,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Create,
        EventKind::Modify,
        EventKind::Delete,
        EventKind::Rename,
        EventKind::Move,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Modify => "modify",
            EventKind::Delete => "delete",
            EventKind::Rename => "rename",
            EventKind::Move => "move",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(EventKind::Create),
            "modify" => Ok(EventKind::Modify),
            "delete" => Ok(EventKind::Delete),
            "rename" => Ok(EventKind::Rename),
            "move" => Ok(EventKind::Move),
            other => Err(WatchError::Config(format!("unknown event kind '{}'", other))),
        }
    }
}

/// Normalized event handed to subscribers. Never mutated after construction.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticEvent {
    pub path: PathBuf,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    /// Best-effort size in bytes, 0 when the path could not be stat'ed
    pub size: u64,
    pub is_dir: bool,
    /// Source path when a delete/create pair was folded into a move
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moved_from: Option<PathBuf>,
    #[serde(skip)]
    pub(crate) detected_at: Instant,
}

impl SemanticEvent {
    pub fn new(path: impl Into<PathBuf>, kind: EventKind, size: u64, is_dir: bool) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp: Utc::now(),
            size,
            is_dir,
            moved_from: None,
            detected_at: Instant::now(),
        }
    }

    pub(crate) fn with_source(mut self, source: Option<PathBuf>) -> Self {
        self.moved_from = source;
        self
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for SemanticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.moved_from {
            Some(from) => write!(
                f,
                "{} {} -> {}",
                self.kind,
                from.display(),
                self.path.display()
            ),
            None => write!(f, "{} {}", self.kind, self.path.display()),
        }
    }
}

/// Delivery priority per event kind. Lower numbers are delivered first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, u8>", into = "BTreeMap<String, u8>")]
pub struct PriorityMap(BTreeMap<EventKind, u8>);

impl PriorityMap {
    pub fn new(entries: impl IntoIterator<Item = (EventKind, u8)>) -> Self {
        Self(entries.into_iter().collect())
    }

    /// Priority for `kind`. Kinds missing from an override sort after everything else.
    pub fn priority(&self, kind: EventKind) -> u8 {
        self.0.get(&kind).copied().unwrap_or(u8::MAX)
    }
}

impl Default for PriorityMap {
    fn default() -> Self {
        Self::new([
            (EventKind::Delete, 1),
            (EventKind::Create, 2),
            (EventKind::Modify, 3),
            (EventKind::Move, 4),
            (EventKind::Rename, 5),
        ])
    }
}

impl TryFrom<BTreeMap<String, u8>> for PriorityMap {
    type Error = WatchError;

    fn try_from(raw: BTreeMap<String, u8>) -> Result<Self, Self::Error> {
        let mut entries = BTreeMap::new();
        for (name, priority) in raw {
            entries.insert(name.parse::<EventKind>()?, priority);
        }
        Ok(Self(entries))
    }
}

impl From<PriorityMap> for BTreeMap<String, u8> {
    fn from(map: PriorityMap) -> Self {
        map.0
            .into_iter()
            .map(|(kind, priority)| (kind.as_str().to_string(), priority))
            .collect()
    }
}
