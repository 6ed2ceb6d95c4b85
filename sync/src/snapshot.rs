//! Snapshot model: one file tree as an ordered set of typed entries
//!
//! A snapshot is kept in canonical order. Paths are compared component by
//! component; a component ranks as a directory unless it is the final
//! component of a file, and directories sort before files at the same level.
//! Every directory therefore precedes its descendants, and reversing the
//! order visits children before their parents.
//!
//! The persisted text form has one entry per line:
//!
//! ```text
//! D,docs,
//! F,docs/readme.txt,3f79bb7b435b05321651daefd374cdc681dc06faa65e374e38337b88ca046dea
//! ```

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Directory,
    File,
}

impl EntryKind {
    fn code(self) -> &'static str {
        match self {
            EntryKind::Directory => "D",
            EntryKind::File => "F",
        }
    }
}

/// One node of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    path: String,
    kind: EntryKind,
    fingerprint: Option<String>,
}

impl Entry {
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            fingerprint: None,
        }
    }

    pub fn file(path: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            fingerprint: Some(fingerprint.into()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Final path component
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn parent(&self) -> Option<&str> {
        parent_path(&self.path)
    }

    fn components(&self) -> impl Iterator<Item = (u8, &str)> + '_ {
        let count = self.path.split('/').count();
        let is_file = self.kind == EntryKind::File;
        self.path.split('/').enumerate().map(move |(index, name)| {
            let rank = u8::from(is_file && index + 1 == count);
            (rank, name)
        })
    }

    /// Compare two entries in canonical order, ignoring fingerprints
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.components().cmp(other.components())
    }

    /// Parse one line of the text format; `line_number` is 1-based
    pub fn parse_line(line: &str, line_number: usize) -> Result<Self> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        let (kind, rest) = line
            .split_once(',')
            .ok_or_else(|| SyncError::parse_error(line_number, "expected 'kind,path,fingerprint'"))?;
        let (path, fingerprint) = rest
            .rsplit_once(',')
            .ok_or_else(|| SyncError::parse_error(line_number, "missing fingerprint field"))?;

        validate_path(path).map_err(|message| SyncError::parse_error(line_number, message))?;

        match kind {
            "D" => match fingerprint {
                "" | "None" => Ok(Entry::directory(path)),
                _ => Err(SyncError::parse_error(
                    line_number,
                    format!("directory '{}' carries a fingerprint", path),
                )),
            },
            "F" => {
                if fingerprint.is_empty() {
                    return Err(SyncError::parse_error(
                        line_number,
                        format!("file '{}' has no fingerprint", path),
                    ));
                }
                Ok(Entry::file(path, fingerprint))
            }
            other => Err(SyncError::parse_error(
                line_number,
                format!("unknown entry kind '{}'", other),
            )),
        }
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical_cmp(other)
            .then_with(|| self.fingerprint.cmp(&other.fingerprint))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.kind.code(),
            self.path,
            self.fingerprint.as_deref().unwrap_or("")
        )
    }
}

fn validate_path(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() {
        return Err("empty path".to_string());
    }
    if path
        .split('/')
        .any(|component| component.is_empty() || component == "." || component == "..")
    {
        return Err(format!("invalid path '{}'", path));
    }
    Ok(())
}

/// Parent of a slash-separated relative path, `None` at top level
pub fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Proper ancestors of a path, nearest first
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(parent_path(path), |p| parent_path(p))
}

/// A point-in-time tree state in canonical order with unique paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<Entry>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from entries in any order; for a repeated path the last entry wins
    pub fn from_entries(entries: impl IntoIterator<Item = Entry>) -> Self {
        let mut by_path: HashMap<String, Entry> = HashMap::new();
        for entry in entries {
            by_path.insert(entry.path.clone(), entry);
        }

        let mut entries: Vec<Entry> = by_path.into_values().collect();
        entries.sort();
        Self { entries }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Parse the persisted text form
    pub fn parse(text: &str) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for (index, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let entry = Entry::parse_line(line, index + 1)?;
            if !seen.insert(entry.path.clone()) {
                return Err(SyncError::parse_error(
                    index + 1,
                    format!("duplicate path '{}'", entry.path),
                ));
            }
            entries.push(entry);
        }

        entries.sort();
        Ok(Self { entries })
    }

    /// Render the persisted text form, one `\n`-terminated line per entry
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    /// Check that no file has another file as an ancestor
    pub fn validate(&self) -> Result<()> {
        let kinds: HashMap<&str, EntryKind> =
            self.entries.iter().map(|e| (e.path.as_str(), e.kind)).collect();

        for entry in &self.entries {
            if let Some(file_ancestor) =
                ancestors(&entry.path).find(|a| kinds.get(a) == Some(&EntryKind::File))
            {
                return Err(SyncError::conflict_error(
                    entry.path.clone(),
                    format!("ancestor '{}' is a file", file_ancestor),
                ));
            }
        }
        Ok(())
    }
}

impl FromIterator<Entry> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        Self::from_entries(iter)
    }
}

impl IntoIterator for Snapshot {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
