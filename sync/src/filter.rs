//! Exclusion filtering of snapshots using globset
//!
//! Patterns match from the right, like relative glob matching on paths:
//! `build` matches `build` and `src/build`, `*.o` matches `x.o` and
//! `build/x.o`, and `*` never crosses a `/`. A pattern starting with `/`
//! must match the whole path. Entries below an excluded path are excluded
//! as well.

use std::collections::HashSet;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::snapshot::{ancestors, Snapshot};

/// Exclusion filter options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterOptions {
    /// Patterns to exclude
    pub exclude_patterns: Vec<String>,
    /// Case sensitive matching
    pub case_sensitive: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            case_sensitive: true,
        }
    }
}

impl FilterOptions {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            exclude_patterns: patterns.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Add a pattern unless it is already present
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        if !self.exclude_patterns.contains(&pattern) {
            self.exclude_patterns.push(pattern);
        }
        self
    }
}

/// Removes excluded entries from snapshots
pub struct ExclusionFilter {
    relative_set: GlobSet,
    anchored_set: GlobSet,
    options: FilterOptions,
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        Self {
            relative_set: GlobSet::empty(),
            anchored_set: GlobSet::empty(),
            options: FilterOptions::default(),
        }
    }
}

impl ExclusionFilter {
    /// Create a new exclusion filter with the given options
    pub fn new(options: FilterOptions) -> Result<Self> {
        let mut relative = Vec::new();
        let mut anchored = Vec::new();

        for pattern in &options.exclude_patterns {
            let trimmed = pattern.trim_end_matches('/');
            match trimmed.strip_prefix('/') {
                Some(rest) => anchored.push(rest),
                None => relative.push(trimmed),
            }
        }

        Ok(Self {
            relative_set: Self::build_globset(&relative, options.case_sensitive)?,
            anchored_set: Self::build_globset(&anchored, options.case_sensitive)?,
            options,
        })
    }

    /// Build a globset from patterns
    fn build_globset(patterns: &[&str], case_sensitive: bool) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            if pattern.is_empty() {
                return Err(SyncError::FilterPattern("Empty exclusion pattern".to_string()));
            }

            let compiled_glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(|e| {
                    SyncError::FilterPattern(format!("Failed to compile glob '{}': {}", pattern, e))
                })?;

            builder.add(compiled_glob);
        }

        builder.build().map_err(|e| {
            SyncError::FilterPattern(format!("Failed to build globset: {}", e))
        })
    }

    /// Whether `path` itself matches a pattern, ignoring its ancestors
    pub fn is_match(&self, path: &str) -> bool {
        if self.anchored_set.is_match(path) {
            return true;
        }
        if self.relative_set.is_match(path) {
            return true;
        }
        path.match_indices('/')
            .any(|(index, _)| self.relative_set.is_match(&path[index + 1..]))
    }

    /// Whether `path` or any of its ancestors matches a pattern
    pub fn is_excluded(&self, path: &str) -> bool {
        self.is_match(path) || ancestors(path).any(|a| self.is_match(a))
    }

    /// Snapshot without the excluded entries, in the same order
    pub fn apply(&self, snapshot: &Snapshot) -> Snapshot {
        if self.options.exclude_patterns.is_empty() {
            return snapshot.clone();
        }

        let mut excluded: HashSet<&str> = HashSet::new();
        let mut kept = Vec::with_capacity(snapshot.len());

        for entry in snapshot {
            let path = entry.path();
            let under_excluded = ancestors(path).any(|a| excluded.contains(a));
            if under_excluded || self.is_excluded(path) {
                excluded.insert(path);
            } else {
                kept.push(entry.clone());
            }
        }

        Snapshot::from_entries(kept)
    }

    /// Get the filter options
    pub fn options(&self) -> &FilterOptions {
        &self.options
    }
}
