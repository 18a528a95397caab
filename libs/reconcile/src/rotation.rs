//! Rotation cursors and their persistence.
//!
//! Each rotating category owns a cursor that selects the next owner in its
//! round-robin list. Cursors only move when a row is durably recorded, so
//! the store is written once per run, after the ledger append succeeds.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::RotationStoreError;

/// Persisted rotation file format version.
const STATE_VERSION: u32 = 1;

/// Per-category rotation cursors. Unknown categories read as 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RotationState {
    cursors: BTreeMap<String, u64>,
}

impl RotationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cursor for a category.
    pub fn cursor(&self, category: &str) -> u64 {
        self.cursors.get(category).copied().unwrap_or(0)
    }

    /// Advance a category by one step. Returns the new cursor.
    pub fn advance(&mut self, category: &str) -> u64 {
        let cursor = self.cursors.entry(category.to_string()).or_insert(0);
        *cursor = cursor.saturating_add(1);
        *cursor
    }

    /// Overwrite a cursor (operator reconciliation).
    pub fn set(&mut self, category: &str, cursor: u64) {
        self.cursors.insert(category.to_string(), cursor);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.cursors.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// How far each category moved relative to `base`.
    ///
    /// Only categories that moved forward are listed.
    pub fn advanced_since(&self, base: &RotationState) -> BTreeMap<String, u64> {
        self.cursors
            .iter()
            .filter_map(|(category, &cursor)| {
                let delta = cursor.saturating_sub(base.cursor(category));
                (delta > 0).then(|| (category.clone(), delta))
            })
            .collect()
    }

    /// Parse the legacy one-cursor-per-line counters file.
    ///
    /// Line `i` holds the cursor of `categories[i]`. A file with fewer lines
    /// than categories reads as all zeros; extra lines are ignored.
    pub fn from_legacy_counters(
        contents: &str,
        categories: &[String],
    ) -> Result<Self, RotationStoreError> {
        let lines: Vec<&str> = contents.lines().collect();
        let complete = lines.len() >= categories.len();
        let mut state = Self::new();

        for (index, category) in categories.iter().enumerate() {
            let cursor = match lines.get(index).map(|l| l.trim()) {
                Some(value) if complete => {
                    value.parse().map_err(|_| RotationStoreError::Legacy {
                        line: index + 1,
                        value: value.to_string(),
                    })?
                }
                _ => 0,
            };
            state.set(category, cursor);
        }

        Ok(state)
    }
}

/// Durable home of the rotation cursors.
pub trait RotationStore: Send + Sync {
    /// Load cursors. A missing or unreadable store yields all-zero cursors.
    fn load(&self) -> Result<RotationState, RotationStoreError>;

    /// Replace the stored cursors.
    fn save(&self, state: &RotationState) -> Result<(), RotationStoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRotation {
    version: u32,
    cursors: RotationState,
}

/// Rotation store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RotationStore for JsonFileStore {
    fn load(&self) -> Result<RotationState, RotationStoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No rotation file, starting at zero");
                return Ok(RotationState::default());
            }
            Err(e) => return Err(e.into()),
        };

        let persisted: PersistedRotation = match serde_json::from_str(&content) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Rotation file is malformed, starting at zero"
                );
                return Ok(RotationState::default());
            }
        };

        if persisted.version != STATE_VERSION {
            warn!(
                file_version = persisted.version,
                current_version = STATE_VERSION,
                "Rotation file version mismatch, starting at zero"
            );
            return Ok(RotationState::default());
        }

        info!(
            path = %self.path.display(),
            categories = persisted.cursors.cursors.len(),
            "Loaded rotation state"
        );

        Ok(persisted.cursors)
    }

    /// Write to a temp file and rename over the target.
    fn save(&self, state: &RotationState) -> Result<(), RotationStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let persisted = PersistedRotation {
            version: STATE_VERSION,
            cursors: state.clone(),
        };
        let content = serde_json::to_string_pretty(&persisted)?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &self.path)?;

        debug!(
            path = %self.path.display(),
            categories = state.cursors.len(),
            "Saved rotation state"
        );

        Ok(())
    }
}
