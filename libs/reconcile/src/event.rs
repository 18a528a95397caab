//! Eligible events and the ledger rows derived from them.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// Placeholder for optional fields the provider could not supply.
pub const MISSING_FIELD: &str = "N/A";

/// Date format of the ledger's first column.
pub const LEDGER_DATE_FORMAT: &str = "%Y-%m-%d";

/// Number of columns in a ledger row.
pub const LEDGER_COLUMNS: usize = 6;

const SUBJECT_COLUMN: usize = 2;
const CATEGORY_COLUMN: usize = 5;

/// A concrete source (course) events are pulled from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for SourceId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite uniqueness key of a ledger row: `(subject_id, category)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DedupKey {
    subject_id: String,
    category: String,
}

impl DedupKey {
    /// Build a key. Surrounding whitespace is not significant.
    pub fn new(subject_id: &str, category: &str) -> Self {
        Self {
            subject_id: subject_id.trim().to_string(),
            category: category.trim().to_string(),
        }
    }

    /// Extract the key from a raw ledger row.
    ///
    /// Rows too short to carry a category, or with a blank subject or
    /// category, have no key.
    pub fn from_cells(cells: &[String]) -> Option<Self> {
        let subject_id = cells.get(SUBJECT_COLUMN)?.trim();
        let category = cells.get(CATEGORY_COLUMN)?.trim();
        if subject_id.is_empty() || category.is_empty() {
            return None;
        }
        Some(Self::new(subject_id, category))
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.subject_id, self.category)
    }
}

/// One student's qualifying completion of a tracked milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibleEvent {
    subject_id: String,
    display_name: String,
    contact_address: String,
    category: String,
    source_id: SourceId,
    observed_at: DateTime<Utc>,
}

impl EligibleEvent {
    /// Create an event. Subject and category must be non-blank.
    pub fn new(
        subject_id: impl Into<String>,
        category: impl Into<String>,
        source_id: SourceId,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        let subject_id = subject_id.into().trim().to_string();
        let category = category.into().trim().to_string();

        if subject_id.is_empty() {
            return Err(EventError::MissingSubject);
        }
        if category.is_empty() {
            return Err(EventError::MissingCategory(subject_id));
        }

        Ok(Self {
            subject_id,
            display_name: MISSING_FIELD.to_string(),
            contact_address: MISSING_FIELD.to_string(),
            category,
            source_id,
            observed_at,
        })
    }

    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = or_missing(name);
        self
    }

    pub fn with_contact_address(mut self, address: Option<String>) -> Self {
        self.contact_address = or_missing(address);
        self
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn contact_address(&self) -> &str {
        &self.contact_address
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn key(&self) -> DedupKey {
        DedupKey::new(&self.subject_id, &self.category)
    }
}

fn or_missing(value: Option<String>) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| MISSING_FIELD.to_string())
}

/// A durably recorded assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub recorded_date: NaiveDate,
    pub display_name: String,
    pub subject_id: String,
    pub contact_address: String,
    pub owner: String,
    pub category: String,
}

impl LedgerRow {
    /// Materialize the row for an event and its resolved owner.
    pub fn from_event(event: &EligibleEvent, owner: &str, recorded_date: NaiveDate) -> Self {
        Self {
            recorded_date,
            display_name: event.display_name.clone(),
            subject_id: event.subject_id.clone(),
            contact_address: event.contact_address.clone(),
            owner: owner.to_string(),
            category: event.category.clone(),
        }
    }

    pub fn key(&self) -> DedupKey {
        DedupKey::new(&self.subject_id, &self.category)
    }

    /// Cells in ledger column order (A..F).
    pub fn to_cells(&self) -> Vec<String> {
        vec![
            self.recorded_date.format(LEDGER_DATE_FORMAT).to_string(),
            self.display_name.clone(),
            self.subject_id.clone(),
            self.contact_address.clone(),
            self.owner.clone(),
            self.category.clone(),
        ]
    }
}
