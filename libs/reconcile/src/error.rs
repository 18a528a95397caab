//! Error types for reconciliation runs.

use thiserror::Error;

use crate::event::SourceId;
use crate::rotation::RotationState;

/// Errors raised while constructing an eligible event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The subject id was empty after trimming.
    #[error("eligible event is missing a subject id")]
    MissingSubject,

    /// The category was empty after trimming.
    #[error("eligible event for subject {0} is missing a category")]
    MissingCategory(String),
}

/// Errors raised while building an assignment policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// A rotating rule has nobody to rotate through.
    #[error("rotating category {0:?} has an empty owner list")]
    EmptyRotation(String),

    /// A rule names a blank owner.
    #[error("category {0:?} names a blank owner")]
    BlankOwner(String),

    /// A source override names a blank owner.
    #[error("source override for {0:?} names a blank owner")]
    BlankOverride(String),
}

/// Errors reported by an event provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The requested source, group or category does not exist upstream.
    ///
    /// The engine treats this as an empty result.
    #[error("not found: {0}")]
    NotFound(String),

    /// The provider could not be reached or refused the request.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider answered with something we could not interpret.
    #[error("invalid provider response: {0}")]
    Invalid(String),
}

/// Errors reported by a ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Network, auth or quota failure.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger refused the request.
    #[error("ledger rejected request: {0}")]
    Rejected(String),

    /// The ledger answered with something we could not interpret.
    #[error("malformed ledger response: {0}")]
    Malformed(String),
}

/// Errors from rotation state persistence.
#[derive(Debug, Error)]
pub enum RotationStoreError {
    #[error("rotation store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rotation state serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A legacy counters file held a non-numeric line.
    #[error("legacy counters line {line} is not a cursor: {value:?}")]
    Legacy { line: usize, value: String },
}

/// Fatal errors from a reconciliation run.
///
/// Every variant except [`RunError::RotationPersist`] happens before the
/// ledger is touched, so retrying the run is safe.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to load rotation state")]
    RotationLoad(#[source] RotationStoreError),

    #[error("failed to list sources for group {group}")]
    Sources {
        group: String,
        #[source]
        source: ProviderError,
    },

    #[error("failed to fetch {category:?} events from source {source_id}")]
    Provider {
        source_id: SourceId,
        category: String,
        #[source]
        source: ProviderError,
    },

    #[error("failed to read ledger snapshot")]
    LedgerRead(#[source] LedgerError),

    #[error("failed to append {rows} rows to the ledger; rotation state left unchanged")]
    LedgerAppend {
        rows: usize,
        #[source]
        source: LedgerError,
    },

    /// Rows are in the ledger but the cursors did not move.
    ///
    /// Re-running will not fix this: the rows now dedup away. An operator has
    /// to write `intended` into the store by hand.
    #[error(
        "{rows_appended} rows were recorded but rotation state was not saved; \
         cursors need manual reconciliation"
    )]
    RotationPersist {
        rows_appended: usize,
        intended: RotationState,
        #[source]
        source: RotationStoreError,
    },
}

impl RunError {
    /// True when the ledger already holds this run's rows.
    pub fn needs_operator(&self) -> bool {
        matches!(self, Self::RotationPersist { .. })
    }
}
