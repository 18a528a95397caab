//! Roster reconciliation engine.
//!
//! Assigns an owner to every eligible event pulled from an upstream source and
//! records each `(subject, category)` pair exactly once in an append-only
//! ledger. Key concepts:
//!
//! - **Eligible event**: a subject that completed a tracked category.
//! - **Assignment policy**: category -> owner, fixed or round-robin, with
//!   per-source overrides.
//! - **Rotation state**: one durable cursor per rotating category.
//! - **Ledger snapshot**: the composite keys already recorded, read once.
//!
//! # Invariants
//!
//! - Re-running over overlapping windows never records a key twice
//! - A cursor moves by exactly one per recorded row of its category
//! - Cursors never move unless the ledger append succeeded

mod dedup;
mod engine;
mod error;
mod event;
mod ledger;
mod policy;
mod provider;
mod rotation;

pub use dedup::{filter_new, DedupOutcome, LedgerSnapshot};
pub use engine::{PlannedRow, ReconciliationEngine, RunConfig, RunPlan, RunReport, RunStats};
pub use error::{
    EventError, LedgerError, PolicyError, ProviderError, RotationStoreError, RunError,
};
pub use event::{
    DedupKey, EligibleEvent, LedgerRow, SourceId, LEDGER_COLUMNS, LEDGER_DATE_FORMAT,
    MISSING_FIELD,
};
pub use ledger::Ledger;
pub use policy::{
    AssignmentPolicy, CategoryClass, ConditionalChoice, OwnerResolution, OwnerScope, PolicyConfig,
    PolicyRule, ResolvedBy, ResolvedEvent, RuleConfig, UNKNOWN_OWNER,
};
pub use provider::{EventProvider, SourceGroup};
pub use rotation::{JsonFileStore, RotationState, RotationStore};
