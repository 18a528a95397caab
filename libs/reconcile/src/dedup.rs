//! Composite-key deduplication against the ledger snapshot.

use std::collections::HashSet;

use tracing::debug;

use crate::event::DedupKey;

/// Keys already recorded in the ledger, read once per run.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    keys: HashSet<DedupKey>,
    rows: usize,
    ignored: usize,
}

impl LedgerSnapshot {
    /// Build a snapshot from raw ledger rows.
    ///
    /// Rows without a subject or category cell cannot collide with anything
    /// and are only counted.
    pub fn from_raw(rows: &[Vec<String>]) -> Self {
        let mut keys = HashSet::with_capacity(rows.len());
        let mut ignored = 0;

        for row in rows {
            match DedupKey::from_cells(row) {
                Some(key) => {
                    keys.insert(key);
                }
                None => ignored += 1,
            }
        }

        if ignored > 0 {
            debug!(ignored, "Ledger rows without a composite key ignored");
        }

        Self {
            keys,
            rows: rows.len(),
            ignored,
        }
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    /// Rows read, including ignored ones.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn ignored(&self) -> usize {
        self.ignored
    }
}

/// Result of [`filter_new`].
#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutcome<T> {
    /// Items to record, in input order.
    pub kept: Vec<T>,

    /// Dropped because the ledger already holds the key.
    pub skipped_existing: usize,

    /// Dropped because an earlier item in the same batch had the key.
    pub skipped_in_batch: usize,
}

/// Keep the items whose key is neither in the snapshot nor earlier in the
/// batch. Input order is preserved.
pub fn filter_new<I, F>(items: I, snapshot: &LedgerSnapshot, get_key: F) -> DedupOutcome<I::Item>
where
    I: IntoIterator,
    F: Fn(&I::Item) -> DedupKey,
{
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut skipped_existing = 0;
    let mut skipped_in_batch = 0;

    for item in items {
        let key = get_key(&item);
        if snapshot.contains(&key) {
            skipped_existing += 1;
            continue;
        }
        if !seen.insert(key) {
            skipped_in_batch += 1;
            continue;
        }
        kept.push(item);
    }

    DedupOutcome {
        kept,
        skipped_existing,
        skipped_in_batch,
    }
}
