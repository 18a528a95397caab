//! Append-only ledger interface.

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::event::LedgerRow;

/// Durable record of assignments.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// All recorded rows, as raw cells in column order.
    async fn read_existing(&self) -> Result<Vec<Vec<String>>, LedgerError>;

    /// Record `rows` in one batch. Either every row lands or the call fails.
    async fn append_rows(&self, rows: &[LedgerRow]) -> Result<(), LedgerError>;
}
