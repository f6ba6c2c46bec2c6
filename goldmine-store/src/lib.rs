//! Durable fill storage.
//!
//! The [`FillStore`] trait is the only surface the ingestion writer and the
//! netting engine see; [`SqliteFillStore`] is the production backend.

mod sqlite;

pub use sqlite::SqliteFillStore;

use goldmine_core::{ClosedPosition, Fill, FillId, NewFill, PositionFilter};
use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store-specific error type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Raised when an operation references a fill that is not stored.
    #[error("unknown fill id {0}")]
    UnknownFill(FillId),
    /// A stored row could not be decoded into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Operations available inside one netting transaction.
///
/// Everything done through a scope commits together or not at all.
pub trait SettlementScope {
    /// Every fill not yet retired, ordered by `(timestamp, microseconds, id)`.
    fn unbalanced_fills(&mut self) -> StoreResult<Vec<Fill>>;

    /// Flag fills as balanced. Marking an already balanced fill is a no-op.
    fn mark_balanced(&mut self, ids: &[FillId]) -> StoreResult<()>;

    /// Persist a closed position together with its constituent fill links.
    fn insert_closed_position(&mut self, position: &ClosedPosition) -> StoreResult<i64>;
}

/// Durable, append-only record of fills and the positions derived from them.
pub trait FillStore: Send + Sync {
    /// Append a fill and return its monotonically increasing id.
    fn append(&self, fill: &NewFill) -> StoreResult<FillId>;

    /// Snapshot of every unbalanced fill, in netting order.
    fn unbalanced_fills(&self) -> StoreResult<Vec<Fill>>;

    /// All fills, optionally restricted to one account, oldest first.
    fn fills(&self, account: Option<&str>) -> StoreResult<Vec<Fill>>;

    /// Distinct accounts that have at least one fill.
    fn accounts(&self) -> StoreResult<Vec<String>>;

    /// Stored closed positions ordered by exit time.
    fn closed_positions(&self, filter: &PositionFilter) -> StoreResult<Vec<ClosedPosition>>;

    /// Administrative removal of a raw fill.
    fn delete_fill(&self, id: FillId) -> StoreResult<()>;

    /// Run `work` inside a single exclusive transaction.
    ///
    /// The transaction commits when `work` returns `Ok` and rolls back when it
    /// returns an error, which is then propagated.
    fn with_settlement(
        &self,
        work: &mut dyn FnMut(&mut dyn SettlementScope) -> StoreResult<()>,
    ) -> StoreResult<()>;
}
