//! Position netting and realized P&L.
//!
//! Fills are replayed in time order into per `(account, security, strategy)`
//! buckets; a bucket whose running quantity returns to exactly zero becomes a
//! [`ClosedPosition`](goldmine_core::ClosedPosition).

mod book;
mod engine;

pub use book::{net_fills, OpenPosition, PositionBook};
pub use engine::{BalanceOutcome, NettingEngine};

use goldmine_store::StoreError;
use thiserror::Error;

/// Result alias for netting operations.
pub type NettingResult<T> = Result<T, NettingError>;

#[derive(Debug, Error)]
pub enum NettingError {
    /// The settlement transaction failed and was rolled back.
    #[error("settlement failed: {0}")]
    Store(#[from] StoreError),
    #[error("netting lock poisoned")]
    Poisoned,
}
