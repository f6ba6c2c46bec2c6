use std::sync::{Arc, Mutex};

use goldmine_core::ClosedPosition;
use goldmine_store::FillStore;
use tracing::{debug, info};

use crate::book::net_fills;
use crate::{NettingError, NettingResult};

/// Summary of one [`NettingEngine::balance`] pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BalanceOutcome {
    /// Unbalanced fills present in the snapshot.
    pub examined: usize,
    /// Positions closed and persisted by this pass, in closing order.
    pub closed: Vec<ClosedPosition>,
    /// Keys still carrying a non-zero balance after the pass.
    pub open_buckets: usize,
}

/// Retires offsetting fills into closed positions.
pub struct NettingEngine {
    store: Arc<dyn FillStore>,
    in_flight: Mutex<()>,
}

impl NettingEngine {
    pub fn new(store: Arc<dyn FillStore>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(()),
        }
    }

    /// Net every unbalanced fill and persist the resulting positions.
    ///
    /// Runs inside one store transaction: either every closed position is
    /// inserted and all of its fills are marked balanced, or nothing changes.
    /// Concurrent callers are serialized. Calling this again without new
    /// fills closes nothing.
    pub fn balance(&self) -> NettingResult<BalanceOutcome> {
        let _guard = self.in_flight.lock().map_err(|_| NettingError::Poisoned)?;
        let mut outcome = BalanceOutcome::default();
        self.store.with_settlement(&mut |scope| {
            let fills = scope.unbalanced_fills()?;
            let (closed, book) = net_fills(&fills);
            for position in &closed {
                scope.mark_balanced(&position.fill_ids)?;
                let id = scope.insert_closed_position(position)?;
                debug!(
                    position_id = id,
                    account = %position.account,
                    security = %position.security,
                    strategy = %position.strategy,
                    profit = position.profit,
                    fills = position.fill_ids.len(),
                    "closed position"
                );
            }
            outcome = BalanceOutcome {
                examined: fills.len(),
                closed,
                open_buckets: book.open_count(),
            };
            Ok(())
        })?;
        info!(
            examined = outcome.examined,
            closed = outcome.closed.len(),
            open = outcome.open_buckets,
            "netting pass complete"
        );
        Ok(outcome)
    }
}
