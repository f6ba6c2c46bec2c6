//! Per-key netting buckets.

use std::collections::HashMap;

use goldmine_core::{
    ClosedPosition, Direction, Fill, FillId, FillTime, PositionKey, Price, Quantity, Side,
};
use tracing::{trace, warn};

/// Running accumulator for one key while a position is open.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenPosition {
    pub quantity: Quantity,
    pub direction: Direction,
    pub entry_time: FillTime,
    pub profit_currency: String,
    /// Sum of `-price * quantity` over every constituent fill.
    pub realized_value: Price,
    /// Volume-to-price ratio converting realized value into `profit_currency`.
    pub weighting: f64,
    pub fill_ids: Vec<FillId>,
}

impl OpenPosition {
    fn open(fill: &Fill, side: Side) -> Self {
        Self {
            quantity: fill.quantity,
            direction: Direction::from(side),
            entry_time: fill.executed_at,
            profit_currency: fill.volume_currency.clone(),
            realized_value: cash_flow(fill),
            weighting: weighting_term(fill),
            fill_ids: vec![fill.id],
        }
    }

    fn accumulate(&mut self, fill: &Fill, balance: Quantity) {
        self.quantity = balance;
        self.realized_value += cash_flow(fill);
        // Pairwise averaging, not a volume-weighted mean: with more than two
        // fills the earlier terms decay by half on every step. Reports depend
        // on these exact numbers.
        self.weighting = (self.weighting + weighting_term(fill)) / 2.0;
        self.fill_ids.push(fill.id);
    }

    fn close(self, key: PositionKey, exit_time: FillTime) -> ClosedPosition {
        ClosedPosition {
            account: key.account,
            security: key.security,
            strategy: key.strategy,
            direction: self.direction,
            entry_time: self.entry_time,
            exit_time,
            profit: self.realized_value * self.weighting,
            profit_currency: self.profit_currency,
            fill_ids: self.fill_ids,
        }
    }
}

fn cash_flow(fill: &Fill) -> Price {
    -fill.price * fill.quantity as f64
}

fn weighting_term(fill: &Fill) -> f64 {
    fill.volume / (fill.price * fill.quantity.unsigned_abs() as f64)
}

/// Explicit map from key to open bucket.
///
/// A key is either present (open) or absent; it becomes absent the moment its
/// running quantity is exactly zero again.
#[derive(Debug, Default)]
pub struct PositionBook {
    open: HashMap<PositionKey, OpenPosition>,
}

impl PositionBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fill, returning the position it closes, if any.
    ///
    /// Fills must arrive in `(executed_at, id)` order. Zero-quantity fills
    /// have no defined bucket effect and are ignored, as are fills that would
    /// push the running balance past the range of [`Quantity`]; both stay
    /// unbalanced.
    pub fn apply(&mut self, fill: &Fill) -> Option<ClosedPosition> {
        let Some(side) = fill.side() else {
            warn!(fill_id = fill.id, "ignoring zero-quantity fill during netting");
            return None;
        };
        let key = fill.position_key();
        match self.open.get_mut(&key) {
            None => {
                trace!(%key, fill_id = fill.id, quantity = fill.quantity, "opening bucket");
                self.open.insert(key, OpenPosition::open(fill, side));
                None
            }
            Some(bucket) => {
                let Some(balance) = bucket.quantity.checked_add(fill.quantity) else {
                    warn!(
                        %key,
                        fill_id = fill.id,
                        balance = bucket.quantity,
                        quantity = fill.quantity,
                        "ignoring fill that would overflow the running balance"
                    );
                    return None;
                };
                bucket.accumulate(fill, balance);
                trace!(
                    %key,
                    fill_id = fill.id,
                    balance = bucket.quantity,
                    weighting = bucket.weighting,
                    "accumulated fill"
                );
                if bucket.quantity != 0 {
                    return None;
                }
                let (key, bucket) = self.open.remove_entry(&key)?;
                Some(bucket.close(key, fill.executed_at))
            }
        }
    }

    /// Bucket for `key` if it is currently open.
    #[must_use]
    pub fn get(&self, key: &PositionKey) -> Option<&OpenPosition> {
        self.open.get(key)
    }

    /// Number of keys with a non-zero running balance.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_positions(&self) -> impl Iterator<Item = (&PositionKey, &OpenPosition)> {
        self.open.iter()
    }
}

/// Net an ordered fill sequence, returning closed positions in closing order.
#[must_use]
pub fn net_fills(fills: &[Fill]) -> (Vec<ClosedPosition>, PositionBook) {
    let mut book = PositionBook::new();
    let closed = fills.iter().filter_map(|fill| book.apply(fill)).collect();
    (closed, book)
}
