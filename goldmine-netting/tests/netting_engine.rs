use std::sync::Arc;
use std::thread;

use anyhow::Result;
use goldmine_core::{ClosedPosition, Direction, Fill, FillId, FillTime, NewFill, PositionFilter};
use goldmine_netting::{NettingEngine, NettingError};
use goldmine_store::{FillStore, SettlementScope, SqliteFillStore, StoreError, StoreResult};
use tempfile::tempdir;

fn new_fill(security: &str, quantity: i64, price: f64, volume: f64, seconds: i64) -> NewFill {
    NewFill {
        account: "foo".into(),
        security: security.into(),
        strategy: "foobar".into(),
        signal_id: "signal".into(),
        comment: String::new(),
        price,
        quantity,
        volume,
        volume_currency: "USD".into(),
        executed_at: FillTime {
            seconds,
            micros: 333_000,
        },
    }
}

fn setup() -> Result<(Arc<SqliteFillStore>, NettingEngine)> {
    let store = Arc::new(SqliteFillStore::in_memory()?);
    let engine = NettingEngine::new(store.clone());
    Ok((store, engine))
}

fn balanced_ids(store: &SqliteFillStore) -> Result<Vec<FillId>> {
    Ok(store
        .fills(None)?
        .into_iter()
        .filter(|fill| fill.balanced)
        .map(|fill| fill.id)
        .collect())
}

#[test]
fn offsetting_pair_closes_one_long_position() -> Result<()> {
    let (store, engine) = setup()?;
    let buy = store.append(&new_fill("bar", 10, 100.0, 1000.0, 1))?;
    let sell = store.append(&new_fill("bar", -10, 105.0, 1050.0, 2))?;

    let outcome = engine.balance()?;
    assert_eq!(outcome.examined, 2);
    assert_eq!(outcome.open_buckets, 0);
    assert_eq!(outcome.closed.len(), 1);

    let position = &outcome.closed[0];
    assert_eq!(position.direction, Direction::Long);
    assert_eq!(position.profit_currency, "USD");
    assert!((position.profit - 50.0).abs() < 1e-9);
    assert!(position.entry_time <= position.exit_time);
    assert_eq!(position.fill_ids, vec![buy, sell]);

    assert_eq!(balanced_ids(&store)?, vec![buy, sell]);
    assert_eq!(
        store.closed_positions(&PositionFilter::default())?,
        outcome.closed
    );
    Ok(())
}

#[test]
fn partial_fills_net_into_single_position() -> Result<()> {
    let (store, engine) = setup()?;
    let ids = [
        store.append(&new_fill("bar", 5, 10.0, 50.0, 1))?,
        store.append(&new_fill("bar", 5, 11.0, 55.0, 2))?,
        store.append(&new_fill("bar", -10, 12.0, 120.0, 3))?,
    ];

    let outcome = engine.balance()?;
    assert_eq!(outcome.closed.len(), 1);
    assert_eq!(outcome.closed[0].fill_ids, ids.to_vec());
    assert_eq!(balanced_ids(&store)?, ids.to_vec());
    Ok(())
}

#[test]
fn unmatched_fills_stay_unbalanced() -> Result<()> {
    let (store, engine) = setup()?;
    store.append(&new_fill("bar", 3, 10.0, 30.0, 1))?;
    store.append(&new_fill("bar", -1, 10.0, 10.0, 2))?;

    let outcome = engine.balance()?;
    assert!(outcome.closed.is_empty());
    assert_eq!(outcome.open_buckets, 1);
    assert_eq!(store.unbalanced_fills()?.len(), 2);
    assert!(store.closed_positions(&PositionFilter::default())?.is_empty());
    Ok(())
}

#[test]
fn second_pass_without_new_fills_is_a_no_op() -> Result<()> {
    let (store, engine) = setup()?;
    store.append(&new_fill("bar", 1, 10.0, 10.0, 1))?;
    store.append(&new_fill("bar", -1, 12.0, 12.0, 2))?;

    assert_eq!(engine.balance()?.closed.len(), 1);
    let again = engine.balance()?;
    assert!(again.closed.is_empty());
    assert_eq!(again.examined, 0);
    assert_eq!(store.closed_positions(&PositionFilter::default())?.len(), 1);
    Ok(())
}

#[test]
fn open_bucket_closes_once_offset_arrives_later() -> Result<()> {
    let (store, engine) = setup()?;
    let opening = store.append(&new_fill("bar", -4, 20.0, 80.0, 1))?;
    assert!(engine.balance()?.closed.is_empty());

    let closing = store.append(&new_fill("bar", 4, 19.0, 76.0, 5))?;
    let outcome = engine.balance()?;
    assert_eq!(outcome.closed.len(), 1);
    assert_eq!(outcome.closed[0].direction, Direction::Short);
    assert_eq!(outcome.closed[0].fill_ids, vec![opening, closing]);
    assert!((outcome.closed[0].profit - 4.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn ties_on_timestamp_are_broken_by_id() -> Result<()> {
    let (store, engine) = setup()?;
    let first = store.append(&new_fill("bar", 2, 10.0, 20.0, 7))?;
    let second = store.append(&new_fill("bar", -2, 11.0, 22.0, 7))?;

    let outcome = engine.balance()?;
    assert_eq!(outcome.closed[0].fill_ids, vec![first, second]);
    assert_eq!(outcome.closed[0].direction, Direction::Long);
    Ok(())
}

#[test]
fn concurrent_passes_do_not_double_count() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(SqliteFillStore::open(dir.path().join("trades.db"))?);
    for n in 0..20 {
        store.append(&new_fill("bar", 1, 10.0, 10.0, n * 2))?;
        store.append(&new_fill("bar", -1, 11.0, 11.0, n * 2 + 1))?;
    }
    let engine = Arc::new(NettingEngine::new(store.clone()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || engine.balance().map(|outcome| outcome.closed.len()))
        })
        .collect();
    let mut total = 0;
    for handle in handles {
        total += handle.join().expect("netting thread panicked")?;
    }

    assert_eq!(total, 20);
    assert_eq!(store.closed_positions(&PositionFilter::default())?.len(), 20);
    assert!(store.unbalanced_fills()?.is_empty());
    Ok(())
}

/// Delegates to SQLite but fails every closed position insert.
struct RejectingStore {
    inner: SqliteFillStore,
}

struct RejectingScope<'a> {
    inner: &'a mut dyn SettlementScope,
}

impl SettlementScope for RejectingScope<'_> {
    fn unbalanced_fills(&mut self) -> StoreResult<Vec<Fill>> {
        self.inner.unbalanced_fills()
    }

    fn mark_balanced(&mut self, ids: &[FillId]) -> StoreResult<()> {
        self.inner.mark_balanced(ids)
    }

    fn insert_closed_position(&mut self, _position: &ClosedPosition) -> StoreResult<i64> {
        Err(StoreError::Corrupt("insert rejected".into()))
    }
}

impl FillStore for RejectingStore {
    fn append(&self, fill: &NewFill) -> StoreResult<FillId> {
        self.inner.append(fill)
    }

    fn unbalanced_fills(&self) -> StoreResult<Vec<Fill>> {
        self.inner.unbalanced_fills()
    }

    fn fills(&self, account: Option<&str>) -> StoreResult<Vec<Fill>> {
        self.inner.fills(account)
    }

    fn accounts(&self) -> StoreResult<Vec<String>> {
        self.inner.accounts()
    }

    fn closed_positions(&self, filter: &PositionFilter) -> StoreResult<Vec<ClosedPosition>> {
        self.inner.closed_positions(filter)
    }

    fn delete_fill(&self, id: FillId) -> StoreResult<()> {
        self.inner.delete_fill(id)
    }

    fn with_settlement(
        &self,
        work: &mut dyn FnMut(&mut dyn SettlementScope) -> StoreResult<()>,
    ) -> StoreResult<()> {
        self.inner.with_settlement(&mut |scope| {
            let mut rejecting = RejectingScope { inner: scope };
            work(&mut rejecting)
        })
    }
}

#[test]
fn failed_insert_rolls_back_fill_marks() -> Result<()> {
    let store = Arc::new(RejectingStore {
        inner: SqliteFillStore::in_memory()?,
    });
    store.append(&new_fill("bar", 1, 10.0, 10.0, 1))?;
    store.append(&new_fill("bar", -1, 12.0, 12.0, 2))?;
    let engine = NettingEngine::new(store.clone());

    let err = engine.balance().expect_err("insert failure must surface");
    assert!(matches!(err, NettingError::Store(StoreError::Corrupt(_))));

    assert_eq!(store.unbalanced_fills()?.len(), 2);
    assert!(store.closed_positions(&PositionFilter::default())?.is_empty());
    Ok(())
}
