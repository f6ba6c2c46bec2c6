use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use goldmine_core::{ClosedPosition, Direction, Fill, FillId, FillTime, NewFill, PositionFilter};
use rusqlite::{params, Connection, Params, Row, Transaction, TransactionBehavior};
use tracing::debug;

use crate::{FillStore, SettlementScope, StoreError, StoreResult};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS fills (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account TEXT NOT NULL,
        security TEXT NOT NULL,
        strategy TEXT NOT NULL,
        signal_id TEXT NOT NULL,
        comment TEXT NOT NULL,
        price REAL NOT NULL,
        quantity INTEGER NOT NULL,
        volume REAL NOT NULL,
        volume_currency TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        useconds INTEGER NOT NULL,
        balanced INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_fills_unbalanced
        ON fills(balanced, timestamp, useconds, id);
    CREATE INDEX IF NOT EXISTS idx_fills_account ON fills(account);

    CREATE TABLE IF NOT EXISTS closed_positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account TEXT NOT NULL,
        security TEXT NOT NULL,
        strategy TEXT NOT NULL,
        direction TEXT NOT NULL,
        entry_timestamp INTEGER NOT NULL,
        entry_useconds INTEGER NOT NULL,
        exit_timestamp INTEGER NOT NULL,
        exit_useconds INTEGER NOT NULL,
        profit REAL NOT NULL,
        profit_currency TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_closed_positions_exit
        ON closed_positions(exit_timestamp, exit_useconds);

    CREATE TABLE IF NOT EXISTS closed_position_fills (
        position_id INTEGER NOT NULL REFERENCES closed_positions(id),
        seq INTEGER NOT NULL,
        fill_id INTEGER NOT NULL,
        PRIMARY KEY (position_id, seq)
    );
"#;

const FILL_COLUMNS: &str = "id, account, security, strategy, signal_id, comment, price, \
     quantity, volume, volume_currency, timestamp, useconds, balanced";

/// SQLite-based implementation of the fill store.
pub struct SqliteFillStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteFillStore {
    /// Open (or create) the database at `path` and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn, Some(path.to_path_buf()))?;
        debug!(path = %path.display(), "opened fill store");
        Ok(store)
    }

    /// Create an in-memory store, mostly useful for tests.
    pub fn in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Location of the database file; `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl FillStore for SqliteFillStore {
    fn append(&self, fill: &NewFill) -> StoreResult<FillId> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO fills (
                account, security, strategy, signal_id, comment, price,
                quantity, volume, volume_currency, timestamp, useconds, balanced
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0)
            "#,
        )?;
        stmt.execute(params![
            fill.account,
            fill.security,
            fill.strategy,
            fill.signal_id,
            fill.comment,
            fill.price,
            fill.quantity,
            fill.volume,
            fill.volume_currency,
            fill.executed_at.seconds,
            fill.executed_at.micros,
        ])?;
        Ok(conn.last_insert_rowid())
    }

    fn unbalanced_fills(&self) -> StoreResult<Vec<Fill>> {
        let conn = self.lock()?;
        select_unbalanced(&conn)
    }

    fn fills(&self, account: Option<&str>) -> StoreResult<Vec<Fill>> {
        let conn = self.lock()?;
        match account {
            Some(account) => query_fills(
                &conn,
                &format!(
                    "SELECT {FILL_COLUMNS} FROM fills WHERE account = ?1 \
                     ORDER BY timestamp, useconds, id"
                ),
                [account],
            ),
            None => query_fills(
                &conn,
                &format!("SELECT {FILL_COLUMNS} FROM fills ORDER BY timestamp, useconds, id"),
                [],
            ),
        }
    }

    fn accounts(&self) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT account FROM fills ORDER BY account")?;
        let accounts = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(accounts)
    }

    fn closed_positions(&self, filter: &PositionFilter) -> StoreResult<Vec<ClosedPosition>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, account, security, strategy, direction,
                   entry_timestamp, entry_useconds, exit_timestamp, exit_useconds,
                   profit, profit_currency
            FROM closed_positions
            WHERE (?1 IS NULL OR account = ?1) AND (?2 IS NULL OR strategy = ?2)
            ORDER BY exit_timestamp, exit_useconds, id
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![filter.account.as_deref(), filter.strategy.as_deref()],
                PositionRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut links = conn.prepare_cached(
            "SELECT fill_id FROM closed_position_fills WHERE position_id = ?1 ORDER BY seq",
        )?;
        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            let fill_ids = links
                .query_map([row.id], |r| r.get(0))?
                .collect::<Result<Vec<FillId>, _>>()?;
            positions.push(row.into_position(fill_ids)?);
        }
        Ok(positions)
    }

    fn delete_fill(&self, id: FillId) -> StoreResult<()> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM fills WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(StoreError::UnknownFill(id));
        }
        Ok(())
    }

    fn with_settlement(
        &self,
        work: &mut dyn FnMut(&mut dyn SettlementScope) -> StoreResult<()>,
    ) -> StoreResult<()> {
        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front so another process cannot
        // settle the same snapshot concurrently.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut scope = SqliteSettlement { tx: &tx };
            work(&mut scope)?;
        }
        tx.commit()?;
        Ok(())
    }
}

struct SqliteSettlement<'a> {
    tx: &'a Transaction<'a>,
}

impl SettlementScope for SqliteSettlement<'_> {
    fn unbalanced_fills(&mut self) -> StoreResult<Vec<Fill>> {
        select_unbalanced(self.tx)
    }

    fn mark_balanced(&mut self, ids: &[FillId]) -> StoreResult<()> {
        let mut stmt = self
            .tx
            .prepare_cached("UPDATE fills SET balanced = 1 WHERE id = ?1")?;
        for id in ids {
            if stmt.execute([id])? == 0 {
                return Err(StoreError::UnknownFill(*id));
            }
        }
        Ok(())
    }

    fn insert_closed_position(&mut self, position: &ClosedPosition) -> StoreResult<i64> {
        self.tx.execute(
            r#"
            INSERT INTO closed_positions (
                account, security, strategy, direction,
                entry_timestamp, entry_useconds, exit_timestamp, exit_useconds,
                profit, profit_currency
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                position.account,
                position.security,
                position.strategy,
                position.direction.as_str(),
                position.entry_time.seconds,
                position.entry_time.micros,
                position.exit_time.seconds,
                position.exit_time.micros,
                position.profit,
                position.profit_currency,
            ],
        )?;
        let position_id = self.tx.last_insert_rowid();

        let mut link = self.tx.prepare_cached(
            "INSERT INTO closed_position_fills (position_id, seq, fill_id) VALUES (?1, ?2, ?3)",
        )?;
        for (seq, fill_id) in position.fill_ids.iter().enumerate() {
            link.execute(params![position_id, seq as i64, fill_id])?;
        }
        Ok(position_id)
    }
}

fn select_unbalanced(conn: &Connection) -> StoreResult<Vec<Fill>> {
    query_fills(
        conn,
        &format!(
            "SELECT {FILL_COLUMNS} FROM fills WHERE balanced = 0 \
             ORDER BY timestamp, useconds, id"
        ),
        [],
    )
}

fn query_fills<P: Params>(conn: &Connection, sql: &str, params: P) -> StoreResult<Vec<Fill>> {
    let mut stmt = conn.prepare(sql)?;
    let fills = stmt
        .query_map(params, fill_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(fills)
}

fn fill_from_row(row: &Row<'_>) -> rusqlite::Result<Fill> {
    Ok(Fill {
        id: row.get(0)?,
        account: row.get(1)?,
        security: row.get(2)?,
        strategy: row.get(3)?,
        signal_id: row.get(4)?,
        comment: row.get(5)?,
        price: row.get(6)?,
        quantity: row.get(7)?,
        volume: row.get(8)?,
        volume_currency: row.get(9)?,
        executed_at: FillTime {
            seconds: row.get(10)?,
            micros: row.get(11)?,
        },
        balanced: row.get(12)?,
    })
}

struct PositionRow {
    id: i64,
    account: String,
    security: String,
    strategy: String,
    direction: String,
    entry_time: FillTime,
    exit_time: FillTime,
    profit: f64,
    profit_currency: String,
}

impl PositionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account: row.get(1)?,
            security: row.get(2)?,
            strategy: row.get(3)?,
            direction: row.get(4)?,
            entry_time: FillTime {
                seconds: row.get(5)?,
                micros: row.get(6)?,
            },
            exit_time: FillTime {
                seconds: row.get(7)?,
                micros: row.get(8)?,
            },
            profit: row.get(9)?,
            profit_currency: row.get(10)?,
        })
    }

    fn into_position(self, fill_ids: Vec<FillId>) -> StoreResult<ClosedPosition> {
        let direction = self
            .direction
            .parse::<Direction>()
            .map_err(|err| StoreError::Corrupt(format!("closed position {}: {err}", self.id)))?;
        Ok(ClosedPosition {
            account: self.account,
            security: self.security,
            strategy: self.strategy,
            direction,
            entry_time: self.entry_time,
            exit_time: self.exit_time,
            profit: self.profit,
            profit_currency: self.profit_currency,
            fill_ids,
        })
    }
}
