// =============================================================================
// Outcome Store — append-only SQLite log of predictions and real outcomes
// =============================================================================
//
// One row per trade. A row is created either when a prediction is issued
// (actual still NULL) or when a bulk outcome is recorded (actual set). The
// actual outcome is written at most once; afterwards the only mutation is the
// one-way archive flag used by the "new session" boundary.
//
// Ordering is by (timestamp_ms, seq). `seq` is the SQLite rowid.
//
// `outcome_seq` orders rows by when their outcome became known: it is stamped
// from a counter in `store_counters` at insert (bulk outcome) or at resolve
// (two-step lifecycle). The counter never goes backwards, even when rows are
// deleted, and it is what the trainer's watermark is compared against.
//
// `trade_id` uniqueness is enforced by the schema; a duplicate insert is
// reported as `AppendResult::Duplicate`, never as an error.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info};

use crate::types::{Outcome, SignalSource};

// =============================================================================
// Records
// =============================================================================

/// A persisted trade row.
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    /// Store sequence number (insertion order).
    pub seq: i64,
    /// Order in which the outcome became known; `None` while pending.
    pub outcome_seq: Option<i64>,
    pub trade_id: String,
    pub timestamp: DateTime<Utc>,
    /// `None` when no actionable call was made (bulk import, SKIP/RISKY).
    pub predicted: Option<Outcome>,
    pub confidence: f64,
    pub source: SignalSource,
    pub actual: Option<Outcome>,
    pub archived: bool,
}

impl TradeRecord {
    /// Whether the call was right, if both sides are known.
    pub fn is_win(&self) -> Option<bool> {
        Some(self.predicted? == self.actual?)
    }
}

/// Input for [`OutcomeStore::append`].
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub trade_id: String,
    pub timestamp: DateTime<Utc>,
    pub predicted: Option<Outcome>,
    pub confidence: f64,
    pub source: SignalSource,
    pub actual: Option<Outcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendResult {
    Inserted { seq: i64 },
    Duplicate,
}

const SELECT_COLUMNS: &str =
    "seq, trade_id, timestamp_ms, predicted, confidence, source, actual, archived, outcome_seq";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<TradeRecord> {
    let ts_ms: i64 = row.get(2)?;
    let predicted: Option<String> = row.get(3)?;
    let source: String = row.get(5)?;
    let actual: Option<String> = row.get(6)?;
    let archived: i64 = row.get(7)?;

    Ok(TradeRecord {
        seq: row.get(0)?,
        outcome_seq: row.get(8)?,
        trade_id: row.get(1)?,
        timestamp: Utc
            .timestamp_millis_opt(ts_ms)
            .single()
            .unwrap_or_else(Utc::now),
        predicted: predicted.as_deref().and_then(Outcome::from_label),
        confidence: row.get(4)?,
        source: SignalSource::from_label(&source),
        actual: actual.as_deref().and_then(Outcome::from_label),
        archived: archived != 0,
    })
}

// =============================================================================
// OutcomeStore
// =============================================================================

pub struct OutcomeStore {
    conn: Mutex<Connection>,
}

impl OutcomeStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open outcome store {}", path.display()))?;
        configure_connection(&conn)?;
        let store = Self::from_connection(conn)?;
        info!(path = %path.display(), "outcome store opened");
        Ok(store)
    }

    /// Volatile store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id TEXT UNIQUE NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                predicted TEXT,
                confidence REAL NOT NULL DEFAULT 0,
                source TEXT NOT NULL,
                actual TEXT,
                archived INTEGER NOT NULL DEFAULT 0,
                outcome_seq INTEGER
            );
            CREATE TABLE IF NOT EXISTS store_counters (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_archived ON trades(archived);
            CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp_ms);
            CREATE INDEX IF NOT EXISTS idx_trades_actual ON trades(actual);
            "#,
        )
        .context("failed to create trades schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Append a trade. Duplicate `trade_id`s are rejected without error.
    pub fn append(&self, trade: &NewTrade) -> Result<AppendResult> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("failed to begin append")?;
        let res = tx.execute(
            r#"
            INSERT INTO trades (trade_id, timestamp_ms, predicted, confidence, source, actual)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                trade.trade_id,
                trade.timestamp.timestamp_millis(),
                trade.predicted.map(Outcome::label),
                trade.confidence,
                trade.source.label(),
                trade.actual.map(Outcome::label),
            ],
        );

        match res {
            Ok(_) => {
                let seq = tx.last_insert_rowid();
                if trade.actual.is_some() {
                    stamp_outcome(&tx, seq).context("failed to stamp outcome")?;
                }
                tx.commit().context("failed to commit append")?;
                debug!(trade_id = %trade.trade_id, seq, "trade appended");
                Ok(AppendResult::Inserted { seq })
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                debug!(trade_id = %trade.trade_id, "duplicate trade_id rejected");
                Ok(AppendResult::Duplicate)
            }
            Err(e) => Err(e).context("failed to append trade"),
        }
    }

    /// Record the real outcome of a pending trade. Returns false if the trade
    /// does not exist or already has an outcome.
    pub fn resolve(&self, trade_id: &str, actual: Outcome) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("failed to begin resolve")?;
        let pending: Option<i64> = tx
            .query_row(
                "SELECT seq FROM trades WHERE trade_id = ?1 AND actual IS NULL",
                [trade_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up pending trade")?;
        let Some(seq) = pending else {
            return Ok(false);
        };
        tx.execute(
            "UPDATE trades SET actual = ?1 WHERE seq = ?2",
            params![actual.label(), seq],
        )
        .context("failed to resolve trade")?;
        let outcome_seq = stamp_outcome(&tx, seq).context("failed to stamp outcome")?;
        tx.commit().context("failed to commit resolve")?;
        debug!(%trade_id, seq, outcome_seq, "trade resolved");
        Ok(true)
    }

    /// Flag every active row as archived. Returns the number of rows flipped.
    pub fn archive_all(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n = conn
            .execute("UPDATE trades SET archived = 1 WHERE archived = 0", [])
            .context("failed to archive trades")?;
        info!(archived = n, "active trades archived");
        Ok(n)
    }

    pub fn delete(&self, trade_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn
            .execute("DELETE FROM trades WHERE trade_id = ?1", [trade_id])
            .context("failed to delete trade")?;
        Ok(n > 0)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn get(&self, trade_id: &str) -> Result<Option<TradeRecord>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {SELECT_COLUMNS} FROM trades WHERE trade_id = ?1");
        conn.query_row(&sql, [trade_id], row_to_record)
            .optional()
            .context("failed to load trade")
    }

    /// The newest `limit` rows with a known outcome, oldest first.
    pub fn completed(&self, limit: usize, include_archived: bool) -> Result<Vec<TradeRecord>> {
        let filter = if include_archived {
            "actual IS NOT NULL"
        } else {
            "actual IS NOT NULL AND archived = 0"
        };
        self.tail(filter, limit)
    }

    /// The newest `limit` rows regardless of outcome, oldest first.
    pub fn recent(&self, limit: usize, include_archived: bool) -> Result<Vec<TradeRecord>> {
        let filter = if include_archived { "1 = 1" } else { "archived = 0" };
        self.tail(filter, limit)
    }

    /// Every completed row at or after `since`, oldest first.
    pub fn completed_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM trades \
             WHERE actual IS NOT NULL AND timestamp_ms >= ?1 \
             ORDER BY timestamp_ms ASC, seq ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([since.timestamp_millis()], row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn total_count(&self, include_archived: bool) -> Result<usize> {
        let conn = self.conn.lock();
        let sql = if include_archived {
            "SELECT COUNT(*) FROM trades"
        } else {
            "SELECT COUNT(*) FROM trades WHERE archived = 0"
        };
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Highest `outcome_seq` ever issued, 0 for a fresh store. Deletes do not
    /// lower it; only a replaced database does.
    pub fn outcome_high_water(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM store_counters WHERE name = 'outcome_seq'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .context("failed to read outcome counter")?;
        Ok(value.unwrap_or(0))
    }

    fn tail(&self, filter: &str, limit: usize) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM trades WHERE {filter} \
             ORDER BY timestamp_ms DESC, seq DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([limit as i64], row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        out.reverse();
        Ok(out)
    }
}

/// Take the next outcome sequence number and stamp it on row `seq`.
fn stamp_outcome(conn: &Connection, seq: i64) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO store_counters (name, value) VALUES ('outcome_seq', 1) \
         ON CONFLICT(name) DO UPDATE SET value = value + 1",
        [],
    )?;
    let outcome_seq: i64 = conn.query_row(
        "SELECT value FROM store_counters WHERE name = 'outcome_seq'",
        [],
        |row| row.get(0),
    )?;
    conn.execute(
        "UPDATE trades SET outcome_seq = ?1 WHERE seq = ?2",
        params![outcome_seq, seq],
    )?;
    Ok(outcome_seq)
}

/// WAL + relaxed sync, the same tuning the web tier used for concurrent
/// readers.
pub(crate) fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        .context("failed to enable WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous mode")?;
    conn.busy_timeout(std::time::Duration::from_secs(10))
        .context("failed to set busy timeout")?;
    Ok(())
}

impl std::fmt::Debug for OutcomeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StrategyKind;
    use chrono::Duration;

    fn trade(id: &str, minute: i64, predicted: Option<Outcome>, actual: Option<Outcome>) -> NewTrade {
        NewTrade {
            trade_id: id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 2, 15, 10, 0, 0).unwrap()
                + Duration::minutes(minute),
            predicted,
            confidence: 80.0,
            source: SignalSource::Strategy(StrategyKind::Pattern),
            actual,
        }
    }

    #[test]
    fn duplicate_trade_id_is_rejected() {
        let store = OutcomeStore::open_in_memory().unwrap();
        let t = trade("t0", 0, Some(Outcome::Big), Some(Outcome::Big));
        assert!(matches!(store.append(&t).unwrap(), AppendResult::Inserted { .. }));
        assert_eq!(store.append(&t).unwrap(), AppendResult::Duplicate);
        assert_eq!(store.total_count(true).unwrap(), 1);
        // the rejected insert rolled back without consuming a stamp
        assert_eq!(store.outcome_high_water().unwrap(), 1);
    }

    #[test]
    fn completed_returns_tail_in_timestamp_order() {
        let store = OutcomeStore::open_in_memory().unwrap();
        // Inserted out of order on purpose.
        store.append(&trade("b", 2, None, Some(Outcome::Small))).unwrap();
        store.append(&trade("a", 1, None, Some(Outcome::Big))).unwrap();
        store.append(&trade("c", 3, None, None)).unwrap();
        store.append(&trade("d", 4, None, Some(Outcome::Big))).unwrap();

        let rows = store.completed(2, true).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.trade_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);

        let all = store.completed(10, true).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].trade_id, "a");
    }

    #[test]
    fn resolve_sets_actual_only_once() {
        let store = OutcomeStore::open_in_memory().unwrap();
        store.append(&trade("p", 0, Some(Outcome::Big), None)).unwrap();
        assert!(store.resolve("p", Outcome::Small).unwrap());
        assert!(!store.resolve("p", Outcome::Big).unwrap());
        assert!(!store.resolve("missing", Outcome::Big).unwrap());

        let rec = store.get("p").unwrap().unwrap();
        assert_eq!(rec.actual, Some(Outcome::Small));
        assert_eq!(rec.is_win(), Some(false));
    }

    #[test]
    fn archive_hides_rows_from_active_segment() {
        let store = OutcomeStore::open_in_memory().unwrap();
        store.append(&trade("a", 0, None, Some(Outcome::Big))).unwrap();
        store.append(&trade("b", 1, None, Some(Outcome::Small))).unwrap();
        assert_eq!(store.archive_all().unwrap(), 2);
        store.append(&trade("c", 2, None, Some(Outcome::Big))).unwrap();

        assert_eq!(store.completed(10, false).unwrap().len(), 1);
        assert_eq!(store.completed(10, true).unwrap().len(), 3);
        assert_eq!(store.total_count(false).unwrap(), 1);
        assert!(store.get("a").unwrap().unwrap().archived);
    }

    #[test]
    fn unknown_labels_map_to_none_and_external() {
        let store = OutcomeStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO trades (trade_id, timestamp_ms, predicted, confidence, source, actual) \
                 VALUES ('x', 0, 'INITIAL', 0, 'Test', 'BIG')",
                [],
            )
            .unwrap();
        }
        let rec = store.get("x").unwrap().unwrap();
        assert_eq!(rec.predicted, None);
        assert_eq!(rec.source, SignalSource::External);
        assert_eq!(rec.is_win(), None);
    }

    #[test]
    fn outcome_high_water_survives_deletes() {
        let store = OutcomeStore::open_in_memory().unwrap();
        assert_eq!(store.outcome_high_water().unwrap(), 0);
        store.append(&trade("a", 0, None, Some(Outcome::Big))).unwrap();
        store.append(&trade("b", 1, None, Some(Outcome::Big))).unwrap();
        assert_eq!(store.outcome_high_water().unwrap(), 2);
        assert!(store.delete("b").unwrap());
        assert!(!store.delete("b").unwrap());
        assert_eq!(store.outcome_high_water().unwrap(), 2);

        store.append(&trade("c", 2, None, Some(Outcome::Small))).unwrap();
        assert_eq!(store.get("c").unwrap().unwrap().outcome_seq, Some(3));
    }

    #[test]
    fn resolve_stamps_when_outcome_arrives() {
        let store = OutcomeStore::open_in_memory().unwrap();
        store.append(&trade("p", 0, Some(Outcome::Big), None)).unwrap();
        store.append(&trade("q", 1, None, Some(Outcome::Small))).unwrap();
        assert_eq!(store.get("p").unwrap().unwrap().outcome_seq, None);
        assert_eq!(store.get("q").unwrap().unwrap().outcome_seq, Some(1));

        assert!(store.resolve("p", Outcome::Small).unwrap());
        let p = store.get("p").unwrap().unwrap();
        assert_eq!(p.outcome_seq, Some(2));
        // insertion order is unchanged
        assert!(p.seq < store.get("q").unwrap().unwrap().seq);
        assert_eq!(store.outcome_high_water().unwrap(), 2);
    }

    #[test]
    fn completed_since_filters_by_time() {
        let store = OutcomeStore::open_in_memory().unwrap();
        store.append(&trade("old", 0, None, Some(Outcome::Big))).unwrap();
        store.append(&trade("new", 60, None, Some(Outcome::Big))).unwrap();
        let since = Utc.with_ymd_and_hms(2026, 2, 15, 10, 30, 0).unwrap();
        let rows = store.completed_since(since).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trade_id, "new");
    }
}
