// =============================================================================
// Correction Ledger — persistent record of patterns that fooled the engine
// =============================================================================
//
// Table `correction_table`, keyed by pattern:
//
//   pattern | incorrect_prediction | correct_result | occurrence_count
//           | reliability_score    | last_seen_ms
//
// Rules:
//   - a row is only created or reinforced by a *wrong* call; a call that was
//     right is a no-op;
//   - each repeat adds `reliability_step`, capped at `reliability_cap`;
//   - rows not seen for `retention_days` are purged lazily at the start of
//     every write, inside the same transaction.
//
// Alongside the table sits the in-memory session error log: every miss
// reported since the last session boundary, keyed by trade id. It is the only
// thing `reset_session()` clears.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::outcome_store::configure_connection;
use crate::runtime_config::LedgerParams;
use crate::types::Outcome;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionEntry {
    pub pattern: String,
    pub incorrect_prediction: Outcome,
    pub correct_result: Outcome,
    pub occurrence_count: u32,
    pub reliability_score: f64,
    pub last_seen: DateTime<Utc>,
}

/// A wrong call observed right after `pattern`.
#[derive(Debug, Clone, PartialEq)]
pub struct Misprediction {
    pub pattern: String,
    pub predicted: Outcome,
    pub actual: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerUpdate {
    /// Call was right (or pattern empty); nothing written.
    Ignored,
    Inserted,
    Reinforced,
}

/// One entry of the in-memory session log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionError {
    pub trade_id: String,
    pub pattern: String,
    pub predicted: Outcome,
    pub actual: Outcome,
}

// =============================================================================
// CorrectionLedger
// =============================================================================

pub struct CorrectionLedger {
    conn: Mutex<Connection>,
    params: LedgerParams,
    session: RwLock<Vec<SessionError>>,
}

impl CorrectionLedger {
    pub fn open(path: impl AsRef<Path>, params: LedgerParams) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open correction ledger {}", path.display()))?;
        configure_connection(&conn)?;
        let ledger = Self::from_connection(conn, params)?;
        info!(path = %path.display(), entries = ledger.len().unwrap_or(0), "correction ledger opened");
        Ok(ledger)
    }

    pub fn open_in_memory(params: LedgerParams) -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory ledger")?;
        Self::from_connection(conn, params)
    }

    fn from_connection(conn: Connection, params: LedgerParams) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS correction_table (
                pattern TEXT PRIMARY KEY,
                incorrect_prediction TEXT NOT NULL,
                correct_result TEXT NOT NULL,
                occurrence_count INTEGER NOT NULL DEFAULT 1,
                reliability_score REAL NOT NULL DEFAULT 0.5,
                last_seen_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_correction_last_seen ON correction_table(last_seen_ms);
            "#,
        )
        .context("failed to create correction_table schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
            params,
            session: RwLock::new(Vec::new()),
        })
    }

    // -------------------------------------------------------------------------
    // Persistent table
    // -------------------------------------------------------------------------

    /// Record that `wrong` was called after `pattern` and `actual` happened.
    pub fn update(&self, pattern: &str, wrong: Outcome, actual: Outcome) -> Result<LedgerUpdate> {
        self.update_at(pattern, wrong, actual, Utc::now())
    }

    pub fn update_at(
        &self,
        pattern: &str,
        wrong: Outcome,
        actual: Outcome,
        now: DateTime<Utc>,
    ) -> Result<LedgerUpdate> {
        let miss = Misprediction {
            pattern: pattern.to_string(),
            predicted: wrong,
            actual,
        };
        let mut results = self.update_many_at(std::slice::from_ref(&miss), now)?;
        Ok(results.pop().unwrap_or(LedgerUpdate::Ignored))
    }

    /// Apply a batch of misses in one transaction (purge first).
    pub fn update_many_at(
        &self,
        misses: &[Misprediction],
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerUpdate>> {
        let relevant = misses
            .iter()
            .any(|m| !m.pattern.is_empty() && m.predicted != m.actual);
        if !relevant {
            return Ok(vec![LedgerUpdate::Ignored; misses.len()]);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("failed to open ledger transaction")?;

        let cutoff = now - Duration::days(self.params.retention_days);
        let purged = tx
            .execute(
                "DELETE FROM correction_table WHERE last_seen_ms < ?1",
                [cutoff.timestamp_millis()],
            )
            .context("failed to purge stale corrections")?;
        if purged > 0 {
            debug!(purged, "stale corrections purged");
        }

        let mut results = Vec::with_capacity(misses.len());
        for m in misses {
            if m.pattern.is_empty() || m.predicted == m.actual {
                results.push(LedgerUpdate::Ignored);
                continue;
            }
            let existing: Option<(u32, f64)> = tx
                .query_row(
                    "SELECT occurrence_count, reliability_score FROM correction_table WHERE pattern = ?1",
                    [&m.pattern],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match existing {
                Some((count, score)) => {
                    let new_score = (score + self.params.reliability_step).min(self.params.reliability_cap);
                    tx.execute(
                        r#"
                        UPDATE correction_table
                        SET occurrence_count = ?1, reliability_score = ?2, last_seen_ms = ?3,
                            incorrect_prediction = ?4, correct_result = ?5
                        WHERE pattern = ?6
                        "#,
                        params![
                            count + 1,
                            new_score,
                            now.timestamp_millis(),
                            m.predicted.label(),
                            m.actual.label(),
                            m.pattern,
                        ],
                    )?;
                    results.push(LedgerUpdate::Reinforced);
                }
                None => {
                    tx.execute(
                        r#"
                        INSERT INTO correction_table
                            (pattern, incorrect_prediction, correct_result, occurrence_count,
                             reliability_score, last_seen_ms)
                        VALUES (?1, ?2, ?3, 1, ?4, ?5)
                        "#,
                        params![
                            m.pattern,
                            m.predicted.label(),
                            m.actual.label(),
                            self.params.initial_reliability,
                            now.timestamp_millis(),
                        ],
                    )?;
                    results.push(LedgerUpdate::Inserted);
                }
            }
        }

        tx.commit().context("failed to commit ledger transaction")?;
        Ok(results)
    }

    pub fn get(&self, pattern: &str) -> Result<Option<CorrectionEntry>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                r#"
                SELECT pattern, incorrect_prediction, correct_result, occurrence_count,
                       reliability_score, last_seen_ms
                FROM correction_table WHERE pattern = ?1
                "#,
                [pattern],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()
            .context("failed to read correction")?;

        let Some((pattern, wrong, right, count, score, seen_ms)) = row else {
            return Ok(None);
        };
        // Rows written by other tools may carry labels we cannot interpret.
        let (Some(incorrect_prediction), Some(correct_result)) =
            (Outcome::from_label(&wrong), Outcome::from_label(&right))
        else {
            return Ok(None);
        };
        Ok(Some(CorrectionEntry {
            pattern,
            incorrect_prediction,
            correct_result,
            occurrence_count: count,
            reliability_score: score,
            last_seen: Utc
                .timestamp_millis_opt(seen_ms)
                .single()
                .unwrap_or_else(Utc::now),
        }))
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM correction_table", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    // -------------------------------------------------------------------------
    // Session error log
    // -------------------------------------------------------------------------

    /// Remember a miss for the current session. Hits are ignored.
    pub fn record_session_error(
        &self,
        trade_id: &str,
        pattern: &str,
        predicted: Outcome,
        actual: Outcome,
    ) -> bool {
        if predicted == actual || pattern.is_empty() {
            return false;
        }
        self.session.write().push(SessionError {
            trade_id: trade_id.to_string(),
            pattern: pattern.to_string(),
            predicted,
            actual,
        });
        true
    }

    /// Drop the session entry for a deleted trade.
    pub fn forget_session_error(&self, trade_id: &str) -> bool {
        let mut session = self.session.write();
        let before = session.len();
        session.retain(|e| e.trade_id != trade_id);
        session.len() < before
    }

    /// Session misses on `pattern` whose real outcome was `actual`.
    pub fn session_hits(&self, pattern: &str, actual: Outcome) -> usize {
        self.session
            .read()
            .iter()
            .filter(|e| e.pattern == pattern && e.actual == actual)
            .count()
    }

    pub fn session_errors(&self) -> Vec<SessionError> {
        self.session.read().clone()
    }

    /// Clear the session log. The persistent table is untouched.
    pub fn reset_session(&self) -> usize {
        let mut session = self.session.write();
        let n = session.len();
        session.clear();
        n
    }
}

impl std::fmt::Debug for CorrectionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrectionLedger")
            .field("params", &self.params)
            .field("session_errors", &self.session.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Outcome::*;

    fn ledger() -> CorrectionLedger {
        CorrectionLedger::open_in_memory(LedgerParams::default()).unwrap()
    }

    #[test]
    fn correct_call_never_touches_table() {
        let l = ledger();
        assert_eq!(l.update("BBSS", Big, Big).unwrap(), LedgerUpdate::Ignored);
        assert!(l.get("BBSS").unwrap().is_none());

        l.update("BBSS", Big, Small).unwrap();
        let before = l.get("BBSS").unwrap().unwrap();
        assert_eq!(l.update("BBSS", Small, Small).unwrap(), LedgerUpdate::Ignored);
        assert_eq!(l.get("BBSS").unwrap().unwrap(), before);
    }

    #[test]
    fn repeated_miss_reinforces_up_to_cap() {
        let l = ledger();
        assert_eq!(l.update("BBSS", Big, Small).unwrap(), LedgerUpdate::Inserted);
        let first = l.get("BBSS").unwrap().unwrap();
        assert!((first.reliability_score - 0.5).abs() < 1e-9);
        assert_eq!(first.correct_result, Small);

        for _ in 0..8 {
            assert_eq!(l.update("BBSS", Big, Small).unwrap(), LedgerUpdate::Reinforced);
        }
        let e = l.get("BBSS").unwrap().unwrap();
        assert_eq!(e.occurrence_count, 9);
        assert!((e.reliability_score - 0.9).abs() < 1e-9);

        for _ in 0..10 {
            l.update("BBSS", Big, Small).unwrap();
        }
        let capped = l.get("BBSS").unwrap().unwrap();
        assert!((capped.reliability_score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn stale_rows_are_purged_on_next_write() {
        let l = ledger();
        let old = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        l.update_at("OLD", Big, Small, old).unwrap();
        assert!(l.get("OLD").unwrap().is_some());

        let now = old + Duration::days(8);
        l.update_at("NEW", Small, Big, now).unwrap();
        assert!(l.get("OLD").unwrap().is_none());
        assert!(l.get("NEW").unwrap().is_some());
        assert_eq!(l.len().unwrap(), 1);
    }

    #[test]
    fn rows_inside_retention_survive() {
        let l = ledger();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        l.update_at("KEEP", Big, Small, t0).unwrap();
        l.update_at("OTHER", Big, Small, t0 + Duration::days(6)).unwrap();
        assert!(l.get("KEEP").unwrap().is_some());
    }

    #[test]
    fn batch_update_mixes_hits_and_misses() {
        let l = ledger();
        let misses = vec![
            Misprediction { pattern: "B".into(), predicted: Big, actual: Small },
            Misprediction { pattern: "S".into(), predicted: Small, actual: Small },
            Misprediction { pattern: "B".into(), predicted: Big, actual: Small },
        ];
        let res = l.update_many_at(&misses, Utc::now()).unwrap();
        assert_eq!(
            res,
            vec![LedgerUpdate::Inserted, LedgerUpdate::Ignored, LedgerUpdate::Reinforced]
        );
        assert!(l.get("S").unwrap().is_none());
    }

    #[test]
    fn session_log_is_independent_of_table() {
        let l = ledger();
        l.update("BBSS", Big, Small).unwrap();
        assert!(l.record_session_error("t1", "BBSS", Big, Small));
        assert!(!l.record_session_error("t2", "BBSS", Big, Big));
        assert!(l.record_session_error("t3", "BBSS", Big, Small));
        assert_eq!(l.session_hits("BBSS", Small), 2);

        assert!(l.forget_session_error("t1"));
        assert!(!l.forget_session_error("t1"));
        assert_eq!(l.session_hits("BBSS", Small), 1);

        assert_eq!(l.reset_session(), 1);
        assert_eq!(l.session_hits("BBSS", Small), 0);
        assert!(l.get("BBSS").unwrap().is_some());
    }
}
