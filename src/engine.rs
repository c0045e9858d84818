// =============================================================================
// Prediction Engine — the one object the outside world talks to
// =============================================================================
//
// Owns every piece of engine state and hands out cheap clones: each
// subsystem sits behind its own `Arc` and manages its own interior
// mutability, so a clone can be moved into a blocking task for background
// training.
//
// Thread safety:
//   - OutcomeStore / CorrectionLedger: SQLite connection behind a Mutex.
//   - MemoryTables: `RwLock<Arc<_>>` snapshots, swapped whole by the trainer.
//   - Trainer: pass lock guarantees at most one training pass at a time.
//
// Consistency: in `Background` mode a prediction issued while a pass is still
// running reads the previous snapshot. That staleness is accepted; the next
// request after the pass completes sees the new tables.
//
// Every public operation is infallible from the caller's point of view:
// storage errors are logged and turned into `false`, `None` or a fallback
// Signal.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::memory::{CorrectionLedger, MemoryTables, PatternMemory, StrategyWeights};
use crate::outcome_store::{AppendResult, NewTrade, OutcomeStore, TradeRecord};
use crate::pipeline::{PipelineContext, Signal, SignalPipeline};
use crate::runtime_config::{EngineConfig, TrainingMode};
use crate::signals::EnsembleScorer;
use crate::trainer::{TrainReport, Trainer};
use crate::types::{pattern_key, Outcome, SignalSource};

// =============================================================================
// Request / response types
// =============================================================================

fn default_source() -> SignalSource {
    SignalSource::External
}

/// One observed outcome, optionally with the call that was made for it.
#[derive(Debug, Clone, Deserialize)]
pub struct OutcomeReport {
    /// Generated when absent.
    #[serde(default)]
    pub trade_id: Option<String>,
    pub actual: Outcome,
    #[serde(default)]
    pub predicted: Option<Outcome>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default = "default_source")]
    pub source: SignalSource,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl OutcomeReport {
    pub fn new(
        actual: Outcome,
        predicted: Option<Outcome>,
        source: SignalSource,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            trade_id: None,
            actual,
            predicted,
            confidence: 0.0,
            source,
            timestamp,
        }
    }

    pub fn with_trade_id(mut self, trade_id: impl Into<String>) -> Self {
        self.trade_id = Some(trade_id.into());
        self
    }
}

/// Read-only ledger lookup result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub correct_result: Outcome,
    pub reliability: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_trades: usize,
    pub active_trades: usize,
    pub patterns: usize,
    pub error_matrix: usize,
    pub ledger_entries: usize,
    pub session_errors: usize,
    pub trained_through: i64,
    pub training_in_progress: bool,
}

// =============================================================================
// PredictionEngine
// =============================================================================

#[derive(Clone)]
pub struct PredictionEngine {
    config: Arc<EngineConfig>,
    store: Arc<OutcomeStore>,
    ledger: Arc<CorrectionLedger>,
    tables: Arc<MemoryTables>,
    trainer: Arc<Trainer>,
    scorer: Arc<EnsembleScorer>,
    pipeline: Arc<SignalPipeline>,
}

impl PredictionEngine {
    /// Open the persisted state named by `config`.
    ///
    /// An unreachable database degrades to a volatile in-memory one; missing
    /// or corrupt JSON tables degrade to empty ones.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let store = OutcomeStore::open(&config.database_path).or_else(|e| {
            warn!(error = %e, "outcome store unavailable; using in-memory store");
            OutcomeStore::open_in_memory()
        })?;
        let ledger = CorrectionLedger::open(&config.database_path, config.ledger.clone())
            .or_else(|e| {
                warn!(error = %e, "correction ledger unavailable; using in-memory ledger");
                CorrectionLedger::open_in_memory(config.ledger.clone())
            })?;
        let memory = PatternMemory::load_or_default(&config.pattern_memory_path);
        let weights = StrategyWeights::load_or_default(
            &config.strategy_weights_path,
            config.training.weight_floor,
            config.training.weight_ceiling,
        );
        info!(
            patterns = memory.patterns.len(),
            watermark = memory.trained_through,
            mode = ?config.training_mode,
            "prediction engine ready"
        );
        Ok(Self::assemble(config, store, ledger, MemoryTables::new(memory, weights)))
    }

    /// Engine over volatile SQLite databases and empty tables. JSON tables are
    /// still written to the configured paths after each pass.
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        let store = OutcomeStore::open_in_memory().context("in-memory store")?;
        let ledger = CorrectionLedger::open_in_memory(config.ledger.clone())
            .context("in-memory ledger")?;
        Ok(Self::assemble(config, store, ledger, MemoryTables::default()))
    }

    fn assemble(
        config: EngineConfig,
        store: OutcomeStore,
        ledger: CorrectionLedger,
        tables: MemoryTables,
    ) -> Self {
        Self {
            scorer: Arc::new(EnsembleScorer::new(config.ensemble.clone())),
            pipeline: Arc::new(SignalPipeline::new(&config)),
            config: Arc::new(config),
            store: Arc::new(store),
            ledger: Arc::new(ledger),
            tables: Arc::new(tables),
            trainer: Arc::new(Trainer::new()),
        }
    }

    // ── Outcome ingestion ───────────────────────────────────────────────

    /// Append an observed outcome and trigger training. Returns false when the
    /// record was rejected (duplicate trade id, store failure).
    pub fn report_outcome(&self, report: OutcomeReport) -> bool {
        let trade_id = report
            .trade_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let preceding = self.preceding_pattern();

        let trade = NewTrade {
            trade_id: trade_id.clone(),
            timestamp: report.timestamp,
            predicted: report.predicted,
            confidence: report.confidence,
            source: report.source,
            actual: Some(report.actual),
        };
        match self.store.append(&trade) {
            Ok(AppendResult::Inserted { seq }) => {
                debug!(%trade_id, seq, actual = %report.actual, "outcome reported");
            }
            Ok(AppendResult::Duplicate) => {
                warn!(%trade_id, "duplicate trade id rejected");
                return false;
            }
            Err(e) => {
                warn!(%trade_id, error = %e, "outcome not recorded");
                return false;
            }
        }

        if let (Some(predicted), Some(pattern)) = (report.predicted, preceding) {
            self.ledger
                .record_session_error(&trade_id, &pattern, predicted, report.actual);
        }
        self.trigger_training();
        true
    }

    /// Persist the call carried by `signal` as a pending trade.
    pub fn record_prediction(&self, trade_id: &str, signal: &Signal, timestamp: DateTime<Utc>) -> bool {
        let trade = NewTrade {
            trade_id: trade_id.to_string(),
            timestamp,
            predicted: signal.outcome(),
            confidence: signal.confidence,
            source: signal.source,
            actual: None,
        };
        match self.store.append(&trade) {
            Ok(AppendResult::Inserted { .. }) => true,
            Ok(AppendResult::Duplicate) => {
                warn!(%trade_id, "duplicate trade id rejected");
                false
            }
            Err(e) => {
                warn!(%trade_id, error = %e, "prediction not recorded");
                false
            }
        }
    }

    /// Fill in the real outcome of a pending trade, once.
    pub fn resolve_outcome(&self, trade_id: &str, actual: Outcome) -> bool {
        let pending = match self.store.get(trade_id) {
            Ok(Some(r)) if r.actual.is_none() => r,
            Ok(_) => return false,
            Err(e) => {
                warn!(%trade_id, error = %e, "trade lookup failed");
                return false;
            }
        };
        let preceding = self.preceding_pattern();
        match self.store.resolve(trade_id, actual) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                warn!(%trade_id, error = %e, "outcome not resolved");
                return false;
            }
        }
        if let (Some(predicted), Some(pattern)) = (pending.predicted, preceding) {
            self.ledger
                .record_session_error(trade_id, &pattern, predicted, actual);
        }
        self.trigger_training();
        true
    }

    pub fn delete_trade(&self, trade_id: &str) -> bool {
        match self.store.delete(trade_id) {
            Ok(deleted) => {
                if deleted {
                    self.ledger.forget_session_error(trade_id);
                    info!(%trade_id, "trade deleted");
                }
                deleted
            }
            Err(e) => {
                warn!(%trade_id, error = %e, "trade not deleted");
                false
            }
        }
    }

    /// The newest `session_pattern_length` active outcomes, if that many exist.
    fn preceding_pattern(&self) -> Option<String> {
        let len = self.config.ledger.session_pattern_length;
        let outcomes = self.active_outcomes(len);
        (len > 0 && outcomes.len() == len).then(|| pattern_key(&outcomes))
    }

    // ── Training ────────────────────────────────────────────────────────

    fn trigger_training(&self) {
        match self.config.training_mode {
            TrainingMode::Inline => {
                self.train(false);
            }
            TrainingMode::Background => {
                self.train_in_background(false);
            }
        }
    }

    /// Run a training pass now. False when there was not enough history.
    pub fn train(&self, include_archived: bool) -> bool {
        self.train_report(include_archived).trained
    }

    pub fn train_report(&self, include_archived: bool) -> TrainReport {
        self.trainer.run(
            &self.config,
            &self.store,
            &self.ledger,
            &self.tables,
            include_archived,
        )
    }

    /// Queue a pass on the blocking pool. Requests arriving while a pass runs
    /// are folded into it. Without a tokio runtime the pass runs inline and
    /// no handle is returned.
    pub fn train_in_background(&self, include_archived: bool) -> Option<JoinHandle<Option<TrainReport>>> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime; training inline");
            self.train(include_archived);
            return None;
        };
        let engine = self.clone();
        Some(handle.spawn_blocking(move || {
            engine.trainer.run_coalesced(
                &engine.config,
                &engine.store,
                &engine.ledger,
                &engine.tables,
                include_archived,
            )
        }))
    }

    /// Block until the running training pass, if any, has finished.
    pub fn wait_for_training(&self) {
        self.trainer.wait_idle();
    }

    // ── Prediction ──────────────────────────────────────────────────────

    /// Base ensemble call over the active history.
    pub fn predict(&self) -> Signal {
        let history = self.active_outcomes(self.config.ensemble.prediction_window);
        let (memory, weights) = self.tables.snapshot();
        self.scorer.predict(&history, &memory, &weights)
    }

    /// Run `base` through the full pipeline.
    pub fn process_signal(&self, base: Signal) -> Signal {
        let window = self.config.pipeline.pipeline_window;
        let trades = self.store.completed(window, false).unwrap_or_else(|e| {
            warn!(error = %e, "pipeline running without trade history");
            Vec::new()
        });
        let outcomes = trades.iter().filter_map(|t| t.actual).collect();
        let ctx = PipelineContext::new(
            outcomes,
            trades,
            self.tables.memory(),
            self.cid_accuracy(),
            &self.ledger,
        );
        self.pipeline.process(base, &ctx)
    }

    /// `predict` followed by `process_signal`.
    pub fn signal(&self) -> Signal {
        self.process_signal(self.predict())
    }

    fn active_outcomes(&self, limit: usize) -> Vec<Outcome> {
        match self.store.completed(limit, false) {
            Ok(records) => records.iter().filter_map(|r| r.actual).collect(),
            Err(e) => {
                warn!(error = %e, "outcome history unavailable");
                Vec::new()
            }
        }
    }

    /// Hit rate of CID-sourced trades over the accuracy window.
    fn cid_accuracy(&self) -> Option<f64> {
        let since = Utc::now() - Duration::days(self.config.pipeline.cid_accuracy_days);
        let trades = match self.store.completed_since(since) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "CID accuracy unavailable");
                return None;
            }
        };
        let scored: Vec<bool> = trades
            .iter()
            .filter(|t| t.source.is_cid())
            .filter_map(TradeRecord::is_win)
            .collect();
        if scored.is_empty() {
            return None;
        }
        Some(scored.iter().filter(|w| **w).count() as f64 / scored.len() as f64)
    }

    // ── Ledger & session ────────────────────────────────────────────────

    pub fn get_correction(&self, pattern: &str) -> Option<Correction> {
        match self.ledger.get(pattern) {
            Ok(entry) => entry.map(|e| Correction {
                correct_result: e.correct_result,
                reliability: e.reliability_score,
            }),
            Err(e) => {
                warn!(%pattern, error = %e, "correction lookup failed");
                None
            }
        }
    }

    /// Forget this session's misses. Long-run memory and ledger are kept.
    pub fn reset_session_memory(&self) -> usize {
        let cleared = self.ledger.reset_session();
        info!(cleared, "session memory reset");
        cleared
    }

    /// Archive the active segment and start a fresh session.
    pub fn new_session(&self) -> usize {
        let archived = self.store.archive_all().unwrap_or_else(|e| {
            warn!(error = %e, "active trades not archived");
            0
        });
        self.reset_session_memory();
        archived
    }

    // ── Diagnostics ─────────────────────────────────────────────────────

    pub fn recent_trades(&self, limit: usize, include_archived: bool) -> Vec<TradeRecord> {
        self.store.recent(limit, include_archived).unwrap_or_else(|e| {
            warn!(error = %e, "recent trades unavailable");
            Vec::new()
        })
    }

    pub fn stats(&self) -> EngineStats {
        let memory = self.tables.memory();
        EngineStats {
            total_trades: self.store.total_count(true).unwrap_or(0),
            active_trades: self.store.total_count(false).unwrap_or(0),
            patterns: memory.patterns.len(),
            error_matrix: memory.error_matrix.len(),
            ledger_entries: self.ledger.len().unwrap_or(0),
            session_errors: self.ledger.session_errors().len(),
            trained_through: memory.trained_through,
            training_in_progress: self.trainer.is_running(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CorrectionStatus, MasterDecision, Prediction, StrategyKind};
    use chrono::TimeZone;
    use Outcome::*;

    fn engine(dir: &std::path::Path, mode: TrainingMode) -> PredictionEngine {
        let config = EngineConfig {
            pattern_memory_path: dir.join("patterns.json"),
            strategy_weights_path: dir.join("weights.json"),
            training_mode: mode,
            ..EngineConfig::default()
        };
        PredictionEngine::in_memory(config).unwrap()
    }

    fn at(i: usize) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap() + Duration::seconds(i as i64)
    }

    fn feed(engine: &PredictionEngine, outcomes: &[Outcome]) {
        for (i, o) in outcomes.iter().enumerate() {
            assert!(engine.report_outcome(OutcomeReport::new(*o, None, SignalSource::External, at(i))));
        }
    }

    #[test]
    fn period_two_pairs_surface_pattern_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        feed(&e, &[Big, Big, Small, Small, Big, Big, Small, Small]);
        assert!(e.train(false));

        let s = e.predict();
        assert_eq!(s.prediction, Prediction::Big);
        assert_eq!(s.source, SignalSource::Strategy(StrategyKind::Pattern));
        let pattern_vote = s
            .votes
            .iter()
            .find(|v| v.strategy == StrategyKind::Pattern)
            .unwrap();
        assert_eq!(pattern_vote.prediction, Big);
        assert_eq!(s.detected_pattern, "SSBBSS");
    }

    #[test]
    fn repeated_calls_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        feed(&e, &[Big, Small, Small, Big, Small, Big, Big, Big, Small, Small, Big, Small]);
        assert_eq!(e.predict(), e.predict());
        assert_eq!(e.signal(), e.signal());
    }

    #[test]
    fn empty_engine_still_answers() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        assert!(!e.train(false));
        let s = e.signal();
        assert_eq!(s.source, SignalSource::Fallback);
        assert!((60.0..=99.0).contains(&s.confidence));
    }

    #[test]
    fn five_smalls_raise_dragon_streak() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        feed(&e, &[Small; 5]);
        let s = e.signal();
        assert_eq!(s.trend_engine_pred, Some(Small));
        assert_eq!(s.dragon_streak, 5);
        assert_eq!(s.prediction, Prediction::Small);
    }

    #[test]
    fn dragon_has_priority_over_reliable_correction() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        for i in 0..5 {
            let report = OutcomeReport::new(
                Small,
                Some(Small),
                SignalSource::Strategy(StrategyKind::Markov),
                at(i),
            );
            assert!(e.report_outcome(report));
        }
        for _ in 0..9 {
            e.ledger.update("SSSSS", Small, Big).unwrap();
        }
        let c = e.get_correction("SSSSS").unwrap();
        assert_eq!(c.correct_result, Big);
        assert!(c.reliability >= 0.9 - 1e-9);

        let s = e.signal();
        assert_eq!(s.prediction, Prediction::Small);
        assert_eq!(s.correction_status, Some(CorrectionStatus::BlockedByTrend));
        assert_eq!(s.master_decision, Some(MasterDecision::DragonPriority));
    }

    #[test]
    fn low_win_rate_forces_skip() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        for i in 0..20 {
            let actual = if i % 2 == 0 { Big } else { Small };
            let predicted = if i % 3 == 0 { actual } else { actual.opposite() };
            let report = OutcomeReport::new(
                actual,
                Some(predicted),
                SignalSource::Strategy(StrategyKind::Trend),
                at(i),
            );
            assert!(e.report_outcome(report));
        }
        let s = e.signal();
        assert_eq!(s.prediction, Prediction::SkipRisky);
        assert_eq!(s.source, SignalSource::Master(MasterDecision::LowWinRate));
        assert!(s.current_win_rate.unwrap() < 45.0);
    }

    #[test]
    fn confidence_is_always_clamped_or_skip() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        let outcomes = [Big, Big, Big, Small, Big, Small, Small, Big, Big, Small, Small, Small, Big];
        for (i, o) in outcomes.iter().enumerate() {
            e.report_outcome(OutcomeReport::new(*o, Some(Big), SignalSource::External, at(i)));
            let s = e.signal();
            assert!(s.is_skip() || (60.0..=99.0).contains(&s.confidence), "{}", s.confidence);
        }
    }

    #[test]
    fn duplicate_trade_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        let report = OutcomeReport::new(Big, None, SignalSource::External, at(0)).with_trade_id("dup");
        assert!(e.report_outcome(report.clone()));
        assert!(!e.report_outcome(report));
        assert_eq!(e.stats().total_trades, 1);
    }

    #[test]
    fn prediction_lifecycle_records_session_miss() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        feed(&e, &[Big, Big, Small, Small]);

        let signal = Signal::new(Big, 72.0, SignalSource::Strategy(StrategyKind::Pattern));
        assert!(e.record_prediction("p1", &signal, at(10)));
        assert!(!e.record_prediction("p1", &signal, at(11)));
        assert!(e.resolve_outcome("p1", Small));
        assert!(!e.resolve_outcome("p1", Big));
        assert!(!e.resolve_outcome("missing", Big));

        let errors = e.ledger.session_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].pattern, "BBSS");
        assert!(e.train(false));

        assert!(e.delete_trade("p1"));
        assert!(!e.delete_trade("p1"));
        assert!(e.ledger.session_errors().is_empty());
    }

    #[test]
    fn session_reset_keeps_long_run_memory() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        for (i, o) in [Big, Small, Big, Small, Big, Small].iter().enumerate() {
            e.report_outcome(OutcomeReport::new(*o, Some(o.opposite()), SignalSource::External, at(i)));
        }
        assert!(e.stats().session_errors > 0);
        let ledger_before = e.stats().ledger_entries;
        assert!(ledger_before > 0);
        let patterns_before = e.stats().patterns;

        assert!(e.reset_session_memory() > 0);
        let stats = e.stats();
        assert_eq!(stats.session_errors, 0);
        assert_eq!(stats.ledger_entries, ledger_before);
        assert_eq!(stats.patterns, patterns_before);
    }

    #[test]
    fn new_session_archives_active_history() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        feed(&e, &[Big, Small, Big, Big, Small, Small]);
        assert_eq!(e.new_session(), 6);

        let stats = e.stats();
        assert_eq!(stats.active_trades, 0);
        assert_eq!(stats.total_trades, 6);
        assert_eq!(e.predict().source, SignalSource::Fallback);
        assert!(!e.train(false));
        assert!(e.train(true));
        assert_eq!(e.recent_trades(10, true).len(), 6);
    }

    #[test]
    fn deleting_newest_trade_keeps_learned_state() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        for (i, o) in [Big, Small, Big, Small, Big, Small, Big, Small].iter().enumerate() {
            let report = OutcomeReport::new(*o, Some(Big), SignalSource::External, at(i))
                .with_trade_id(format!("t{i}"));
            assert!(e.report_outcome(report));
        }
        let before = e.ledger.get("B").unwrap().unwrap();
        let trained_through = e.stats().trained_through;
        assert_eq!(trained_through, 8);

        assert!(e.delete_trade("t7"));
        let report = e.train_report(false);
        assert!(report.trained);
        assert_eq!(report.windows, 0);
        assert_eq!(report.ledger_misses, 0);
        assert_eq!(e.stats().trained_through, trained_through);
        let after = e.ledger.get("B").unwrap().unwrap();
        assert_eq!(after.occurrence_count, before.occurrence_count);
    }

    #[test]
    fn late_resolution_is_learned() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        feed(&e, &[Small, Big, Small, Small, Big]);
        let call = Signal::new(Big, 70.0, SignalSource::Strategy(StrategyKind::Pattern));
        assert!(e.record_prediction("pending", &call, at(5)));
        assert!(e.report_outcome(OutcomeReport::new(Big, None, SignalSource::External, at(6))));
        assert_eq!(e.stats().trained_through, 6);
        assert!(e.get_correction("B").is_none());

        assert!(e.resolve_outcome("pending", Small));
        let stats = e.stats();
        assert_eq!(stats.trained_through, 7);
        assert!(stats.error_matrix > 0);
        assert_eq!(e.get_correction("B").unwrap().correct_result, Small);
    }

    #[test]
    fn wait_for_training_returns_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Inline);
        feed(&e, &[Big, Small, Small, Big, Big]);
        e.wait_for_training();
        assert!(!e.stats().training_in_progress);
        assert_eq!(e.stats().trained_through, 5);
    }

    #[test]
    fn background_mode_without_runtime_trains_inline() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Background);
        feed(&e, &[Big, Small, Small, Big, Big, Small]);
        assert_eq!(e.stats().trained_through, 6);
    }

    #[tokio::test]
    async fn background_training_catches_up() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), TrainingMode::Background);
        feed(&e, &[Big, Small, Small, Big, Big, Small, Small]);

        if let Some(handle) = e.train_in_background(false) {
            handle.await.unwrap();
        }
        for _ in 0..200 {
            if !e.trainer.is_running() && e.stats().trained_through == 7 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let stats = e.stats();
        assert_eq!(stats.trained_through, 7);
        assert!(stats.patterns > 0);
        assert!(dir.path().join("patterns.json").exists());
    }
}
