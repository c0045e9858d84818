// =============================================================================
// Trainer — single-writer training pass over the outcome log
// =============================================================================
//
// One pass:
//   1. read the newest `training_window` completed records;
//   2. rescore strategy weights from the last `weight_window` trades whose
//      source maps to a strategy;
//   3. decay the pattern table and error matrix, then accumulate every window
//      whose target's outcome arrived after the memory's watermark;
//   4. rebuild the Markov table from the whole window;
//   5. prune the pattern table to capacity;
//   6. write ledger misses in one transaction, save both JSON documents and
//      swap the new snapshot in.
//
// Steps 2-5 are a pure function of (previous memory, previous weights,
// records) so they can be tested without any I/O.
//
// The watermark is an `outcome_seq`, not an insertion seq: a prediction
// resolved after newer rows were trained still gets learned, and deleting the
// newest row never rewinds it.
//
// At most one pass runs per process: `run` holds `pass_lock` for its whole
// duration. Background requests that find the lock taken set `rerun`; the
// holder re-checks the flag after releasing the lock and runs again if one
// slipped in.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::memory::{
    CorrectionLedger, MarkovTable, MemoryTables, Misprediction, PatternMemory, StrategyWeights,
};
use crate::outcome_store::{OutcomeStore, TradeRecord};
use crate::runtime_config::{EngineConfig, TrainingParams};
use crate::types::{pattern_key, Outcome, StrategyKind};

// =============================================================================
// Report
// =============================================================================

/// Summary of one training pass, returned to callers and logged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainReport {
    pub trained: bool,
    /// Completed records read.
    pub records: usize,
    /// Pattern windows accumulated (all lengths).
    pub windows: usize,
    /// Ledger misses submitted.
    pub ledger_misses: usize,
    pub patterns: usize,
    pub evicted: usize,
    pub trained_through: i64,
}

impl TrainReport {
    fn not_trained(records: usize) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }
}

/// Output of the pure part of a pass.
#[derive(Debug, Clone)]
pub struct TrainingPass {
    pub memory: PatternMemory,
    pub weights: StrategyWeights,
    pub misses: Vec<Misprediction>,
    pub report: TrainReport,
}

// =============================================================================
// Pure pass
// =============================================================================

/// Compute the next memory and weights from `records` (oldest first).
///
/// `high_water` is the highest `outcome_seq` the store ever issued; a
/// watermark beyond it means the database was replaced and learning restarts
/// from zero.
pub fn compute_pass(
    params: &TrainingParams,
    previous: &PatternMemory,
    previous_weights: &StrategyWeights,
    records: &[TradeRecord],
    high_water: i64,
) -> TrainingPass {
    let mut memory = previous.clone();
    if memory.trained_through > high_water {
        debug!(
            watermark = memory.trained_through,
            high_water, "watermark ahead of store; resetting"
        );
        memory.trained_through = 0;
    }
    let watermark = memory.trained_through;

    // ── 1. Strategy weights ─────────────────────────────────────────────
    let mut weights = previous_weights.clone();
    weights.rescore(
        &strategy_tallies(records, params.weight_window),
        params.weight_floor,
        params.weight_ceiling,
    );

    // ── 2. Decay, then accumulate new windows ───────────────────────────
    memory.decay(
        params.pattern_decay,
        params.error_matrix_decay,
        params.min_retained_mass,
    );

    let completed: Vec<(&TradeRecord, Outcome)> = records
        .iter()
        .filter_map(|r| Some((r, r.actual?)))
        .collect();
    let outcomes: Vec<Outcome> = completed.iter().map(|(_, o)| *o).collect();
    let n = outcomes.len();
    let max_len = params.max_pattern_length.min(n.saturating_sub(1));
    let mut misses = Vec::new();
    let mut windows = 0;

    for len in 1..=max_len {
        for target in len..n {
            let dist = n - target;
            if dist > params.recency_horizon {
                continue;
            }
            let record = completed[target].0;
            if record.outcome_seq.unwrap_or(0) <= watermark {
                continue;
            }
            let key = pattern_key(&outcomes[target - len..target]);
            let next = outcomes[target];
            let band = params.band(dist);

            memory
                .patterns
                .entry(key.clone())
                .or_default()
                .add(next, params.pattern_band_weights[band]);
            windows += 1;

            let Some(predicted) = record.predicted else {
                continue;
            };
            let entry = memory.error_matrix.entry(key.clone()).or_default();
            if predicted == next {
                entry.wins += params.error_band_weights[band];
            } else {
                entry.losses += params.error_band_weights[band];
                misses.push(Misprediction {
                    pattern: key,
                    predicted,
                    actual: next,
                });
            }
        }
    }

    // ── 3. Markov, rebuilt from scratch ─────────────────────────────────
    memory.markov_probabilities = MarkovTable::from_sequence(&outcomes);

    // ── 4. Prune ────────────────────────────────────────────────────────
    let evicted = memory.prune(params.pattern_capacity);

    if let Some(newest) = records.iter().filter_map(|r| r.outcome_seq).max() {
        memory.trained_through = memory.trained_through.max(newest);
    }

    let report = TrainReport {
        trained: true,
        records: records.len(),
        windows,
        ledger_misses: misses.len(),
        patterns: memory.patterns.len(),
        evicted,
        trained_through: memory.trained_through,
    };

    TrainingPass {
        memory,
        weights,
        misses,
        report,
    }
}

/// (wins, total) per strategy over the last `window` trades attributed to a
/// strategy and carrying both sides of the call.
fn strategy_tallies(
    records: &[TradeRecord],
    window: usize,
) -> BTreeMap<StrategyKind, (usize, usize)> {
    let mut tallies = BTreeMap::new();
    let scored = records
        .iter()
        .rev()
        .filter_map(|r| Some((r.source.strategy()?, r.is_win()?)))
        .take(window);
    for (kind, won) in scored {
        let t = tallies.entry(kind).or_insert((0, 0));
        t.1 += 1;
        if won {
            t.0 += 1;
        }
    }
    tallies
}

// =============================================================================
// Trainer
// =============================================================================

#[derive(Debug, Default)]
pub struct Trainer {
    pass_lock: Mutex<()>,
    rerun: AtomicBool,
}

impl Trainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one pass, waiting for any pass already in progress.
    pub fn run(
        &self,
        config: &EngineConfig,
        store: &OutcomeStore,
        ledger: &CorrectionLedger,
        tables: &MemoryTables,
        include_archived: bool,
    ) -> TrainReport {
        let guard = self.pass_lock.lock();
        self.run_locked(&guard, config, store, ledger, tables, include_archived)
    }

    /// Run passes until no request is left pending. Returns `None` without
    /// training when another pass holds the lock; that holder sees the
    /// request before it returns.
    pub fn run_coalesced(
        &self,
        config: &EngineConfig,
        store: &OutcomeStore,
        ledger: &CorrectionLedger,
        tables: &MemoryTables,
        include_archived: bool,
    ) -> Option<TrainReport> {
        self.rerun.store(true, Ordering::SeqCst);
        let mut last = None;
        loop {
            let Some(guard) = self.pass_lock.try_lock() else {
                return last;
            };
            while self.rerun.swap(false, Ordering::SeqCst) {
                last = Some(self.run_locked(&guard, config, store, ledger, tables, include_archived));
            }
            drop(guard);
            // a request that lost the try_lock race after the last swap
            if !self.rerun.load(Ordering::SeqCst) {
                return last;
            }
        }
    }

    /// True while a pass holds the lock.
    pub fn is_running(&self) -> bool {
        self.pass_lock.is_locked()
    }

    /// Block until the running pass, if any, has finished.
    pub fn wait_idle(&self) {
        drop(self.pass_lock.lock());
    }

    fn run_locked(
        &self,
        _guard: &MutexGuard<'_, ()>,
        config: &EngineConfig,
        store: &OutcomeStore,
        ledger: &CorrectionLedger,
        tables: &MemoryTables,
        include_archived: bool,
    ) -> TrainReport {
        let params = &config.training;

        let records = match store.completed(params.training_window, include_archived) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "training skipped: outcome store unreadable");
                return TrainReport::not_trained(0);
            }
        };
        if records.len() < params.min_training_records {
            debug!(
                records = records.len(),
                required = params.min_training_records,
                "not enough history to train"
            );
            return TrainReport::not_trained(records.len());
        }
        let high_water = match store.outcome_high_water() {
            Ok(seq) => seq,
            Err(e) => {
                warn!(error = %e, "training skipped: outcome store unreadable");
                return TrainReport::not_trained(records.len());
            }
        };

        let (memory, weights) = tables.snapshot();
        let pass = compute_pass(params, &memory, &weights, &records, high_water);

        if !pass.misses.is_empty() {
            if let Err(e) = ledger.update_many_at(&pass.misses, Utc::now()) {
                warn!(error = %e, misses = pass.misses.len(), "correction ledger update failed");
            }
        }
        if let Err(e) = pass.memory.save(&config.pattern_memory_path) {
            warn!(error = %e, "pattern memory not persisted");
        }
        if let Err(e) = pass.weights.save(&config.strategy_weights_path) {
            warn!(error = %e, "strategy weights not persisted");
        }

        let report = pass.report;
        tables.replace(pass.memory, pass.weights);

        info!(
            records = report.records,
            windows = report.windows,
            misses = report.ledger_misses,
            patterns = report.patterns,
            evicted = report.evicted,
            watermark = report.trained_through,
            "training pass complete"
        );
        report
    }
}
