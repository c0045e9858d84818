// Read-only view of history shared by every stage of one pipeline run.

use std::sync::Arc;

use crate::memory::{CorrectionLedger, PatternMemory};
use crate::outcome_store::TradeRecord;
use crate::runtime_config::PipelineParams;
use crate::types::{current_run, Outcome};

pub struct PipelineContext<'a> {
    /// Active-segment outcomes, oldest first.
    pub outcomes: Vec<Outcome>,
    /// Completed active-segment trades, oldest first.
    pub trades: Vec<TradeRecord>,
    pub memory: Arc<PatternMemory>,
    /// Hit rate (0-1) of CID-sourced trades over the accuracy window, if any
    /// were scored.
    pub cid_accuracy: Option<f64>,
    pub ledger: &'a CorrectionLedger,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        outcomes: Vec<Outcome>,
        trades: Vec<TradeRecord>,
        memory: Arc<PatternMemory>,
        cid_accuracy: Option<f64>,
        ledger: &'a CorrectionLedger,
    ) -> Self {
        Self {
            outcomes,
            trades,
            memory,
            cid_accuracy,
            ledger,
        }
    }

    /// The newest `n` outcomes.
    pub fn tail(&self, n: usize) -> &[Outcome] {
        &self.outcomes[self.outcomes.len().saturating_sub(n)..]
    }

    pub fn current_run(&self) -> (Option<Outcome>, usize) {
        current_run(&self.outcomes)
    }

    /// Loss-rate threshold above which a pattern counts as a trap.
    ///
    /// Recent CID accuracy lowers it (more aggressive); with no CID history
    /// the midpoint 0.60 is used.
    pub fn cid_threshold(&self, params: &PipelineParams) -> f64 {
        match self.cid_accuracy {
            Some(acc) => (params.cid_threshold_max - acc * 0.15)
                .clamp(params.cid_threshold_min, params.cid_threshold_max),
            None => 0.60_f64.clamp(params.cid_threshold_min, params.cid_threshold_max),
        }
    }

    /// Win/loss flags of the newest `window` scored trades, oldest first.
    pub fn recent_results(&self, window: usize) -> Vec<bool> {
        let mut results: Vec<bool> = self
            .trades
            .iter()
            .rev()
            .filter_map(TradeRecord::is_win)
            .take(window)
            .collect();
        results.reverse();
        results
    }
}
