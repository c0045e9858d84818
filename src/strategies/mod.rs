// =============================================================================
// Strategies — independent next-outcome voters
// =============================================================================
//
// Each strategy is a pure function of the recent outcome window (oldest
// first) plus, for the memory-backed ones, the current Pattern Memory
// snapshot. A strategy with nothing to say returns `None`; the ensemble
// simply has one vote fewer.

pub mod markov;
pub mod pattern;
pub mod streak;
pub mod trend;

use serde::{Deserialize, Serialize};

use crate::memory::PatternMemory;
use crate::runtime_config::EnsembleParams;
use crate::types::{Outcome, StrategyKind};

/// One strategy's raw opinion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyVote {
    pub strategy: StrategyKind,
    pub prediction: Outcome,
    /// Raw confidence, 0-100.
    pub confidence: f64,
    /// Extra multiplier on top of the strategy weight (pattern length, run
    /// length). 1.0 when the strategy has no notion of strength.
    pub boost: f64,
}

impl StrategyVote {
    pub fn new(strategy: StrategyKind, prediction: Outcome, confidence: f64) -> Self {
        Self {
            strategy,
            prediction,
            confidence: confidence.clamp(0.0, 100.0),
            boost: 1.0,
        }
    }

    pub fn with_boost(mut self, boost: f64) -> Self {
        self.boost = boost;
        self
    }
}

/// Run a single strategy.
pub fn evaluate(
    kind: StrategyKind,
    history: &[Outcome],
    memory: &PatternMemory,
    params: &EnsembleParams,
) -> Option<StrategyVote> {
    match kind {
        StrategyKind::Pattern => pattern::vote(history, memory, params),
        StrategyKind::Trend => trend::vote(history),
        StrategyKind::Markov => markov::vote(history, memory),
        StrategyKind::Streak => streak::vote(history, params),
    }
}

/// Every strategy's vote, in `StrategyKind::ALL` order.
pub fn collect_votes(
    history: &[Outcome],
    memory: &PatternMemory,
    params: &EnsembleParams,
) -> Vec<StrategyVote> {
    StrategyKind::ALL
        .iter()
        .filter_map(|kind| evaluate(*kind, history, memory, params))
        .collect()
}
