// Streak / Fibonacci heuristic.
//
// Runs of 2 or 3 are bet to continue; from `streak_reversal_length` on the
// run is bet to break.

use super::StrategyVote;
use crate::runtime_config::EnsembleParams;
use crate::types::{current_run, Outcome, StrategyKind};

pub fn vote(history: &[Outcome], params: &EnsembleParams) -> Option<StrategyVote> {
    let (Some(last), run) = current_run(history) else {
        return None;
    };

    if run >= params.streak_reversal_length {
        let confidence = (50.0 + 5.0 * run as f64).min(90.0);
        let boost = (run as f64 / 3.0).max(1.0);
        return Some(
            StrategyVote::new(StrategyKind::Streak, last.opposite(), confidence).with_boost(boost),
        );
    }
    if matches!(run, 2 | 3) {
        return Some(StrategyVote::new(
            StrategyKind::Streak,
            last,
            55.0 + 3.0 * run as f64,
        ));
    }
    None
}
