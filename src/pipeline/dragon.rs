// Trend / dragon follower: bet on the current run continuing once it is long
// enough. The vote is consumed by the Master Selector.

use anyhow::Result;

use super::{PipelineContext, Signal};
use crate::runtime_config::PipelineParams;

pub fn apply(signal: &mut Signal, ctx: &PipelineContext<'_>, params: &PipelineParams) -> Result<()> {
    let (run_outcome, run) = ctx.current_run();
    match run_outcome {
        Some(outcome) if run >= params.dragon_threshold => {
            signal.trend_engine_pred = Some(outcome);
            signal.trend_confidence = Some((70.0 + 5.0 * run as f64).min(99.0));
            signal.dragon_streak = run;
            signal.push_alert(format!("DRAGON: {run}x {outcome}"));
        }
        _ => {
            signal.trend_engine_pred = signal.outcome();
            signal.dragon_streak = 0;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::CorrectionLedger;
    use crate::runtime_config::LedgerParams;
    use crate::types::{Outcome, SignalSource};
    use std::sync::Arc;
    use Outcome::*;

    fn follow(outcomes: Vec<Outcome>, current: Outcome) -> Signal {
        let ledger = CorrectionLedger::open_in_memory(LedgerParams::default()).unwrap();
        let ctx = PipelineContext::new(outcomes, vec![], Arc::default(), None, &ledger);
        let mut s = Signal::new(current, 70.0, SignalSource::Combined);
        apply(&mut s, &ctx, &PipelineParams::default()).unwrap();
        s
    }

    #[test]
    fn five_smalls_make_a_dragon() {
        let s = follow(vec![Small; 5], Big);
        assert_eq!(s.trend_engine_pred, Some(Small));
        assert_eq!(s.dragon_streak, 5);
        assert!((s.trend_confidence.unwrap() - 95.0).abs() < 1e-9);
        // the follower only votes
        assert_eq!(s.outcome(), Some(Big));
    }

    #[test]
    fn short_run_echoes_current_call() {
        let s = follow(vec![Big, Small, Small], Big);
        assert_eq!(s.trend_engine_pred, Some(Big));
        assert_eq!(s.dragon_streak, 0);
        assert!(s.alerts.is_empty());
    }
}
