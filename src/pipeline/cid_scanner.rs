// =============================================================================
// CID Scanner — pattern-trap detector
// =============================================================================
//
// Looks up the error matrix for the newest 5/4/3-outcome pattern. A pattern
// with enough observations whose loss rate exceeds the adaptive threshold is
// a trap: the scanner votes for the opposite of the base call. Three
// independent checks then corroborate the reversal:
//
//   skew        |losses - wins| / total >= validation_skew
//   ledger      a ledger entry for the pattern points the same way with
//               reliability > validation_reliability
//   volatility  flip rate over the scan window > validation_volatility
//
// Two passing checks validate the trap. The scanner only fills its own
// fields; the Master Selector decides whether the reversal is taken.
// =============================================================================

use anyhow::Result;
use tracing::debug;

use super::{PipelineContext, Signal};
use crate::runtime_config::PipelineParams;
use crate::types::{flip_rate, pattern_key};

pub fn apply(signal: &mut Signal, ctx: &PipelineContext<'_>, params: &PipelineParams) -> Result<()> {
    let Some(base) = signal.outcome() else {
        return Ok(());
    };
    let threshold = ctx.cid_threshold(params);
    signal.cid_threshold = Some(threshold);
    signal.cid_engine_pred = Some(base);

    let window = ctx.tail(params.cid_window);
    for &len in &params.cid_pattern_lengths {
        if window.len() < len {
            continue;
        }
        let key = pattern_key(&window[window.len() - len..]);
        let Some(entry) = ctx.memory.error_matrix.get(&key) else {
            continue;
        };
        let total = entry.total();
        if total < params.cid_min_observations {
            continue;
        }

        let loss_rate = entry.loss_rate();
        let win_rate = entry.win_rate();
        signal.cid_pattern = Some(key.clone());

        if win_rate >= params.win_zone_rate {
            signal.win_zone = true;
            signal.push_alert(format!("WIN ZONE: {key} wins {:.0}%", win_rate * 100.0));
        }

        if loss_rate > threshold {
            let reversed = base.opposite();
            signal.cid_engine_pred = Some(reversed);
            signal.cid_trap_detected = true;
            signal.cid_confidence = Some(loss_rate * 100.0);

            let skew = (entry.losses - entry.wins).abs() / total >= params.validation_skew;
            let ledger = ctx
                .ledger
                .get(&key)?
                .map(|c| c.reliability_score > params.validation_reliability && c.correct_result == reversed)
                .unwrap_or(false);
            let volatile = flip_rate(window) > params.validation_volatility;

            let passed = [skew, ledger, volatile].iter().filter(|c| **c).count() as u8;
            signal.cid_checks_passed = passed;
            signal.cid_validated = passed >= 2;
            signal.push_alert(format!(
                "CID TRAP: {key} loses {:.0}% (threshold {:.0}%), {passed}/3 checks",
                loss_rate * 100.0,
                threshold * 100.0
            ));
            debug!(pattern = %key, loss_rate, threshold, passed, "pattern trap detected");
        }
        break;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::pattern_memory::ErrorMatrixEntry;
    use crate::memory::{CorrectionLedger, PatternMemory};
    use crate::runtime_config::LedgerParams;
    use crate::types::{Outcome, SignalSource};
    use std::sync::Arc;
    use Outcome::*;

    fn memory(key: &str, wins: f64, losses: f64) -> Arc<PatternMemory> {
        let mut m = PatternMemory::default();
        m.error_matrix.insert(key.to_string(), ErrorMatrixEntry { wins, losses });
        Arc::new(m)
    }

    fn history() -> Vec<Outcome> {
        // ends in BSBSB
        vec![Big, Big, Small, Small, Big, Small, Big, Small, Big, Small, Big, Small, Big, Small, Big]
    }

    #[test]
    fn trap_reverses_engine_vote_but_not_prediction() {
        let ledger = CorrectionLedger::open_in_memory(LedgerParams::default()).unwrap();
        let ctx = PipelineContext::new(history(), vec![], memory("BSBSB", 1.0, 9.0), None, &ledger);
        let mut s = Signal::new(Big, 70.0, SignalSource::Combined);
        apply(&mut s, &ctx, &PipelineParams::default()).unwrap();

        assert!(s.cid_trap_detected);
        assert_eq!(s.cid_engine_pred, Some(Small));
        assert_eq!(s.outcome(), Some(Big));
        assert!((s.cid_confidence.unwrap() - 90.0).abs() < 1e-9);
        // skew 0.8 and flip rate > 0.5; no ledger entry
        assert_eq!(s.cid_checks_passed, 2);
        assert!(s.cid_validated);
    }

    #[test]
    fn ledger_check_counts_when_reliable_and_aligned() {
        let ledger = CorrectionLedger::open_in_memory(LedgerParams::default()).unwrap();
        for _ in 0..4 {
            ledger.update("BSBSB", Big, Small).unwrap();
        }
        let ctx = PipelineContext::new(history(), vec![], memory("BSBSB", 1.0, 9.0), None, &ledger);
        let mut s = Signal::new(Big, 70.0, SignalSource::Combined);
        apply(&mut s, &ctx, &PipelineParams::default()).unwrap();
        assert_eq!(s.cid_checks_passed, 3);
    }

    #[test]
    fn thin_entries_fall_through_to_shorter_patterns() {
        let ledger = CorrectionLedger::open_in_memory(LedgerParams::default()).unwrap();
        let mut m = PatternMemory::default();
        m.error_matrix.insert("BSBSB".into(), ErrorMatrixEntry { wins: 0.0, losses: 4.0 });
        m.error_matrix.insert("SBSB".into(), ErrorMatrixEntry { wins: 8.0, losses: 2.0 });
        let ctx = PipelineContext::new(history(), vec![], Arc::new(m), None, &ledger);
        let mut s = Signal::new(Small, 70.0, SignalSource::Combined);
        apply(&mut s, &ctx, &PipelineParams::default()).unwrap();

        assert!(!s.cid_trap_detected);
        assert!(s.win_zone);
        assert_eq!(s.cid_pattern.as_deref(), Some("SBSB"));
        assert_eq!(s.cid_engine_pred, Some(Small));
    }

    #[test]
    fn no_matrix_data_passes_base_through() {
        let ledger = CorrectionLedger::open_in_memory(LedgerParams::default()).unwrap();
        let ctx = PipelineContext::new(history(), vec![], Arc::default(), None, &ledger);
        let mut s = Signal::new(Small, 70.0, SignalSource::Combined);
        apply(&mut s, &ctx, &PipelineParams::default()).unwrap();
        assert_eq!(s.cid_engine_pred, Some(Small));
        assert!(s.cid_pattern.is_none());
        assert!((s.cid_threshold.unwrap() - 0.60).abs() < 1e-9);
    }
}
