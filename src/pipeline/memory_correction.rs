// Memory correction: consult the correction ledger for the newest pattern.
//
// Session misses on the same pattern add a small reliability bonus. A
// correction that fights an active dragon is blocked and only reported.

use anyhow::Result;
use tracing::debug;

use super::{PipelineContext, Signal};
use crate::runtime_config::{EnsembleParams, LedgerParams, PipelineParams};
use crate::types::{pattern_key, CorrectionStatus, SignalSource};

const LONGEST: usize = 8;
const SHORTEST: usize = 3;

pub fn apply(
    signal: &mut Signal,
    ctx: &PipelineContext<'_>,
    params: &PipelineParams,
    ledger_params: &LedgerParams,
    ensemble: &EnsembleParams,
) -> Result<()> {
    let Some(current) = signal.outcome() else {
        return Ok(());
    };
    let outcomes = &ctx.outcomes;

    for len in (SHORTEST..=LONGEST.min(outcomes.len())).rev() {
        let key = pattern_key(&outcomes[outcomes.len() - len..]);
        let Some(entry) = ctx.ledger.get(&key)? else {
            continue;
        };
        let hits = ctx.ledger.session_hits(&key, entry.correct_result);
        let reliability = (entry.reliability_score
            + ledger_params.session_reliability_bonus * hits as f64)
            .min(ledger_params.reliability_cap);
        if reliability < params.correction_min_reliability {
            continue;
        }

        let correction = entry.correct_result;
        signal.correction_pattern = Some(key.clone());

        let (run_outcome, run) = ctx.current_run();
        let dragon_active = run >= params.dragon_threshold;
        if dragon_active && run_outcome.is_some_and(|o| o != correction) {
            signal.correction_status = Some(CorrectionStatus::BlockedByTrend);
            let alert = format!(
                "MEMORY: {key} suggests {correction} ({:.0}%) but a {run}-run dragon has priority",
                reliability * 100.0
            );
            signal.memory_alert = Some(alert.clone());
            signal.push_alert(alert);
            debug!(pattern = %key, run, "correction blocked by dragon");
        } else if correction != current {
            signal.prediction = correction.into();
            signal.confidence = ensemble.clamp_confidence(signal.confidence.max(reliability * 100.0));
            signal.source = SignalSource::MemoryCorrection;
            signal.correction_status = Some(CorrectionStatus::Applied);
            signal.memory_alert = Some(format!(
                "MEMORY: {key} corrected {current} -> {correction} ({:.0}%)",
                reliability * 100.0
            ));
            debug!(pattern = %key, from = %current, to = %correction, reliability, "correction applied");
        } else {
            signal.correction_status = Some(CorrectionStatus::Agrees);
        }
        return Ok(());
    }
    Ok(())
}
