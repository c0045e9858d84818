// =============================================================================
// Master Selector — final arbitration between the engine votes
// =============================================================================
//
// Precedence, first match wins:
//   1. Performance gate: rolling win rate over the last `win_rate_window`
//      scored trades below `win_rate_floor` (once `min_trades_for_gate`
//      trades exist), or a losing streak of `max_loss_streak` -> SKIP/RISKY.
//   2. Dragon override: streak >= `dragon_override` -> follow the run.
//   3. CID override: validated trap with confidence > `cid_override_confidence`.
//   4. Applied memory correction stands.
//   5. Majority of main / CID / trend votes (two of three).
//   6. Otherwise the current call stands.
//
// The source is only rewritten when the selector changes the call, so
// strategy attribution survives for weight scoring.
// =============================================================================

use anyhow::Result;
use tracing::{debug, info};

use super::{PipelineContext, Signal};
use crate::runtime_config::{EnsembleParams, PipelineParams};
use crate::types::{
    CorrectionStatus, MasterDecision, Outcome, Prediction, SignalSource, VolatilityStatus,
    WarningColor,
};

pub fn apply(
    signal: &mut Signal,
    ctx: &PipelineContext<'_>,
    params: &PipelineParams,
    ensemble: &EnsembleParams,
) -> Result<()> {
    // ── Diagnostics carried on every signal ─────────────────────────────
    let volatility_score = signal.volatility * 100.0;
    signal.volatility_score = Some(volatility_score);
    signal.volatility_status = Some(VolatilityStatus::from_score(volatility_score));

    let results = ctx.recent_results(params.win_rate_window);
    let win_rate = if results.is_empty() {
        100.0
    } else {
        results.iter().filter(|w| **w).count() as f64 / results.len() as f64 * 100.0
    };
    let loss_streak = results.iter().rev().take_while(|w| !**w).count();
    signal.current_win_rate = Some(win_rate);
    signal.loss_streak = loss_streak;

    // ── 1. Performance gate ─────────────────────────────────────────────
    let cold_table = results.len() >= params.min_trades_for_gate && win_rate < params.win_rate_floor;
    let losing_run = loss_streak >= params.max_loss_streak;
    if cold_table || losing_run {
        info!(win_rate, loss_streak, trades = results.len(), "performance gate: SKIP/RISKY");
        signal.prediction = Prediction::SkipRisky;
        signal.confidence = win_rate;
        signal.source = SignalSource::Master(MasterDecision::LowWinRate);
        signal.master_decision = Some(MasterDecision::LowWinRate);
        signal.warning_color = Some(WarningColor::Orange);
        signal.push_alert(format!(
            "SKIP: win rate {win_rate:.0}% over {} trades, {loss_streak} losses in a row",
            results.len()
        ));
        return Ok(());
    }

    let Some(current) = signal.outcome() else {
        return Ok(());
    };

    // ── 2-6. Arbitration ────────────────────────────────────────────────
    let dragon = signal
        .trend_engine_pred
        .filter(|_| signal.dragon_streak >= params.dragon_override);
    let cid_override = signal.cid_engine_pred.filter(|_| {
        signal.cid_trap_detected
            && signal.cid_validated
            && signal
                .cid_confidence
                .is_some_and(|c| c > params.cid_override_confidence)
    });

    if let Some(trend) = dragon {
        let confidence = (85.0 + signal.dragon_streak as f64).min(99.0);
        set_call(signal, trend, confidence, MasterDecision::DragonPriority);
    } else if let Some(cid) = cid_override {
        let confidence = signal.cid_confidence.unwrap_or(signal.confidence);
        set_call(signal, cid, confidence, MasterDecision::CidOverride);
    } else if signal.correction_status == Some(CorrectionStatus::Applied) {
        signal.master_decision = Some(MasterDecision::MemoryCorrection);
    } else {
        majority(signal, current);
    }

    signal.confidence = ensemble.clamp_confidence(signal.confidence);
    signal.warning_color = Some(if signal.confidence >= params.green_confidence {
        WarningColor::Green
    } else {
        WarningColor::Orange
    });
    debug!(
        prediction = %signal.prediction,
        decision = ?signal.master_decision,
        confidence = signal.confidence,
        "master selection"
    );
    Ok(())
}

/// Two of the three engine votes decide; without a majority nothing changes.
fn majority(signal: &mut Signal, current: Outcome) {
    let votes = [
        signal.main_engine_pred,
        signal.cid_engine_pred,
        signal.trend_engine_pred,
    ];
    let big = votes.iter().filter(|v| **v == Some(Outcome::Big)).count();
    let small = votes.iter().filter(|v| **v == Some(Outcome::Small)).count();
    let winner = if big >= 2 {
        Outcome::Big
    } else if small >= 2 {
        Outcome::Small
    } else {
        return;
    };
    if winner == current {
        signal.master_decision = Some(MasterDecision::Consensus);
    } else {
        let confidence = signal.confidence;
        set_call(signal, winner, confidence, MasterDecision::Consensus);
    }
}

fn set_call(signal: &mut Signal, outcome: Outcome, confidence: f64, decision: MasterDecision) {
    if signal.outcome() != Some(outcome) {
        signal.source = SignalSource::Master(decision);
    }
    signal.prediction = outcome.into();
    signal.confidence = confidence;
    signal.master_decision = Some(decision);
}
