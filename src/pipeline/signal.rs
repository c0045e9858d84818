// =============================================================================
// Signal — the record every pipeline stage reads and amends
// =============================================================================
//
// Built by the ensemble, then passed through the pipeline stages in a fixed
// order. Every field a stage may set is declared here; a field left at
// `None` / `false` / `0` means the stage had nothing to report.
//
// A Signal is never persisted as-is. Only prediction, confidence and source
// end up in a TradeRecord.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{
    CorrectionStatus, MasterDecision, Outcome, Prediction, SignalSource, StrategyKind,
    VolatilityStatus, WarningColor,
};

/// Contribution of a single strategy vote to the ensemble buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteContribution {
    pub strategy: StrategyKind,
    pub prediction: Outcome,
    pub confidence: f64,
    /// Strategy weight times vote boost.
    pub weight: f64,
    /// `weight * confidence / 100`, credited to `prediction`.
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    // ── Final call ──────────────────────────────────────────────────────
    pub prediction: Prediction,
    /// 60-99 for BIG/SMALL. For SKIP/RISKY it carries the rolling win rate.
    pub confidence: f64,
    pub source: SignalSource,
    /// Calibrated probability (percent) from the risk gate.
    pub probability: Option<f64>,

    // ── Ensemble ────────────────────────────────────────────────────────
    /// Last six outcomes as a pattern key, or "NONE".
    pub detected_pattern: String,
    /// Flip rate of the ensemble window, 0-1.
    pub volatility: f64,
    pub votes: Vec<VoteContribution>,
    pub big_score: f64,
    pub small_score: f64,

    // ── Free-form notes ─────────────────────────────────────────────────
    pub alerts: Vec<String>,
    /// Stage failures and skips.
    pub diagnostics: Vec<String>,

    // ── Main engine ─────────────────────────────────────────────────────
    pub main_engine_pred: Option<Outcome>,

    // ── CID scanner ─────────────────────────────────────────────────────
    pub cid_engine_pred: Option<Outcome>,
    pub cid_trap_detected: bool,
    /// Loss rate of the matched pattern, percent.
    pub cid_confidence: Option<f64>,
    pub cid_threshold: Option<f64>,
    pub cid_pattern: Option<String>,
    pub cid_validated: bool,
    pub cid_checks_passed: u8,
    pub win_zone: bool,

    // ── Memory correction ───────────────────────────────────────────────
    pub correction_status: Option<CorrectionStatus>,
    pub correction_pattern: Option<String>,
    pub memory_alert: Option<String>,

    // ── Trend / dragon ──────────────────────────────────────────────────
    pub trend_engine_pred: Option<Outcome>,
    pub trend_confidence: Option<f64>,
    pub dragon_streak: usize,

    // ── Risk gate ───────────────────────────────────────────────────────
    pub risk_alert: Option<String>,

    // ── Master selector ─────────────────────────────────────────────────
    pub master_decision: Option<MasterDecision>,
    pub volatility_score: Option<f64>,
    pub volatility_status: Option<VolatilityStatus>,
    pub current_win_rate: Option<f64>,
    pub loss_streak: usize,
    pub warning_color: Option<WarningColor>,
}

impl Signal {
    /// A bare signal carrying only the call itself.
    pub fn new(prediction: Outcome, confidence: f64, source: SignalSource) -> Self {
        Self {
            prediction: prediction.into(),
            confidence,
            source,
            probability: None,
            detected_pattern: "NONE".to_string(),
            volatility: 0.5,
            votes: Vec::new(),
            big_score: 0.0,
            small_score: 0.0,
            alerts: Vec::new(),
            diagnostics: Vec::new(),
            main_engine_pred: None,
            cid_engine_pred: None,
            cid_trap_detected: false,
            cid_confidence: None,
            cid_threshold: None,
            cid_pattern: None,
            cid_validated: false,
            cid_checks_passed: 0,
            win_zone: false,
            correction_status: None,
            correction_pattern: None,
            memory_alert: None,
            trend_engine_pred: None,
            trend_confidence: None,
            dragon_streak: 0,
            risk_alert: None,
            master_decision: None,
            volatility_score: None,
            volatility_status: None,
            current_win_rate: None,
            loss_streak: 0,
            warning_color: None,
        }
    }

    /// The actionable outcome, if the call is not SKIP/RISKY.
    pub fn outcome(&self) -> Option<Outcome> {
        self.prediction.outcome()
    }

    #[cfg(test)]
    pub fn is_skip(&self) -> bool {
        self.prediction == Prediction::SkipRisky
    }

    pub fn push_alert(&mut self, alert: impl Into<String>) {
        self.alerts.push(alert.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_signal_has_no_stage_output() {
        let s = Signal::new(Outcome::Big, 60.0, SignalSource::Fallback);
        assert_eq!(s.outcome(), Some(Outcome::Big));
        assert_eq!(s.detected_pattern, "NONE");
        assert!(!s.cid_trap_detected);
        assert!(s.correction_status.is_none());
        assert!(!s.is_skip());
    }

    #[test]
    fn serialises_with_wire_labels() {
        let mut s = Signal::new(Outcome::Small, 72.0, SignalSource::Strategy(StrategyKind::Trend));
        s.correction_status = Some(CorrectionStatus::BlockedByTrend);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["prediction"], "SMALL");
        assert_eq!(json["source"], "Trend Detection");
        assert_eq!(json["correction_status"], "BLOCKED_BY_TREND");
    }
}
