// =============================================================================
// Probability / Risk Gate — calibrate confidence against observed frequencies
// =============================================================================
//
// probability = fw * P(predicted over the last N)
//             + (1 - fw) * P(predicted | newest 4-pattern)   (3-pattern fallback)
//
// Confidence is capped at `probability + margin`. Below the safety floor the
// gate only raises an alert; it never turns the call into a wait.

use anyhow::Result;
use tracing::debug;

use super::{PipelineContext, Signal};
use crate::runtime_config::{EnsembleParams, PipelineParams};
use crate::types::Outcome;

const CONDITIONAL_LENGTHS: [usize; 2] = [4, 3];

pub fn apply(
    signal: &mut Signal,
    ctx: &PipelineContext<'_>,
    params: &PipelineParams,
    ensemble: &EnsembleParams,
) -> Result<()> {
    let Some(predicted) = signal.outcome() else {
        return Ok(());
    };
    let window = ctx.tail(params.probability_window);
    if window.is_empty() {
        return Ok(());
    }

    let frequency =
        window.iter().filter(|o| **o == predicted).count() as f64 / window.len() as f64;
    let blended = match conditional_rate(window, predicted) {
        Some(rate) => {
            params.probability_frequency_weight * frequency
                + (1.0 - params.probability_frequency_weight) * rate
        }
        None => frequency,
    };
    let probability = blended * 100.0;

    signal.probability = Some(probability);
    signal.confidence =
        ensemble.clamp_confidence(signal.confidence.min(probability + params.probability_margin));

    if probability < params.probability_safety_floor {
        let alert = format!(
            "LOW PROBABILITY: {predicted} at {probability:.1}% (< {:.0}%)",
            params.probability_safety_floor
        );
        signal.risk_alert = Some(alert.clone());
        signal.push_alert(alert);
    }
    debug!(%predicted, probability, frequency, "risk gate calibrated");
    Ok(())
}

/// How often the newest pattern was historically followed by `predicted`.
fn conditional_rate(window: &[Outcome], predicted: Outcome) -> Option<f64> {
    for len in CONDITIONAL_LENGTHS {
        if window.len() <= len {
            continue;
        }
        let key = &window[window.len() - len..];
        let mut seen = 0usize;
        let mut hits = 0usize;
        for end in len..window.len() {
            if &window[end - len..end] == key {
                seen += 1;
                if window[end] == predicted {
                    hits += 1;
                }
            }
        }
        if seen > 0 {
            return Some(hits as f64 / seen as f64);
        }
    }
    None
}
