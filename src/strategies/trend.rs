// Short-term trend: last five against the five before.

use super::StrategyVote;
use crate::types::{Outcome, StrategyKind};

const SHORT: usize = 5;

pub fn vote(history: &[Outcome]) -> Option<StrategyVote> {
    if history.len() < SHORT * 2 {
        return None;
    }
    let n = history.len();
    let short = &history[n - SHORT..];
    let prior = &history[n - 2 * SHORT..n - SHORT];

    let share = |w: &[Outcome]| w.iter().filter(|o| **o == Outcome::Big).count() as f64 / w.len() as f64;
    let short_big = share(short);
    let divergence = (short_big - share(prior)).abs();
    if divergence == 0.0 {
        return None;
    }

    let prediction = if short_big > 0.5 {
        Outcome::Big
    } else {
        Outcome::Small
    };
    let confidence = (55.0 + 40.0 * divergence).min(95.0);
    Some(StrategyVote::new(StrategyKind::Trend, prediction, confidence))
}
