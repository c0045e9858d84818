// Pattern lookup: longest recent suffix with enough learned mass wins.

use super::StrategyVote;
use crate::memory::PatternMemory;
use crate::runtime_config::EnsembleParams;
use crate::types::{pattern_key, Outcome, StrategyKind};

const MAX_SUFFIX: usize = 8;
const MIN_SUFFIX: usize = 2;

pub fn vote(
    history: &[Outcome],
    memory: &PatternMemory,
    params: &EnsembleParams,
) -> Option<StrategyVote> {
    let longest = MAX_SUFFIX.min(history.len());
    for len in (MIN_SUFFIX..=longest).rev() {
        let key = pattern_key(&history[history.len() - len..]);
        let Some(counts) = memory.patterns.get(&key) else {
            continue;
        };
        if counts.total() <= params.pattern_min_support {
            continue;
        }
        if let Some((outcome, share)) = counts.majority() {
            // Suffixes longer than four get a proportional boost.
            let boost = (len as f64 / 4.0).max(1.0);
            return Some(
                StrategyVote::new(StrategyKind::Pattern, outcome, share * 100.0).with_boost(boost),
            );
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::pattern_memory::PatternCounts;
    use Outcome::*;

    fn memory(entries: &[(&str, f64, f64)]) -> PatternMemory {
        let mut m = PatternMemory::default();
        for (k, b, s) in entries {
            m.patterns.insert(k.to_string(), PatternCounts { big: *b, small: *s });
        }
        m
    }

    #[test]
    fn prefers_longest_supported_suffix() {
        let m = memory(&[("SS", 2.0, 18.0), ("BSS", 30.0, 10.0)]);
        let v = vote(&[Big, Big, Small, Small], &m, &EnsembleParams::default()).unwrap();
        assert_eq!(v.prediction, Big);
        assert!((v.confidence - 75.0).abs() < 1e-9);
        assert!((v.boost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn skips_thin_and_tied_entries() {
        let m = memory(&[("BSS", 3.0, 1.0), ("SS", 6.0, 6.0)]);
        assert!(vote(&[Big, Small, Small], &m, &EnsembleParams::default()).is_none());
    }

    #[test]
    fn single_outcome_patterns_are_never_used() {
        let m = memory(&[("S", 0.0, 50.0)]);
        assert!(vote(&[Big, Small], &m, &EnsembleParams::default()).is_none());
    }

    #[test]
    fn long_suffix_is_boosted() {
        let key = [Big, Small, Big, Small, Big, Small, Big, Small];
        let m = memory(&[("BSBSBSBS", 40.0, 0.0)]);
        let v = vote(&key, &m, &EnsembleParams::default()).unwrap();
        assert!((v.boost - 2.0).abs() < 1e-9);
    }
}
