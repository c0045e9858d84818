// Lag-1 Markov lookup from the last observed outcome.

use super::StrategyVote;
use crate::memory::PatternMemory;
use crate::types::{Outcome, StrategyKind};

pub fn vote(history: &[Outcome], memory: &PatternMemory) -> Option<StrategyVote> {
    let last = *history.last()?;
    let row = memory.markov_probabilities.from_state(last)?;
    let (prediction, p) = if row.big > row.small {
        (Outcome::Big, row.big)
    } else if row.small > row.big {
        (Outcome::Small, row.small)
    } else {
        return None;
    };
    Some(StrategyVote::new(StrategyKind::Markov, prediction, p * 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MarkovTable;
    use Outcome::*;

    #[test]
    fn picks_likelier_transition() {
        let memory = PatternMemory {
            markov_probabilities: MarkovTable::from_sequence(&[Small, Small, Small, Big]),
            ..PatternMemory::default()
        };
        let v = vote(&[Small], &memory).unwrap();
        assert_eq!(v.prediction, Small);
        assert!((v.confidence - 100.0 * 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_state_or_tie_abstains() {
        let memory = PatternMemory {
            markov_probabilities: MarkovTable::from_sequence(&[Big, Small, Big]),
            ..PatternMemory::default()
        };
        // only B->S and S->B observed; from B the row is 0/1
        assert_eq!(vote(&[Big], &memory).unwrap().prediction, Small);
        assert!(vote(&[], &memory).is_none());
        assert!(vote(&[Small], &PatternMemory::default()).is_none());
    }
}
