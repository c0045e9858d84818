// =============================================================================
// Weighted Ensemble Scorer — strategy votes into one base Signal
// =============================================================================
//
// Every vote credits `w * p` to the bucket it predicts and `w * (1 - p)` to
// the other, where `w = strategy weight * boost` and `p = confidence / 100`.
// The heavier bucket wins; confidence is its share of the total, penalised in
// choppy markets and clamped to the configured band.

use tracing::debug;

use crate::memory::{PatternMemory, StrategyWeights};
use crate::pipeline::{Signal, VoteContribution};
use crate::runtime_config::EnsembleParams;
use crate::strategies::{collect_votes, StrategyVote};
use crate::types::{flip_rate, pattern_key, Outcome, SignalSource};

/// Outcomes shown as `detected_pattern`.
const DETECTED_PATTERN_LEN: usize = 6;

/// Result of scoring a set of votes.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringResult {
    pub big: f64,
    pub small: f64,
    pub contributions: Vec<VoteContribution>,
}

impl ScoringResult {
    /// Heavier bucket; ties go to BIG.
    pub fn winner(&self) -> Outcome {
        if self.small > self.big {
            Outcome::Small
        } else {
            Outcome::Big
        }
    }

    /// Winning bucket's share of all weighted votes, 0-1.
    pub fn share(&self) -> f64 {
        let total = self.big + self.small;
        if total <= 0.0 {
            return 0.5;
        }
        match self.winner() {
            Outcome::Big => self.big / total,
            Outcome::Small => self.small / total,
        }
    }

    /// Strategy with the single largest contribution to the winning bucket.
    pub fn leading_source(&self) -> SignalSource {
        let winner = self.winner();
        self.contributions
            .iter()
            .filter(|c| c.prediction == winner)
            .fold(None::<&VoteContribution>, |best, c| match best {
                Some(b) if b.contribution >= c.contribution => Some(b),
                _ => Some(c),
            })
            .map(|c| SignalSource::Strategy(c.strategy))
            .unwrap_or(SignalSource::Combined)
    }
}

pub struct EnsembleScorer {
    params: EnsembleParams,
}

impl EnsembleScorer {
    pub fn new(params: EnsembleParams) -> Self {
        Self { params }
    }

    pub fn score(&self, votes: &[StrategyVote], weights: &StrategyWeights) -> ScoringResult {
        let mut big = 0.0;
        let mut small = 0.0;
        let mut contributions = Vec::with_capacity(votes.len());

        for vote in votes {
            let weight = weights.get(vote.strategy) * vote.boost;
            let p = vote.confidence / 100.0;
            let contribution = weight * p;
            let against = weight * (1.0 - p);
            match vote.prediction {
                Outcome::Big => {
                    big += contribution;
                    small += against;
                }
                Outcome::Small => {
                    small += contribution;
                    big += against;
                }
            }
            contributions.push(VoteContribution {
                strategy: vote.strategy,
                prediction: vote.prediction,
                confidence: vote.confidence,
                weight,
                contribution,
            });
        }

        ScoringResult {
            big,
            small,
            contributions,
        }
    }

    /// Base prediction for the outcome window `history` (oldest first).
    pub fn predict(
        &self,
        history: &[Outcome],
        memory: &PatternMemory,
        weights: &StrategyWeights,
    ) -> Signal {
        let window = &history[history.len().saturating_sub(self.params.prediction_window)..];
        if window.is_empty() {
            debug!("no history; returning fallback signal");
            return Signal::new(Outcome::Big, self.params.confidence_floor, SignalSource::Fallback);
        }

        let votes = collect_votes(window, memory, &self.params);
        let volatility = flip_rate(window);
        let detected_pattern = if window.len() >= DETECTED_PATTERN_LEN {
            pattern_key(&window[window.len() - DETECTED_PATTERN_LEN..])
        } else {
            "NONE".to_string()
        };

        if votes.is_empty() {
            let mut signal =
                Signal::new(Outcome::Big, self.params.confidence_floor, SignalSource::Fallback);
            signal.volatility = volatility;
            signal.detected_pattern = detected_pattern;
            return signal;
        }

        let result = self.score(&votes, weights);
        let mut confidence = result.share() * 100.0;
        if volatility > self.params.high_volatility {
            confidence -= self.params.volatility_penalty;
        }
        let confidence = self.params.clamp_confidence(confidence);

        let winner = result.winner();
        let source = result.leading_source();
        debug!(
            prediction = %winner,
            confidence,
            big = result.big,
            small = result.small,
            source = %source,
            "ensemble vote"
        );

        let mut signal = Signal::new(winner, confidence, source);
        signal.volatility = volatility;
        signal.detected_pattern = detected_pattern;
        signal.big_score = result.big;
        signal.small_score = result.small;
        signal.votes = result.contributions;
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StrategyKind;
    use Outcome::*;

    fn scorer() -> EnsembleScorer {
        EnsembleScorer::new(EnsembleParams::default())
    }

    #[test]
    fn weighted_buckets_pick_winner_and_source() {
        let votes = vec![
            StrategyVote::new(StrategyKind::Pattern, Big, 100.0),
            StrategyVote::new(StrategyKind::Markov, Small, 80.0),
            StrategyVote::new(StrategyKind::Streak, Small, 61.0),
        ];
        let mut weights = StrategyWeights::default();
        weights.set(StrategyKind::Markov, 3.0);
        let r = scorer().score(&votes, &weights);
        // BIG: 1.0 + 0.6 + 0.39, SMALL: 2.4 + 0.61
        assert!((r.big - 1.99).abs() < 1e-9);
        assert!((r.small - 3.01).abs() < 1e-9);
        assert_eq!(r.winner(), Small);
        assert_eq!(r.leading_source(), SignalSource::Strategy(StrategyKind::Markov));
    }

    #[test]
    fn tie_goes_to_big() {
        let votes = vec![
            StrategyVote::new(StrategyKind::Trend, Big, 70.0),
            StrategyVote::new(StrategyKind::Markov, Small, 70.0),
        ];
        let r = scorer().score(&votes, &StrategyWeights::default());
        assert_eq!(r.winner(), Big);
        assert_eq!(r.leading_source(), SignalSource::Strategy(StrategyKind::Trend));
    }

    #[test]
    fn empty_history_is_fallback() {
        let s = scorer().predict(&[], &PatternMemory::default(), &StrategyWeights::default());
        assert_eq!(s.outcome(), Some(Big));
        assert_eq!(s.source, SignalSource::Fallback);
        assert!((s.confidence - 60.0).abs() < 1e-9);
    }

    #[test]
    fn confidence_stays_in_band() {
        let memory = PatternMemory::default();
        let weights = StrategyWeights::default();
        for h in [
            vec![Big; 40],
            vec![Small, Small],
            (0..30).map(|i| if i % 2 == 0 { Big } else { Small }).collect::<Vec<_>>(),
        ] {
            let s = scorer().predict(&h, &memory, &weights);
            assert!((60.0..=99.0).contains(&s.confidence), "{}", s.confidence);
        }
    }

    #[test]
    fn detected_pattern_is_last_six() {
        let h = [Small, Big, Big, Small, Small, Big, Big];
        let s = scorer().predict(&h, &PatternMemory::default(), &StrategyWeights::default());
        assert_eq!(s.detected_pattern, "BBSSBB");
        let s = scorer().predict(&h[..3], &PatternMemory::default(), &StrategyWeights::default());
        assert_eq!(s.detected_pattern, "NONE");
    }
}
