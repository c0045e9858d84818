// =============================================================================
// Shared types used across the outcome prediction engine
// =============================================================================
//
// Every identifier that used to travel as a free-form string (outcomes,
// strategy names, signal sources, master decisions) is a closed enum here.
// The string labels only exist at the storage / wire boundary.

use serde::{Deserialize, Serialize};

// =============================================================================
// Outcome
// =============================================================================

/// One observed game result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "BIG")]
    Big,
    #[serde(rename = "SMALL")]
    Small,
}

impl Outcome {
    /// Single-character form used inside pattern keys.
    pub fn as_char(self) -> char {
        match self {
            Self::Big => 'B',
            Self::Small => 'S',
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Big => "BIG",
            Self::Small => "SMALL",
        }
    }

    /// Parse the storage label. Anything that is not BIG/SMALL (e.g. the
    /// legacy "INITIAL" placeholder) yields `None`.
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BIG" | "B" => Some(Self::Big),
            "SMALL" | "S" => Some(Self::Small),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Big => Self::Small,
            Self::Small => Self::Big,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Build the pattern key for a slice of outcomes ("BBSS").
pub fn pattern_key(outcomes: &[Outcome]) -> String {
    outcomes.iter().map(|o| o.as_char()).collect()
}

/// Length of the run of identical outcomes ending at the last element.
pub fn current_run(outcomes: &[Outcome]) -> (Option<Outcome>, usize) {
    let Some(&last) = outcomes.last() else {
        return (None, 0);
    };
    let run = outcomes.iter().rev().take_while(|&&o| o == last).count();
    (Some(last), run)
}

/// Fraction of adjacent pairs that flip, in [0, 1].
///
/// Windows shorter than 10 observations report a neutral 0.5.
pub fn flip_rate(outcomes: &[Outcome]) -> f64 {
    if outcomes.len() < 10 {
        return 0.5;
    }
    let changes = outcomes.windows(2).filter(|w| w[0] != w[1]).count();
    changes as f64 / (outcomes.len() - 1) as f64
}

// =============================================================================
// Prediction
// =============================================================================

/// Final call carried by a Signal. `SkipRisky` is the Master Selector's
/// advisory "do not play" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prediction {
    #[serde(rename = "BIG")]
    Big,
    #[serde(rename = "SMALL")]
    Small,
    #[serde(rename = "SKIP/RISKY")]
    SkipRisky,
}

impl Prediction {
    pub fn outcome(self) -> Option<Outcome> {
        match self {
            Self::Big => Some(Outcome::Big),
            Self::Small => Some(Outcome::Small),
            Self::SkipRisky => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Big => "BIG",
            Self::Small => "SMALL",
            Self::SkipRisky => "SKIP/RISKY",
        }
    }
}

impl From<Outcome> for Prediction {
    fn from(o: Outcome) -> Self {
        match o {
            Outcome::Big => Self::Big,
            Outcome::Small => Self::Small,
        }
    }
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Strategy identifiers
// =============================================================================

/// The fixed ensemble members. Used as the key of the strategy weights
/// document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Pattern,
    Trend,
    Markov,
    Streak,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [Self::Pattern, Self::Trend, Self::Markov, Self::Streak];

    /// Label written into `TradeRecord.signal_source`.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pattern => "Pattern Analysis",
            Self::Trend => "Trend Detection",
            Self::Markov => "Markov Chain Analysis",
            Self::Streak => "Streak Reversal",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How the Master Selector settled the final call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasterDecision {
    Consensus,
    DragonPriority,
    CidOverride,
    MemoryCorrection,
    LowWinRate,
}

/// Where a Signal's prediction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum SignalSource {
    Strategy(StrategyKind),
    Combined,
    Fallback,
    CidScanner,
    MemoryCorrection,
    DragonFollower,
    Master(MasterDecision),
    /// Anything written by an external collaborator that the engine does
    /// not recognise (manual entries, bulk imports).
    External,
}

impl SignalSource {
    pub fn label(self) -> &'static str {
        match self {
            Self::Strategy(kind) => kind.label(),
            Self::Combined => "Combined Matrix",
            Self::Fallback => "Fallback",
            Self::CidScanner => "CID Scanner",
            Self::MemoryCorrection => "Memory Correction",
            Self::DragonFollower => "Dragon Follower",
            Self::Master(MasterDecision::Consensus) => "Master Selector (Consensus)",
            Self::Master(MasterDecision::DragonPriority) => "Master Selector (Dragon Priority)",
            Self::Master(MasterDecision::CidOverride) => "Master Selector (CID Override)",
            Self::Master(MasterDecision::MemoryCorrection) => "Master Selector (Memory Correction)",
            Self::Master(MasterDecision::LowWinRate) => "Master Selector (Low Win Rate)",
            Self::External => "External",
        }
    }

    pub fn from_label(s: &str) -> Self {
        let s = s.trim();
        for kind in StrategyKind::ALL {
            if kind.label() == s {
                return Self::Strategy(kind);
            }
        }
        match s {
            "Combined Matrix" => Self::Combined,
            "Fallback" => Self::Fallback,
            "CID Scanner" => Self::CidScanner,
            "Memory Correction" => Self::MemoryCorrection,
            "Dragon Follower" => Self::DragonFollower,
            "Master Selector (Consensus)" => Self::Master(MasterDecision::Consensus),
            "Master Selector (Dragon Priority)" => Self::Master(MasterDecision::DragonPriority),
            "Master Selector (CID Override)" => Self::Master(MasterDecision::CidOverride),
            "Master Selector (Memory Correction)" => {
                Self::Master(MasterDecision::MemoryCorrection)
            }
            "Master Selector (Low Win Rate)" => Self::Master(MasterDecision::LowWinRate),
            _ => Self::External,
        }
    }

    /// Strategy whose accuracy this source's trades count toward.
    pub fn strategy(self) -> Option<StrategyKind> {
        match self {
            Self::Strategy(kind) => Some(kind),
            _ => None,
        }
    }

    /// True for trades whose call was made by the CID scanner.
    pub fn is_cid(self) -> bool {
        matches!(
            self,
            Self::CidScanner | Self::Master(MasterDecision::CidOverride)
        )
    }
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl From<SignalSource> for String {
    fn from(s: SignalSource) -> Self {
        s.label().to_string()
    }
}

impl From<String> for SignalSource {
    fn from(s: String) -> Self {
        Self::from_label(&s)
    }
}

// =============================================================================
// Pipeline status enums
// =============================================================================

/// What the memory-correction stage did with a ledger hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionStatus {
    Applied,
    BlockedByTrend,
    Agrees,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityStatus {
    Stable,
    Normal,
    Volatile,
    Extreme,
}

impl VolatilityStatus {
    /// Classify a flip-rate score expressed in percent.
    pub fn from_score(score: f64) -> Self {
        if score > 70.0 {
            Self::Extreme
        } else if score > 50.0 {
            Self::Volatile
        } else if score > 30.0 {
            Self::Normal
        } else {
            Self::Stable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningColor {
    Green,
    Orange,
}
