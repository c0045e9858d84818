// =============================================================================
// Pattern Memory — pattern tallies, Markov table and error matrix
// =============================================================================
//
// The long-run statistical memory of the engine, persisted as one JSON
// document:
//
//   {
//     "patterns":             { "BBS": { "B": 31.0, "S": 12.5 }, ... },
//     "markov_probabilities": { "B": { "B": 0.6, "S": 0.4 }, "S": { ... } },
//     "error_matrix":         { "BBS": { "wins": 7.0, "losses": 3.0 }, ... },
//     "trained_through":      1234
//   }
//
// Invariants:
//   - every count is finite and non-negative;
//   - the pattern table never holds more than `pattern_capacity` entries after
//     a training pass (lowest-mass entries are evicted first);
//   - each Markov row sums to 1.
//
// The document is replaced atomically (write `.tmp`, then rename). A missing
// or corrupt file yields an empty memory and a warning, never an error.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::Outcome;

// =============================================================================
// Entry types
// =============================================================================

/// Recency-weighted tally of what followed a pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternCounts {
    #[serde(rename = "B", default)]
    pub big: f64,
    #[serde(rename = "S", default)]
    pub small: f64,
}

impl PatternCounts {
    pub fn total(&self) -> f64 {
        self.big + self.small
    }

    pub fn add(&mut self, outcome: Outcome, weight: f64) {
        match outcome {
            Outcome::Big => self.big += weight,
            Outcome::Small => self.small += weight,
        }
    }

    /// Majority outcome and its share. Ties and empty tallies return `None`.
    pub fn majority(&self) -> Option<(Outcome, f64)> {
        let total = self.total();
        if total <= 0.0 || self.big == self.small {
            return None;
        }
        if self.big > self.small {
            Some((Outcome::Big, self.big / total))
        } else {
            Some((Outcome::Small, self.small / total))
        }
    }
}

/// Outgoing probabilities from one Markov state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(rename = "B")]
    pub big: f64,
    #[serde(rename = "S")]
    pub small: f64,
}

/// Lag-1 transition table keyed by the last observed outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkovTable {
    #[serde(rename = "B", default, skip_serializing_if = "Option::is_none")]
    pub after_big: Option<Transition>,
    #[serde(rename = "S", default, skip_serializing_if = "Option::is_none")]
    pub after_small: Option<Transition>,
}

impl MarkovTable {
    /// Rebuild from scratch over `sequence`. Fewer than two outcomes yields
    /// an empty table.
    pub fn from_sequence(sequence: &[Outcome]) -> Self {
        let mut counts = [[0.0_f64; 2]; 2];
        for w in sequence.windows(2) {
            counts[index(w[0])][index(w[1])] += 1.0;
        }
        let row = |c: [f64; 2]| {
            let total = c[0] + c[1];
            (total > 0.0).then(|| Transition {
                big: c[0] / total,
                small: c[1] / total,
            })
        };
        Self {
            after_big: row(counts[0]),
            after_small: row(counts[1]),
        }
    }

    pub fn from_state(&self, state: Outcome) -> Option<&Transition> {
        match state {
            Outcome::Big => self.after_big.as_ref(),
            Outcome::Small => self.after_small.as_ref(),
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.after_big.is_none() && self.after_small.is_none()
    }
}

fn index(o: Outcome) -> usize {
    match o {
        Outcome::Big => 0,
        Outcome::Small => 1,
    }
}

/// Weighted record of how calls made right after a pattern fared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMatrixEntry {
    #[serde(default)]
    pub wins: f64,
    #[serde(default)]
    pub losses: f64,
}

impl ErrorMatrixEntry {
    pub fn total(&self) -> f64 {
        self.wins + self.losses
    }

    pub fn loss_rate(&self) -> f64 {
        let total = self.total();
        if total > 0.0 {
            self.losses / total
        } else {
            0.0
        }
    }

    pub fn win_rate(&self) -> f64 {
        let total = self.total();
        if total > 0.0 {
            self.wins / total
        } else {
            0.0
        }
    }
}

// =============================================================================
// PatternMemory
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternMemory {
    #[serde(default)]
    pub patterns: BTreeMap<String, PatternCounts>,

    #[serde(default)]
    pub markov_probabilities: MarkovTable,

    #[serde(default)]
    pub error_matrix: BTreeMap<String, ErrorMatrixEntry>,

    /// Store sequence number of the newest record already learned from.
    #[serde(default)]
    pub trained_through: i64,
}

impl PatternMemory {
    /// Load from `path`, falling back to an empty memory on any failure.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no pattern memory on disk; starting empty");
            return Self::default();
        }
        match Self::load(path) {
            Ok(mut memory) => {
                memory.sanitize();
                info!(
                    path = %path.display(),
                    patterns = memory.patterns.len(),
                    error_matrix = memory.error_matrix.len(),
                    "pattern memory loaded"
                );
                memory
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "pattern memory unreadable; starting empty");
                Self::default()
            }
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pattern memory from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse pattern memory from {}", path.display()))
    }

    /// Atomic replace-on-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_json_atomic(path, self)?;
        debug!(path = %path.display(), patterns = self.patterns.len(), "pattern memory saved");
        Ok(())
    }

    /// Multiply every tally by its decay factor and drop entries whose mass
    /// fell below `min_mass`.
    pub fn decay(&mut self, pattern_factor: f64, error_factor: f64, min_mass: f64) {
        for counts in self.patterns.values_mut() {
            counts.big *= pattern_factor;
            counts.small *= pattern_factor;
        }
        for entry in self.error_matrix.values_mut() {
            entry.wins *= error_factor;
            entry.losses *= error_factor;
        }
        self.patterns.retain(|_, c| c.total() >= min_mass);
        self.error_matrix.retain(|_, e| e.total() >= min_mass);
    }

    /// Keep only the `capacity` heaviest patterns. Ties break on key order so
    /// pruning is deterministic.
    pub fn prune(&mut self, capacity: usize) -> usize {
        if self.patterns.len() <= capacity {
            return 0;
        }
        let mut ranked: Vec<(String, PatternCounts)> =
            std::mem::take(&mut self.patterns).into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.total()
                .partial_cmp(&a.1.total())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let evicted = ranked.len() - capacity;
        ranked.truncate(capacity);
        self.patterns = ranked.into_iter().collect();
        evicted
    }

    #[cfg(test)]
    pub fn total_mass(&self) -> f64 {
        self.patterns.values().map(PatternCounts::total).sum()
    }

    /// Clamp anything a hand-edited file could have broken.
    fn sanitize(&mut self) {
        let clean = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        for c in self.patterns.values_mut() {
            c.big = clean(c.big);
            c.small = clean(c.small);
        }
        for e in self.error_matrix.values_mut() {
            e.wins = clean(e.wins);
            e.losses = clean(e.losses);
        }
        self.patterns.retain(|k, _| is_valid_key(k));
        self.error_matrix.retain(|k, _| is_valid_key(k));
    }
}

fn is_valid_key(key: &str) -> bool {
    (1..=8).contains(&key.len()) && key.chars().all(|c| c == 'B' || c == 'S')
}

/// Serialise `value` next to `path` and rename it over the canonical file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(value).context("failed to serialise document")?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename {} into place", tmp_path.display()))?;
    Ok(())
}
