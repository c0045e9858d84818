// =============================================================================
// Strategy Weights — per-strategy vote multipliers
// =============================================================================
//
// Persisted as a flat JSON object `{ "pattern": 1.8, "trend": 0.9, ... }`.
// Every value stays inside the configured [floor, ceiling] band.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::pattern_memory::write_json_atomic;
use crate::types::StrategyKind;

/// Weight given to a strategy that has never been scored.
pub const NEUTRAL_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyWeights {
    weights: BTreeMap<StrategyKind, f64>,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            weights: StrategyKind::ALL
                .iter()
                .map(|k| (*k, NEUTRAL_WEIGHT))
                .collect(),
        }
    }
}

impl StrategyWeights {
    pub fn get(&self, kind: StrategyKind) -> f64 {
        self.weights.get(&kind).copied().unwrap_or(NEUTRAL_WEIGHT)
    }

    pub fn set(&mut self, kind: StrategyKind, weight: f64) {
        self.weights.insert(kind, weight);
    }

    /// Recompute from realized accuracy: `clamp(accuracy * 3, floor, ceiling)`.
    /// Strategies without observations keep their previous weight.
    pub fn rescore(&mut self, tallies: &BTreeMap<StrategyKind, (usize, usize)>, floor: f64, ceiling: f64) {
        for (kind, &(wins, total)) in tallies {
            if total == 0 {
                continue;
            }
            let accuracy = wins as f64 / total as f64;
            let weight = (accuracy * 3.0).clamp(floor, ceiling);
            debug!(strategy = %kind, wins, total, weight, "strategy weight rescored");
            self.weights.insert(*kind, weight);
        }
    }

    /// Load from `path`; missing strategies get the neutral weight and any
    /// failure yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>, floor: f64, ceiling: f64) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        let loaded = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read strategy weights from {}", path.display()))
            .and_then(|s| {
                serde_json::from_str::<BTreeMap<StrategyKind, f64>>(&s).with_context(|| {
                    format!("failed to parse strategy weights from {}", path.display())
                })
            });
        match loaded {
            Ok(map) => {
                let mut weights = Self::default();
                for (kind, w) in map {
                    if w.is_finite() {
                        weights.set(kind, w.clamp(floor, ceiling));
                    }
                }
                info!(path = %path.display(), "strategy weights loaded");
                weights
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "strategy weights unreadable; using neutral weights");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json_atomic(path.as_ref(), self)
    }
}
