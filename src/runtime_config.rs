// =============================================================================
// Engine Configuration — tunable constants with atomic save
// =============================================================================
//
// Every threshold, window, weight band and decay factor the engine uses lives
// here so that product tuning never requires a code change.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry serde defaults so that adding new fields never
// breaks loading an older config file.
//
// `validate()` is the only place where the engine treats bad input as fatal:
// an inconsistent configuration is a programmer error and stops startup.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::memory::pattern_memory::write_json_atomic;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_database_path() -> PathBuf {
    PathBuf::from("data/oracle.sqlite")
}

fn default_pattern_memory_path() -> PathBuf {
    PathBuf::from("data/patterns.json")
}

fn default_strategy_weights_path() -> PathBuf {
    PathBuf::from("data/strategy_weights.json")
}

// =============================================================================
// TrainingMode
// =============================================================================

/// When a training pass runs relative to the outcome report that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TrainingMode {
    /// Train before `report_outcome` returns.
    #[default]
    Inline,
    /// Fire-and-forget on the tokio blocking pool; predictions issued in the
    /// meantime read the previous snapshot.
    Background,
}

// =============================================================================
// TrainingParams
// =============================================================================

/// Trainer and pattern-memory tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Fewer usable records than this and a pass reports "not trained".
    pub min_training_records: usize,
    /// Most recent completed records a pass reads.
    pub training_window: usize,
    /// Most recent trades used to score each strategy.
    pub weight_window: usize,
    pub weight_floor: f64,
    pub weight_ceiling: f64,
    /// Longest pattern key learned (1..=8).
    pub max_pattern_length: usize,
    /// How far back from the stream end windows are accumulated.
    pub recency_horizon: usize,
    /// Distance-from-end limits separating the three weight bands.
    pub band_limits: [usize; 2],
    /// Pattern increments for the near / middle / far band.
    pub pattern_band_weights: [f64; 3],
    /// Error-matrix increments for the near / middle / far band.
    pub error_band_weights: [f64; 3],
    pub pattern_decay: f64,
    pub error_matrix_decay: f64,
    /// Maximum number of distinct patterns kept after pruning.
    pub pattern_capacity: usize,
    /// Entries whose mass decays below this are dropped.
    pub min_retained_mass: f64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            min_training_records: 5,
            training_window: 300,
            weight_window: 50,
            weight_floor: 0.3,
            weight_ceiling: 3.0,
            max_pattern_length: 8,
            recency_horizon: 50,
            band_limits: [5, 15],
            pattern_band_weights: [15.0, 8.0, 2.0],
            error_band_weights: [5.0, 2.0, 1.0],
            pattern_decay: 0.95,
            error_matrix_decay: 0.98,
            pattern_capacity: 2000,
            min_retained_mass: 0.01,
        }
    }
}

impl TrainingParams {
    /// Band index (0 = nearest) for a window `dist` steps from the stream end.
    pub fn band(&self, dist: usize) -> usize {
        if dist <= self.band_limits[0] {
            0
        } else if dist <= self.band_limits[1] {
            1
        } else {
            2
        }
    }
}

// =============================================================================
// LedgerParams
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerParams {
    pub retention_days: i64,
    pub initial_reliability: f64,
    pub reliability_step: f64,
    pub reliability_cap: f64,
    /// Outcomes preceding a misprediction that key the session error log.
    pub session_pattern_length: usize,
    /// Reliability added per session hit when consulting the ledger.
    pub session_reliability_bonus: f64,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            retention_days: 7,
            initial_reliability: 0.5,
            reliability_step: 0.05,
            reliability_cap: 0.95,
            session_pattern_length: 4,
            session_reliability_bonus: 0.05,
        }
    }
}

// =============================================================================
// EnsembleParams
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleParams {
    /// Recent outcomes the strategies look at.
    pub prediction_window: usize,
    /// Minimum pattern mass before the pattern strategy trusts an entry.
    pub pattern_min_support: f64,
    pub confidence_floor: f64,
    pub confidence_ceiling: f64,
    /// Flip-rate above which confidence is penalised.
    pub high_volatility: f64,
    pub volatility_penalty: f64,
    /// Run length from which the streak strategy bets on a reversal.
    pub streak_reversal_length: usize,
}

impl Default for EnsembleParams {
    fn default() -> Self {
        Self {
            prediction_window: 60,
            pattern_min_support: 5.0,
            confidence_floor: 60.0,
            confidence_ceiling: 99.0,
            high_volatility: 0.7,
            volatility_penalty: 10.0,
            streak_reversal_length: 4,
        }
    }
}

impl EnsembleParams {
    pub fn clamp_confidence(&self, confidence: f64) -> f64 {
        confidence.clamp(self.confidence_floor, self.confidence_ceiling)
    }
}

// =============================================================================
// PipelineParams
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// Active-segment outcomes loaded into the pipeline snapshot.
    pub pipeline_window: usize,
    pub cid_window: usize,
    pub cid_pattern_lengths: Vec<usize>,
    pub cid_min_observations: f64,
    pub cid_threshold_min: f64,
    pub cid_threshold_max: f64,
    pub cid_accuracy_days: i64,
    /// CID confidence (0-100) needed for the Master Selector override.
    pub cid_override_confidence: f64,
    pub win_zone_rate: f64,
    pub validation_skew: f64,
    pub validation_reliability: f64,
    pub validation_volatility: f64,
    pub correction_min_reliability: f64,
    /// Run length at which the dragon follower starts voting.
    pub dragon_threshold: usize,
    /// Run length at which the dragon overrides the majority.
    pub dragon_override: usize,
    pub probability_window: usize,
    /// Share of the blended probability taken by raw frequency.
    pub probability_frequency_weight: f64,
    pub probability_margin: f64,
    pub probability_safety_floor: f64,
    pub win_rate_window: usize,
    pub win_rate_floor: f64,
    pub min_trades_for_gate: usize,
    pub max_loss_streak: usize,
    pub green_confidence: f64,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            pipeline_window: 100,
            cid_window: 30,
            cid_pattern_lengths: vec![5, 4, 3],
            cid_min_observations: 5.0,
            cid_threshold_min: 0.55,
            cid_threshold_max: 0.70,
            cid_accuracy_days: 7,
            cid_override_confidence: 75.0,
            win_zone_rate: 0.70,
            validation_skew: 0.3,
            validation_reliability: 0.6,
            validation_volatility: 0.5,
            correction_min_reliability: 0.6,
            dragon_threshold: 3,
            dragon_override: 5,
            probability_window: 100,
            probability_frequency_weight: 0.4,
            probability_margin: 5.0,
            probability_safety_floor: 80.0,
            win_rate_window: 20,
            win_rate_floor: 50.0,
            min_trades_for_gate: 5,
            max_loss_streak: 3,
            green_confidence: 75.0,
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the prediction engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Persistence ---------------------------------------------------------

    /// SQLite file holding the outcome log and the correction ledger.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Pattern Memory JSON document.
    #[serde(default = "default_pattern_memory_path")]
    pub pattern_memory_path: PathBuf,

    /// Strategy Weights JSON document.
    #[serde(default = "default_strategy_weights_path")]
    pub strategy_weights_path: PathBuf,

    // --- Behaviour -----------------------------------------------------------

    #[serde(default)]
    pub training_mode: TrainingMode,

    #[serde(default)]
    pub training: TrainingParams,

    #[serde(default)]
    pub ledger: LedgerParams,

    #[serde(default)]
    pub ensemble: EnsembleParams,

    #[serde(default)]
    pub pipeline: PipelineParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            pattern_memory_path: default_pattern_memory_path(),
            strategy_weights_path: default_strategy_weights_path(),
            training_mode: TrainingMode::default(),
            training: TrainingParams::default(),
            ledger: LedgerParams::default(),
            ensemble: EnsembleParams::default(),
            pipeline: PipelineParams::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            training_mode = ?config.training_mode,
            database = %config.database_path.display(),
            "engine config loaded"
        );

        Ok(config)
    }

    /// Write the configuration to `path` so operators have a file to edit.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_json_atomic(path, self).context("failed to save engine config")?;
        info!(path = %path.display(), "engine config saved");
        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let t = &self.training;
        let e = &self.ensemble;
        let p = &self.pipeline;
        let l = &self.ledger;

        if !(1..=8).contains(&t.max_pattern_length) {
            bail!("training.max_pattern_length must be in 1..=8, got {}", t.max_pattern_length);
        }
        if t.training_window == 0 || t.weight_window == 0 || t.recency_horizon == 0 {
            bail!("training windows must be > 0");
        }
        if t.pattern_capacity == 0 {
            bail!("training.pattern_capacity must be > 0");
        }
        for (name, decay) in [
            ("pattern_decay", t.pattern_decay),
            ("error_matrix_decay", t.error_matrix_decay),
        ] {
            if !(decay > 0.0 && decay <= 1.0) {
                bail!("training.{} must be in (0, 1], got {}", name, decay);
            }
        }
        if t.weight_floor <= 0.0 || t.weight_floor > t.weight_ceiling {
            bail!(
                "strategy weight range is invalid: [{}, {}]",
                t.weight_floor,
                t.weight_ceiling
            );
        }
        if t.band_limits[0] > t.band_limits[1] {
            bail!("training.band_limits must be ascending");
        }
        if t.pattern_band_weights.iter().chain(&t.error_band_weights).any(|w| *w < 0.0) {
            bail!("band weights must be non-negative");
        }

        if !(0.0..=100.0).contains(&e.confidence_floor)
            || !(0.0..=100.0).contains(&e.confidence_ceiling)
            || e.confidence_floor > e.confidence_ceiling
        {
            bail!(
                "confidence clamp is invalid: [{}, {}]",
                e.confidence_floor,
                e.confidence_ceiling
            );
        }
        if e.prediction_window < 2 {
            bail!("ensemble.prediction_window must be >= 2");
        }

        if p.cid_pattern_lengths.is_empty() || p.cid_pattern_lengths.contains(&0) {
            bail!("pipeline.cid_pattern_lengths must be non-empty and non-zero");
        }
        if p.cid_threshold_min > p.cid_threshold_max {
            bail!(
                "CID threshold range is invalid: [{}, {}]",
                p.cid_threshold_min,
                p.cid_threshold_max
            );
        }
        if p.pipeline_window == 0 || p.cid_window == 0 || p.win_rate_window == 0 {
            bail!("pipeline windows must be > 0");
        }
        if p.dragon_threshold == 0 || p.dragon_override < p.dragon_threshold {
            bail!(
                "dragon thresholds are invalid: follow at {}, override at {}",
                p.dragon_threshold,
                p.dragon_override
            );
        }
        if !(0.0..=1.0).contains(&p.probability_frequency_weight) {
            bail!("pipeline.probability_frequency_weight must be in [0, 1]");
        }

        if l.retention_days <= 0 {
            bail!("ledger.retention_days must be > 0");
        }
        if !(0.0..=1.0).contains(&l.initial_reliability)
            || !(0.0..1.0).contains(&l.reliability_cap)
            || l.initial_reliability > l.reliability_cap
        {
            bail!(
                "ledger reliability range is invalid: initial {} cap {}",
                l.initial_reliability,
                l.reliability_cap
            );
        }

        Ok(())
    }
}
