// =============================================================================
// Signal Pipeline — fixed-order stages over one Signal
// =============================================================================
//
//   MainEngine -> CidScanner -> MemoryCorrection -> DragonFollower
//              -> RiskGate -> MasterSelector
//
// Every stage mutates the Signal in place and may fail. A failing stage is
// rolled back to the Signal it received and a diagnostic is attached; the
// remaining stages still run. No stage touches persisted state.
// =============================================================================

pub mod cid_scanner;
pub mod context;
pub mod dragon;
pub mod master_selector;
pub mod memory_correction;
pub mod risk_gate;
pub mod signal;

pub use context::PipelineContext;
pub use signal::{Signal, VoteContribution};

use anyhow::Result;
use tracing::{debug, warn};

use crate::runtime_config::{EngineConfig, EnsembleParams, LedgerParams, PipelineParams};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    MainEngine,
    CidScanner,
    MemoryCorrection,
    DragonFollower,
    RiskGate,
    MasterSelector,
}

impl Stage {
    pub const ORDER: [Stage; 6] = [
        Self::MainEngine,
        Self::CidScanner,
        Self::MemoryCorrection,
        Self::DragonFollower,
        Self::RiskGate,
        Self::MasterSelector,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::MainEngine => "main_engine",
            Self::CidScanner => "cid_scanner",
            Self::MemoryCorrection => "memory_correction",
            Self::DragonFollower => "dragon_follower",
            Self::RiskGate => "risk_gate",
            Self::MasterSelector => "master_selector",
        }
    }
}

pub struct SignalPipeline {
    pipeline: PipelineParams,
    ledger: LedgerParams,
    ensemble: EnsembleParams,
}

impl SignalPipeline {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            pipeline: config.pipeline.clone(),
            ledger: config.ledger.clone(),
            ensemble: config.ensemble.clone(),
        }
    }

    /// Run every stage over `base` and return the final Signal.
    pub fn process(&self, base: Signal, ctx: &PipelineContext<'_>) -> Signal {
        let mut signal = base;
        for stage in Stage::ORDER {
            run_stage(stage, &mut signal, |s| self.apply(stage, s, ctx));
        }
        debug!(
            prediction = %signal.prediction,
            confidence = signal.confidence,
            source = %signal.source,
            "pipeline complete"
        );
        signal
    }

    fn apply(&self, stage: Stage, signal: &mut Signal, ctx: &PipelineContext<'_>) -> Result<()> {
        match stage {
            Stage::MainEngine => {
                signal.main_engine_pred = signal.outcome();
                Ok(())
            }
            Stage::CidScanner => cid_scanner::apply(signal, ctx, &self.pipeline),
            Stage::MemoryCorrection => {
                memory_correction::apply(signal, ctx, &self.pipeline, &self.ledger, &self.ensemble)
            }
            Stage::DragonFollower => dragon::apply(signal, ctx, &self.pipeline),
            Stage::RiskGate => risk_gate::apply(signal, ctx, &self.pipeline, &self.ensemble),
            Stage::MasterSelector => {
                master_selector::apply(signal, ctx, &self.pipeline, &self.ensemble)
            }
        }
    }
}

/// Run one stage; on error restore the pre-stage Signal and note the skip.
fn run_stage<F>(stage: Stage, signal: &mut Signal, f: F)
where
    F: FnOnce(&mut Signal) -> Result<()>,
{
    let before = signal.clone();
    if let Err(e) = f(signal) {
        warn!(stage = stage.name(), error = %e, "pipeline stage skipped");
        *signal = before;
        signal
            .diagnostics
            .push(format!("{} skipped: {:#}", stage.name(), e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Outcome, SignalSource};
    use anyhow::bail;

    #[test]
    fn failing_stage_is_rolled_back_with_diagnostic() {
        let mut signal = Signal::new(Outcome::Big, 70.0, SignalSource::Combined);
        run_stage(Stage::RiskGate, &mut signal, |s| {
            s.confidence = 10.0;
            s.push_alert("half-written");
            bail!("probability table unavailable")
        });
        assert!((signal.confidence - 70.0).abs() < 1e-9);
        assert!(signal.alerts.is_empty());
        assert_eq!(
            signal.diagnostics,
            vec!["risk_gate skipped: probability table unavailable".to_string()]
        );
    }

    #[test]
    fn successful_stage_keeps_its_changes() {
        let mut signal = Signal::new(Outcome::Big, 70.0, SignalSource::Combined);
        run_stage(Stage::MainEngine, &mut signal, |s| {
            s.main_engine_pred = Some(Outcome::Big);
            Ok(())
        });
        assert_eq!(signal.main_engine_pred, Some(Outcome::Big));
        assert!(signal.diagnostics.is_empty());
    }
}
