pub mod correction_ledger;
pub mod pattern_memory;
pub mod strategy_weights;

pub use correction_ledger::{CorrectionLedger, Misprediction};
pub use pattern_memory::{MarkovTable, PatternMemory};
pub use strategy_weights::StrategyWeights;

use std::sync::Arc;

use parking_lot::RwLock;

/// The two JSON-backed tables, published as immutable snapshots.
///
/// Readers clone the `Arc` and keep working on that snapshot while a
/// training pass builds the replacement; `replace` swaps both in one step.
#[derive(Debug, Default)]
pub struct MemoryTables {
    memory: RwLock<Arc<PatternMemory>>,
    weights: RwLock<Arc<StrategyWeights>>,
}

impl MemoryTables {
    pub fn new(memory: PatternMemory, weights: StrategyWeights) -> Self {
        Self {
            memory: RwLock::new(Arc::new(memory)),
            weights: RwLock::new(Arc::new(weights)),
        }
    }

    pub fn memory(&self) -> Arc<PatternMemory> {
        self.memory.read().clone()
    }

    /// Both tables from the same training generation.
    pub fn snapshot(&self) -> (Arc<PatternMemory>, Arc<StrategyWeights>) {
        let m = self.memory.read();
        let w = self.weights.read();
        (m.clone(), w.clone())
    }

    pub fn replace(&self, memory: PatternMemory, weights: StrategyWeights) {
        let memory = Arc::new(memory);
        let weights = Arc::new(weights);
        let mut m = self.memory.write();
        let mut w = self.weights.write();
        *m = memory;
        *w = weights;
    }
}
