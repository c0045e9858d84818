// =============================================================================
// Signals Module
// =============================================================================
//
// Base signal generation: weighted ensemble scoring of the strategy votes.

pub mod ensemble;

pub use ensemble::EnsembleScorer;
