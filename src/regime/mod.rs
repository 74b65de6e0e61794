// =============================================================================
// Market Condition Module
// =============================================================================
//
// Reduces a fused snapshot plus side inputs to seven sub-scores, a weighted
// composite and one classified regime per instrument.

pub mod analyzer;
pub mod detector;
pub mod metrics;

pub use analyzer::{MarketConditionAnalyzer, MarketUpdate};
pub use detector::{MarketRegime, RegimeChangeEvent, RegimeCharacteristics, RegimeTracker};
pub use metrics::{MarketMetrics, SubScores};
