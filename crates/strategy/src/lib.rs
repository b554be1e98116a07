pub mod config;
pub mod evaluators;
pub mod history;
pub mod indicators;
pub mod registry;

pub use config::{ParamRange, ParamValue, RingConfig, StrategyConfig, StrategyFileConfig};
pub use history::History;
pub use indicators::{Indicator, IndicatorSet, Reading, Readings};
pub use registry::{StrategyDefinition, StrategyRegistry};

use common::{Bar, Result, SignalDecision};

/// Maps a closed bar and indicator readings to a trading decision.
///
/// Implementations hold configuration only. All per-run state lives in the
/// indicator set built by [`SignalEvaluator::build_indicators`] and in the
/// history window the runner maintains, so identical inputs always give
/// identical decisions.
pub trait SignalEvaluator: Send + Sync {
    /// Human-readable name of this strategy instance.
    fn name(&self) -> &str;

    /// Fresh indicator instances for one run.
    fn build_indicators(&self) -> IndicatorSet;

    /// How many prior bars of readings `evaluate` looks at.
    fn lookback(&self) -> usize {
        1
    }

    /// Decide for the just-closed bar. `readings` are in indicator-set order.
    /// Must return `Hold` while any needed reading or history entry is
    /// missing or unformed.
    fn evaluate(&self, bar: &Bar, readings: &Readings, history: &History)
        -> Result<SignalDecision>;
}
