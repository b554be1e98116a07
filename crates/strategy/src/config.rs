use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use common::{Error, InstrumentSpec, Result};
use risk::RiskConfig;

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// type = "rsi"
/// name = "BTC RSI 14"
/// instrument = "BTCUSDT"
/// volume = 0.001
///
/// [strategy.instrument_spec]
/// price_step = 0.01
/// volume_step = 0.001
/// min_volume = 0.001
///
/// [strategy.params]
/// period = { value = 14, min = 7, max = 28, step = 7 }
/// overbought = 70.0
/// oversold = 30.0
///
/// [strategy.risk.protection]
/// stop_loss_points = 5000
/// take_profit_points = 10000
///
/// [[ring]]
/// name = "EUR-USD-JPY"
/// base_quote = "EURUSD"
/// quote_cross = "USDJPY"
/// base_cross = "EURJPY"
/// volume = 1.0
/// entry_threshold = 0.0005
/// exit_threshold = 0.0001
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategyConfig>,
    #[serde(rename = "ring", default)]
    pub rings: Vec<RingConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Evaluator type identifier: "rsi", "ma_cross", "macd" or "stochastic".
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Human-readable name shown in logs.
    pub name: String,
    /// Instrument the strategy trades, e.g. "BTCUSDT".
    pub instrument: String,
    /// Base order volume.
    pub volume: f64,
    #[serde(default)]
    pub instrument_spec: InstrumentSpec,
    /// Evaluator-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, ParamValue>,
    #[serde(default)]
    pub risk: RiskConfig,
}

/// A strategy parameter: a bare value or a value with optimisation bounds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Ranged(ParamRange),
    Scalar(toml::Value),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParamRange {
    pub value: toml::Value,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

fn numeric(value: &toml::Value) -> Option<f64> {
    value
        .as_float()
        .or_else(|| value.as_integer().map(|i| i as f64))
}

impl ParamValue {
    pub fn value(&self) -> &toml::Value {
        match self {
            ParamValue::Ranged(range) => &range.value,
            ParamValue::Scalar(value) => value,
        }
    }

    pub fn range(&self) -> Option<&ParamRange> {
        match self {
            ParamValue::Ranged(range) => Some(range),
            ParamValue::Scalar(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        numeric(self.value())
    }

    pub fn as_usize(&self) -> Option<usize> {
        self.value()
            .as_integer()
            .and_then(|i| usize::try_from(i).ok())
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value().as_str()
    }
}

impl ParamRange {
    /// Bounds must be ordered, the step positive and the value inside.
    pub fn validate(&self, name: &str) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(Error::invalid_parameter(
                    name,
                    format!("min {min} is greater than max {max}"),
                ));
            }
        }
        if let Some(step) = self.step {
            if !step.is_finite() || step <= 0.0 {
                return Err(Error::invalid_parameter(name, format!("step must be > 0, got {step}")));
            }
        }
        let Some(value) = numeric(&self.value) else {
            if self.min.is_some() || self.max.is_some() {
                return Err(Error::invalid_parameter(name, "bounds given for a non-numeric value"));
            }
            return Ok(());
        };
        if self.min.is_some_and(|min| value < min) || self.max.is_some_and(|max| value > max) {
            return Err(Error::invalid_parameter(
                name,
                format!("value {value} outside [{:?}, {:?}]", self.min, self.max),
            ));
        }
        Ok(())
    }

    /// Values an optimiser would try: `min..=max` by `step`, or just the
    /// configured value when the range is incomplete.
    pub fn sweep(&self) -> Vec<f64> {
        match (self.min, self.max, self.step) {
            (Some(min), Some(max), Some(step)) if step > 0.0 && min <= max => {
                let count = ((max - min) / step + 1e-9).floor() as usize;
                (0..=count).map(|i| min + i as f64 * step).collect()
            }
            _ => numeric(&self.value).into_iter().collect(),
        }
    }
}

/// Triangular arbitrage ring over three instruments.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RingConfig {
    pub name: String,
    /// e.g. EURUSD
    pub base_quote: String,
    /// e.g. USDJPY
    pub quote_cross: String,
    /// e.g. EURJPY
    pub base_cross: String,
    pub volume: f64,
    /// Relative deviation of the direct cross from the synthetic rate that
    /// opens the ring.
    pub entry_threshold: f64,
    /// Deviation at or below which an open ring is closed.
    pub exit_threshold: f64,
}

impl RingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.volume.is_finite() && self.volume > 0.0) {
            return Err(Error::invalid_parameter("ring.volume", "must be > 0"));
        }
        if !(self.entry_threshold > 0.0) {
            return Err(Error::invalid_parameter("ring.entry_threshold", "must be > 0"));
        }
        if !(self.exit_threshold >= 0.0 && self.exit_threshold < self.entry_threshold) {
            return Err(Error::invalid_parameter(
                "ring.exit_threshold",
                "must be >= 0 and below the entry threshold",
            ));
        }
        let legs = [&self.base_quote, &self.quote_cross, &self.base_cross];
        if legs[0] == legs[1] || legs[1] == legs[2] || legs[0] == legs[2] {
            return Err(Error::invalid_parameter("ring", "legs must be three distinct instruments"));
        }
        Ok(())
    }
}

impl StrategyFileConfig {
    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read strategy config at '{path}': {e}")))?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse strategy config at '{path}': {e}")))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[strategy]]
        type = "ma_cross"
        name = "EURUSD MA"
        instrument = "EURUSD"
        volume = 1.0

        [strategy.instrument_spec]
        price_step = 0.0001

        [strategy.params]
        fast = { value = 10, min = 5, max = 20, step = 5 }
        slow = 30
        kind = "ema"

        [strategy.risk.protection]
        stop_loss_points = 100

        [[ring]]
        name = "tri"
        base_quote = "EURUSD"
        quote_cross = "USDJPY"
        base_cross = "EURJPY"
        volume = 1.0
        entry_threshold = 0.001
        exit_threshold = 0.0002
    "#;

    #[test]
    fn parses_strategies_and_rings() {
        let cfg = StrategyFileConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.strategies.len(), 1);
        assert_eq!(cfg.rings.len(), 1);
        let s = &cfg.strategies[0];
        assert_eq!(s.instrument_spec.price_step, 0.0001);
        assert_eq!(s.params["slow"].as_usize(), Some(30));
        assert_eq!(s.params["kind"].as_str(), Some("ema"));
        assert_eq!(s.risk.protection.stop_loss_points, 100.0);
        assert!(cfg.rings[0].validate().is_ok());
    }

    #[test]
    fn ranged_param_exposes_value_and_sweep() {
        let cfg = StrategyFileConfig::from_toml_str(SAMPLE).unwrap();
        let fast = &cfg.strategies[0].params["fast"];
        assert_eq!(fast.as_usize(), Some(10));
        let range = fast.range().unwrap();
        assert!(range.validate("fast").is_ok());
        assert_eq!(range.sweep(), vec![5.0, 10.0, 15.0, 20.0]);
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        let range = ParamRange {
            value: toml::Value::Integer(50),
            min: Some(5.0),
            max: Some(20.0),
            step: Some(5.0),
        };
        assert!(range.validate("fast").is_err());
    }

    #[test]
    fn non_positive_step_is_rejected() {
        let range = ParamRange {
            value: toml::Value::Float(1.0),
            min: None,
            max: None,
            step: Some(0.0),
        };
        assert!(range.validate("x").is_err());
    }

    #[test]
    fn ring_exit_must_be_below_entry() {
        let mut ring = StrategyFileConfig::from_toml_str(SAMPLE).unwrap().rings.remove(0);
        ring.exit_threshold = ring.entry_threshold;
        assert!(ring.validate().is_err());
    }

    #[test]
    fn malformed_file_is_config_error() {
        let err = StrategyFileConfig::from_toml_str("[[strategy]]\nname = 1").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
