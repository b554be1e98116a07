use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use common::{Error, InstrumentSpec, Result};
use risk::RiskConfig;

use crate::config::{ParamValue, RingConfig, StrategyConfig, StrategyFileConfig};
use crate::evaluators::{MaCrossEvaluator, MacdEvaluator, RsiEvaluator, StochasticEvaluator};
use crate::indicators::{MaKind, PriceSource};
use crate::SignalEvaluator;

/// Everything needed to start one strategy run, validated up front.
#[derive(Clone)]
pub struct StrategyDefinition {
    pub name: String,
    pub instrument: String,
    pub volume: f64,
    pub spec: InstrumentSpec,
    pub risk: RiskConfig,
    pub evaluator: Arc<dyn SignalEvaluator>,
}

impl std::fmt::Debug for StrategyDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyDefinition")
            .field("name", &self.name)
            .field("instrument", &self.instrument)
            .field("volume", &self.volume)
            .field("spec", &self.spec)
            .field("risk", &self.risk)
            .finish_non_exhaustive()
    }
}

impl StrategyDefinition {
    /// Wrap an already-built evaluator, validating volume and risk settings.
    pub fn new(
        instrument: impl Into<String>,
        volume: f64,
        spec: InstrumentSpec,
        risk: RiskConfig,
        evaluator: Arc<dyn SignalEvaluator>,
    ) -> Result<Self> {
        if !(volume.is_finite() && volume > 0.0) {
            return Err(Error::invalid_parameter("volume", format!("must be > 0, got {volume}")));
        }
        risk.validate(&spec)?;
        Ok(Self {
            name: evaluator.name().to_string(),
            instrument: instrument.into(),
            volume,
            spec,
            risk,
            evaluator,
        })
    }
}

/// All configured strategy and ring definitions.
#[derive(Debug, Default)]
pub struct StrategyRegistry {
    definitions: Vec<StrategyDefinition>,
    rings: Vec<RingConfig>,
}

impl StrategyRegistry {
    /// Build every definition from config. Any unknown type or invalid
    /// parameter aborts with an error naming the offending strategy.
    pub fn from_config(file_cfg: &StrategyFileConfig) -> Result<Self> {
        let mut definitions = Vec::with_capacity(file_cfg.strategies.len());

        for cfg in &file_cfg.strategies {
            let evaluator = build_evaluator(cfg).map_err(|e| {
                Error::Config(format!("strategy '{}' ({}): {e}", cfg.name, cfg.strategy_type))
            })?;
            let definition = StrategyDefinition::new(
                cfg.instrument.clone(),
                cfg.volume,
                cfg.instrument_spec,
                cfg.risk.clone(),
                evaluator,
            )
            .map_err(|e| Error::Config(format!("strategy '{}': {e}", cfg.name)))?;
            info!(name = %definition.name, instrument = %definition.instrument, "Registered strategy");
            definitions.push(definition);
        }

        for ring in &file_cfg.rings {
            ring.validate()
                .map_err(|e| Error::Config(format!("ring '{}': {e}", ring.name)))?;
            info!(name = %ring.name, "Registered ring");
        }

        Ok(Self {
            definitions,
            rings: file_cfg.rings.clone(),
        })
    }

    pub fn definitions(&self) -> &[StrategyDefinition] {
        &self.definitions
    }

    pub fn rings(&self) -> &[RingConfig] {
        &self.rings
    }

    /// Distinct instruments across strategies and rings, in first-seen order.
    pub fn instruments(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.definitions
            .iter()
            .map(|d| d.instrument.clone())
            .chain(
                self.rings
                    .iter()
                    .flat_map(|r| [r.base_quote.clone(), r.quote_cross.clone(), r.base_cross.clone()]),
            )
            .filter(|i| seen.insert(i.clone()))
            .collect()
    }
}

// ─── Evaluator builders ───────────────────────────────────────────────────────

fn build_evaluator(cfg: &StrategyConfig) -> Result<Arc<dyn SignalEvaluator>> {
    let params = &cfg.params;
    for (key, value) in params {
        if let Some(range) = value.range() {
            range.validate(key)?;
        }
    }

    let name = cfg.name.clone();
    let evaluator: Arc<dyn SignalEvaluator> = match cfg.strategy_type.as_str() {
        "rsi" => {
            let period = param_usize(params, "period", 14)?;
            let overbought = param_f64(params, "overbought", 70.0)?;
            let oversold = param_f64(params, "oversold", 30.0)?;
            if period < 2 {
                return Err(Error::invalid_parameter("period", "RSI period must be >= 2"));
            }
            if oversold >= overbought {
                return Err(Error::invalid_parameter(
                    "oversold",
                    format!("must be below overbought ({oversold} >= {overbought})"),
                ));
            }
            let exit_level = params
                .get("exit_level")
                .map(|v| {
                    v.as_f64()
                        .ok_or_else(|| Error::invalid_parameter("exit_level", "expected a number"))
                })
                .transpose()?;
            Arc::new(RsiEvaluator {
                name,
                period,
                overbought,
                oversold,
                exit_level,
                source: param_source(params)?,
            })
        }
        "ma_cross" => {
            let fast = param_usize(params, "fast", 10)?;
            let slow = param_usize(params, "slow", 30)?;
            if fast == 0 || fast >= slow {
                return Err(Error::invalid_parameter(
                    "fast",
                    format!("fast period must be in 1..slow ({fast} vs {slow})"),
                ));
            }
            Arc::new(MaCrossEvaluator {
                name,
                fast,
                slow,
                kind: param_ma_kind(params)?,
                source: param_source(params)?,
            })
        }
        "macd" => {
            let fast = param_usize(params, "fast", 12)?;
            let slow = param_usize(params, "slow", 26)?;
            let signal = param_usize(params, "signal", 9)?;
            if fast == 0 || fast >= slow || signal == 0 {
                return Err(Error::invalid_parameter(
                    "fast",
                    "MACD needs 0 < fast < slow and signal > 0",
                ));
            }
            Arc::new(MacdEvaluator {
                name,
                fast,
                slow,
                signal,
                source: param_source(params)?,
            })
        }
        "stochastic" => {
            let k_period = param_usize(params, "k_period", 14)?;
            let d_period = param_usize(params, "d_period", 3)?;
            let overbought = param_f64(params, "overbought", 80.0)?;
            let oversold = param_f64(params, "oversold", 20.0)?;
            if k_period == 0 || d_period == 0 {
                return Err(Error::invalid_parameter("k_period", "periods must be >= 1"));
            }
            if oversold >= overbought {
                return Err(Error::invalid_parameter("oversold", "must be below overbought"));
            }
            Arc::new(StochasticEvaluator {
                name,
                k_period,
                d_period,
                overbought,
                oversold,
            })
        }
        other => return Err(Error::Config(format!("unknown type '{other}'"))),
    };

    Ok(evaluator)
}

fn param_f64(params: &HashMap<String, ParamValue>, key: &str, default: f64) -> Result<f64> {
    match params.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| Error::invalid_parameter(key, "expected a number")),
    }
}

fn param_usize(params: &HashMap<String, ParamValue>, key: &str, default: usize) -> Result<usize> {
    match params.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_usize()
            .ok_or_else(|| Error::invalid_parameter(key, "expected a non-negative integer")),
    }
}

fn param_source(params: &HashMap<String, ParamValue>) -> Result<PriceSource> {
    match params.get("source") {
        None => Ok(PriceSource::default()),
        Some(v) => v
            .as_str()
            .and_then(PriceSource::parse)
            .ok_or_else(|| Error::invalid_parameter("source", "unknown price source")),
    }
}

fn param_ma_kind(params: &HashMap<String, ParamValue>) -> Result<MaKind> {
    match params.get("kind") {
        None => Ok(MaKind::default()),
        Some(v) => v.as_str().and_then(MaKind::parse).ok_or_else(|| {
            warn!(value = ?v.value(), "Unsupported moving average kind");
            Error::invalid_parameter("kind", "expected sma, ema, smma or wma")
        }),
    }
}
