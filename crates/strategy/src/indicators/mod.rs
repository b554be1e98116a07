pub mod ma;
pub mod macd;
pub mod rsi;
pub mod stochastic;

pub use ma::{moving_average, Ema, MaIndicator, MaKind, MovingAverage, Sma, Smma, Wma};
pub use macd::Macd;
pub use rsi::Rsi;
pub use stochastic::Stochastic;

use serde::{Deserialize, Serialize};

use common::Bar;

/// Output of one indicator for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    pub value: f64,
    /// Second line of two-line indicators (MACD signal, Stochastic %D).
    pub signal: Option<f64>,
    /// False during warm-up. Unformed readings must not drive decisions.
    pub is_formed: bool,
}

impl Reading {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn formed(value: f64) -> Self {
        Self {
            value,
            signal: None,
            is_formed: true,
        }
    }

    pub fn with_signal(value: f64, signal: f64) -> Self {
        Self {
            value,
            signal: Some(signal),
            is_formed: true,
        }
    }
}

/// Stateful per-bar transform. One instance per indicator per run.
pub trait Indicator: Send + std::fmt::Debug {
    fn name(&self) -> &str;

    fn process(&mut self, bar: &Bar) -> Reading;

    fn is_formed(&self) -> bool;

    fn reset(&mut self);
}

/// Bar field fed to single-value indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    #[default]
    Close,
    Open,
    High,
    Low,
    Median,
    Typical,
}

impl PriceSource {
    pub fn extract(self, bar: &Bar) -> f64 {
        match self {
            PriceSource::Close => bar.close,
            PriceSource::Open => bar.open,
            PriceSource::High => bar.high,
            PriceSource::Low => bar.low,
            PriceSource::Median => bar.median(),
            PriceSource::Typical => bar.typical(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "close" => Some(PriceSource::Close),
            "open" => Some(PriceSource::Open),
            "high" => Some(PriceSource::High),
            "low" => Some(PriceSource::Low),
            "median" => Some(PriceSource::Median),
            "typical" => Some(PriceSource::Typical),
            _ => None,
        }
    }
}

/// The fixed, ordered list of indicators a strategy subscribes to.
#[derive(Debug, Default)]
pub struct IndicatorSet {
    indicators: Vec<Box<dyn Indicator>>,
}

impl IndicatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, indicator: impl Indicator + 'static) -> Self {
        self.indicators.push(Box::new(indicator));
        self
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.indicators.iter().map(|i| i.name()).collect()
    }

    /// Feed one bar to every indicator, in order.
    pub fn process(&mut self, bar: &Bar) -> Readings {
        Readings(self.indicators.iter_mut().map(|i| i.process(bar)).collect())
    }

    pub fn reset(&mut self) {
        for indicator in &mut self.indicators {
            indicator.reset();
        }
    }
}

/// Readings of an [`IndicatorSet`] for one bar, in set order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Readings(pub Vec<Reading>);

impl Readings {
    pub fn get(&self, index: usize) -> Option<&Reading> {
        self.0.get(index)
    }

    pub fn all_formed(&self) -> bool {
        self.0.iter().all(|r| r.is_formed)
    }

    /// Formed reading at `index`, or an evaluation error when the index is
    /// missing or the value is not finite.
    pub fn require(&self, index: usize) -> common::Result<Reading> {
        let reading = self.0.get(index).copied().ok_or_else(|| {
            common::Error::Evaluation(format!("no indicator at position {index}"))
        })?;
        let finite = reading.value.is_finite() && reading.signal.map_or(true, f64::is_finite);
        if !finite {
            return Err(common::Error::Evaluation(format!(
                "indicator at position {index} produced a non-finite value"
            )));
        }
        Ok(reading)
    }
}
