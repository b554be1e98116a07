//! Moving averages behind one capability trait, picked by [`MaKind`].

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use common::Bar;

use super::{Indicator, PriceSource, Reading};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MaKind {
    #[serde(alias = "sma")]
    Simple,
    #[default]
    #[serde(alias = "ema")]
    Exponential,
    /// Wilder's smoothed moving average.
    #[serde(alias = "smma")]
    Smoothed,
    #[serde(alias = "wma")]
    Weighted,
}

impl MaKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sma" | "simple" => Some(MaKind::Simple),
            "ema" | "exponential" => Some(MaKind::Exponential),
            "smma" | "smoothed" | "wilder" => Some(MaKind::Smoothed),
            "wma" | "weighted" => Some(MaKind::Weighted),
            _ => None,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            MaKind::Simple => "sma",
            MaKind::Exponential => "ema",
            MaKind::Smoothed => "smma",
            MaKind::Weighted => "wma",
        }
    }
}

/// Streaming moving average over plain values.
pub trait MovingAverage: Send + std::fmt::Debug {
    /// Consume one value; `None` until `period` values have been seen.
    fn update(&mut self, value: f64) -> Option<f64>;

    fn is_formed(&self) -> bool;

    fn period(&self) -> usize;

    fn reset(&mut self);
}

/// Build the moving average selected by `kind`.
pub fn moving_average(kind: MaKind, period: usize) -> Box<dyn MovingAverage> {
    match kind {
        MaKind::Simple => Box::new(Sma::new(period)),
        MaKind::Exponential => Box::new(Ema::new(period)),
        MaKind::Smoothed => Box::new(Smma::new(period)),
        MaKind::Weighted => Box::new(Wma::new(period)),
    }
}

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self {
            period,
            window: VecDeque::with_capacity(period),
            sum: 0.0,
        }
    }
}

impl MovingAverage for Sma {
    fn update(&mut self, value: f64) -> Option<f64> {
        self.window.push_back(value);
        self.sum += value;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        self.is_formed().then(|| self.sum / self.period as f64)
    }

    fn is_formed(&self) -> bool {
        self.window.len() == self.period
    }

    fn period(&self) -> usize {
        self.period
    }

    fn reset(&mut self) {
        self.window.clear();
        self.sum = 0.0;
    }
}

/// EMA seeded with the SMA of the first `period` values.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    alpha: f64,
    seed: Sma,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            seed: Sma::new(period),
            value: None,
        }
    }
}

impl MovingAverage for Ema {
    fn update(&mut self, value: f64) -> Option<f64> {
        let next = match self.value {
            Some(prev) => self.alpha * value + (1.0 - self.alpha) * prev,
            None => self.seed.update(value)?,
        };
        self.value = Some(next);
        self.value
    }

    fn is_formed(&self) -> bool {
        self.value.is_some()
    }

    fn period(&self) -> usize {
        self.period
    }

    fn reset(&mut self) {
        self.seed.reset();
        self.value = None;
    }
}

/// Wilder smoothing: `prev * (n - 1) / n + value / n`, seeded with an SMA.
#[derive(Debug, Clone)]
pub struct Smma {
    period: usize,
    seed: Sma,
    value: Option<f64>,
}

impl Smma {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "SMMA period must be >= 1");
        Self {
            period,
            seed: Sma::new(period),
            value: None,
        }
    }
}

impl MovingAverage for Smma {
    fn update(&mut self, value: f64) -> Option<f64> {
        let n = self.period as f64;
        let next = match self.value {
            Some(prev) => (prev * (n - 1.0) + value) / n,
            None => self.seed.update(value)?,
        };
        self.value = Some(next);
        self.value
    }

    fn is_formed(&self) -> bool {
        self.value.is_some()
    }

    fn period(&self) -> usize {
        self.period
    }

    fn reset(&mut self) {
        self.seed.reset();
        self.value = None;
    }
}

/// Linearly weighted: the newest value has weight `period`.
#[derive(Debug, Clone)]
pub struct Wma {
    period: usize,
    window: VecDeque<f64>,
}

impl Wma {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "WMA period must be >= 1");
        Self {
            period,
            window: VecDeque::with_capacity(period),
        }
    }
}

impl MovingAverage for Wma {
    fn update(&mut self, value: f64) -> Option<f64> {
        self.window.push_back(value);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        if !self.is_formed() {
            return None;
        }
        let weighted: f64 = self
            .window
            .iter()
            .enumerate()
            .map(|(i, v)| (i + 1) as f64 * v)
            .sum();
        let denom = (self.period * (self.period + 1)) as f64 / 2.0;
        Some(weighted / denom)
    }

    fn is_formed(&self) -> bool {
        self.window.len() == self.period
    }

    fn period(&self) -> usize {
        self.period
    }

    fn reset(&mut self) {
        self.window.clear();
    }
}

/// A moving average applied to one bar field.
#[derive(Debug)]
pub struct MaIndicator {
    name: String,
    source: PriceSource,
    average: Box<dyn MovingAverage>,
}

impl MaIndicator {
    pub fn new(kind: MaKind, period: usize, source: PriceSource) -> Self {
        Self {
            name: format!("{}_{period}", kind.tag()),
            source,
            average: moving_average(kind, period),
        }
    }
}

impl Indicator for MaIndicator {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, bar: &Bar) -> Reading {
        match self.average.update(self.source.extract(bar)) {
            Some(value) => Reading::formed(value),
            None => Reading::pending(),
        }
    }

    fn is_formed(&self) -> bool {
        self.average.is_formed()
    }

    fn reset(&mut self) {
        self.average.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(ma: &mut dyn MovingAverage, values: &[f64]) -> Vec<Option<f64>> {
        values.iter().map(|v| ma.update(*v)).collect()
    }

    #[test]
    fn sma_averages_last_period_values() {
        let mut sma = Sma::new(3);
        let out = feed(&mut sma, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out, vec![None, None, Some(2.0), Some(3.0)]);
    }

    #[test]
    fn ema_seeds_with_sma_then_recurses() {
        let mut ema = Ema::new(3);
        let out = feed(&mut ema, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out[2], Some(2.0));
        // alpha = 0.5 → 0.5 * 4 + 0.5 * 2
        assert_eq!(out[3], Some(3.0));
    }

    #[test]
    fn smma_uses_wilder_smoothing() {
        let mut smma = Smma::new(2);
        let out = feed(&mut smma, &[2.0, 4.0, 6.0]);
        assert_eq!(out[1], Some(3.0));
        assert_eq!(out[2], Some(4.5));
    }

    #[test]
    fn wma_weights_newest_values_most() {
        let mut wma = Wma::new(3);
        let out = feed(&mut wma, &[1.0, 2.0, 3.0]);
        // (1*1 + 2*2 + 3*3) / 6
        assert!((out[2].unwrap() - 14.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn factory_builds_requested_kind() {
        for kind in [
            MaKind::Simple,
            MaKind::Exponential,
            MaKind::Smoothed,
            MaKind::Weighted,
        ] {
            let mut ma = moving_average(kind, 4);
            assert_eq!(ma.period(), 4);
            assert!(feed(ma.as_mut(), &[5.0; 3]).iter().all(Option::is_none));
            assert_eq!(ma.update(5.0), Some(5.0));
            ma.reset();
            assert!(!ma.is_formed());
        }
    }

    #[test]
    fn kind_parses_short_names() {
        assert_eq!(MaKind::parse("EMA"), Some(MaKind::Exponential));
        assert_eq!(MaKind::parse("wilder"), Some(MaKind::Smoothed));
        assert_eq!(MaKind::parse("jurik"), None);
    }
}
