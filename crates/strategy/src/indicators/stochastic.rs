use std::collections::VecDeque;

use common::Bar;

use super::{Indicator, MovingAverage, Reading, Sma};

/// Stochastic oscillator.
///
/// %K = 100 × (close − lowest low) / (highest high − lowest low) over
/// `k_period` bars; %D is an SMA of %K over `d_period`. A flat range reports
/// %K = 50.
#[derive(Debug, Clone)]
pub struct Stochastic {
    name: String,
    k_period: usize,
    window: VecDeque<(f64, f64)>,
    d: Sma,
}

impl Stochastic {
    pub fn new(k_period: usize, d_period: usize) -> Self {
        assert!(k_period >= 1, "Stochastic %K period must be >= 1");
        Self {
            name: format!("stoch_{k_period}_{d_period}"),
            k_period,
            window: VecDeque::with_capacity(k_period),
            d: Sma::new(d_period),
        }
    }

    /// Feed one bar. Returns `(%K, %D)` once formed.
    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<(f64, f64)> {
        self.window.push_back((high, low));
        if self.window.len() > self.k_period {
            self.window.pop_front();
        }
        if self.window.len() < self.k_period {
            return None;
        }

        let highest = self.window.iter().map(|(h, _)| *h).fold(f64::MIN, f64::max);
        let lowest = self.window.iter().map(|(_, l)| *l).fold(f64::MAX, f64::min);
        let range = highest - lowest;
        let k = if range > 0.0 {
            100.0 * (close - lowest) / range
        } else {
            50.0
        };
        let d = self.d.update(k)?;
        Some((k, d))
    }
}

impl Indicator for Stochastic {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, bar: &Bar) -> Reading {
        match self.update(bar.high, bar.low, bar.close) {
            Some((k, d)) => Reading::with_signal(k, d),
            None => Reading::pending(),
        }
    }

    fn is_formed(&self) -> bool {
        self.d.is_formed()
    }

    fn reset(&mut self) {
        self.window.clear();
        self.d.reset();
    }
}
