use common::Bar;

use super::{Indicator, PriceSource, Reading};

/// RSI (Relative Strength Index) indicator.
///
/// Uses Wilder's smoothed moving average (same as TradingView / standard RSI).
/// Formed once `period + 1` prices have been processed.
#[derive(Debug, Clone)]
pub struct Rsi {
    name: String,
    period: usize,
    source: PriceSource,
    prev: Option<f64>,
    changes: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    pub fn new(period: usize, source: PriceSource) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self {
            name: format!("rsi_{period}"),
            period,
            source,
            prev: None,
            changes: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    /// Feed one price. Returns the RSI once formed.
    pub fn update(&mut self, price: f64) -> Option<f64> {
        let prev = self.prev.replace(price)?;

        let change = price - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let n = self.period as f64;
        self.changes += 1;

        if self.changes <= self.period {
            // First average gain/loss over the initial `period` changes
            self.avg_gain += gain / n;
            self.avg_loss += loss / n;
            if self.changes < self.period {
                return None;
            }
        } else {
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }

        if self.avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = self.avg_gain / self.avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, bar: &Bar) -> Reading {
        match self.update(self.source.extract(bar)) {
            Some(value) => Reading::formed(value),
            None => Reading::pending(),
        }
    }

    fn is_formed(&self) -> bool {
        self.changes >= self.period
    }

    fn reset(&mut self) {
        self.prev = None;
        self.changes = 0;
        self.avg_gain = 0.0;
        self.avg_loss = 0.0;
    }
}
