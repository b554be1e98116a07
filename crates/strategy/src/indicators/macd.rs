use common::Bar;

use super::{Ema, Indicator, MovingAverage, PriceSource, Reading};

/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// MACD line = EMA(fast) − EMA(slow), signal = EMA(macd_line, signal_period).
/// The reading carries the MACD line as `value` and the signal line as
/// `signal`; it is formed once the signal EMA has seeded.
#[derive(Debug, Clone)]
pub struct Macd {
    name: String,
    source: PriceSource,
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize, source: PriceSource) -> Self {
        assert!(fast < slow, "MACD fast period must be less than slow period");
        Self {
            name: format!("macd_{fast}_{slow}_{signal}"),
            source,
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
        }
    }

    /// Feed one price. Returns `(macd, signal)` once formed.
    pub fn update(&mut self, price: f64) -> Option<(f64, f64)> {
        let fast = self.fast.update(price);
        let slow = self.slow.update(price)?;
        let macd = fast? - slow;
        let signal = self.signal.update(macd)?;
        Some((macd, signal))
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, bar: &Bar) -> Reading {
        match self.update(self.source.extract(bar)) {
            Some((macd, signal)) => Reading::with_signal(macd, signal),
            None => Reading::pending(),
        }
    }

    fn is_formed(&self) -> bool {
        self.signal.is_formed()
    }

    fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.signal.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(macd: &mut Macd, prices: &[f64]) -> Vec<Option<(f64, f64)>> {
        prices.iter().map(|p| macd.update(*p)).collect()
    }

    #[test]
    fn macd_not_formed_with_insufficient_data() {
        let mut macd = Macd::new(12, 26, 9, PriceSource::Close);
        // slow + signal - 1 = 34 prices are needed
        let out = run(&mut macd, &[100.0; 33]);
        assert!(out.iter().all(Option::is_none));
        assert!(!macd.is_formed());
    }

    #[test]
    fn macd_formed_with_sufficient_data() {
        let mut macd = Macd::new(12, 26, 9, PriceSource::Close);
        let prices: Vec<f64> = (0..34).map(|i| 100.0 + i as f64).collect();
        let out = run(&mut macd, &prices);
        assert!(out[33].is_some());
        assert!(macd.is_formed());
    }

    #[test]
    fn macd_line_positive_on_steady_uptrend() {
        let mut macd = Macd::new(3, 6, 3, PriceSource::Close);
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 0.5).collect();
        let (line, _) = run(&mut macd, &prices).last().copied().flatten().unwrap();
        assert!(line > 0.0);
    }

    #[test]
    fn macd_crosses_above_signal_after_reversal() {
        let mut macd = Macd::new(3, 6, 3, PriceSource::Close);
        // Down then sharply up: the MACD line ends above its signal.
        let mut prices: Vec<f64> = (0..20).map(|i| 100.0 - i as f64 * 0.5).collect();
        prices.extend((0..20).map(|i| 90.0 + i as f64 * 2.0));
        let out = run(&mut macd, &prices);
        let (m, s) = out.last().copied().flatten().unwrap();
        assert!(m > s);
    }
}
