use common::{Bar, Result, SignalDecision};

use crate::indicators::{Macd, MaIndicator, MaKind, PriceSource, Rsi, Stochastic};
use crate::{History, IndicatorSet, Readings, SignalEvaluator};

/// Direction of a line crossing between the previous and the current bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cross {
    Up,
    Down,
}

/// `a` crossing `b`: at or below before and strictly above now (or the
/// mirror image).
pub fn crossing(prev_a: f64, prev_b: f64, a: f64, b: f64) -> Option<Cross> {
    if prev_a <= prev_b && a > b {
        Some(Cross::Up)
    } else if prev_a >= prev_b && a < b {
        Some(Cross::Down)
    } else {
        None
    }
}

// ─── RSI thresholds ───────────────────────────────────────────────────────────

/// RSI at or below `oversold` → long; at or above `overbought` → short.
/// With `exit_level`, longs exit once RSI recovers to it and shorts once it
/// falls to it.
#[derive(Debug, Clone)]
pub struct RsiEvaluator {
    pub name: String,
    pub period: usize,
    pub overbought: f64,
    pub oversold: f64,
    pub exit_level: Option<f64>,
    pub source: PriceSource,
}

impl SignalEvaluator for RsiEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_indicators(&self) -> IndicatorSet {
        IndicatorSet::new().with(Rsi::new(self.period, self.source))
    }

    fn lookback(&self) -> usize {
        0
    }

    fn evaluate(&self, _bar: &Bar, readings: &Readings, _history: &History) -> Result<SignalDecision> {
        if !readings.all_formed() {
            return Ok(SignalDecision::Hold);
        }
        let rsi = readings.require(0)?.value;

        let decision = if rsi <= self.oversold {
            SignalDecision::EnterLong
        } else if rsi >= self.overbought {
            SignalDecision::EnterShort
        } else {
            match self.exit_level {
                Some(level) if rsi >= level => SignalDecision::ExitLong,
                Some(_) => SignalDecision::ExitShort,
                None => SignalDecision::Hold,
            }
        };
        Ok(decision)
    }
}

// ─── Moving-average crossover ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MaCrossEvaluator {
    pub name: String,
    pub fast: usize,
    pub slow: usize,
    pub kind: MaKind,
    pub source: PriceSource,
}

impl SignalEvaluator for MaCrossEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_indicators(&self) -> IndicatorSet {
        IndicatorSet::new()
            .with(MaIndicator::new(self.kind, self.fast, self.source))
            .with(MaIndicator::new(self.kind, self.slow, self.source))
    }

    fn evaluate(&self, _bar: &Bar, readings: &Readings, history: &History) -> Result<SignalDecision> {
        if !readings.all_formed() {
            return Ok(SignalDecision::Hold);
        }
        let fast = readings.require(0)?.value;
        let slow = readings.require(1)?.value;
        let (Some(prev_fast), Some(prev_slow)) = (history.formed(1, 0), history.formed(1, 1)) else {
            return Ok(SignalDecision::Hold);
        };

        Ok(match crossing(prev_fast.value, prev_slow.value, fast, slow) {
            Some(Cross::Up) => SignalDecision::EnterLong,
            Some(Cross::Down) => SignalDecision::EnterShort,
            None => SignalDecision::Hold,
        })
    }
}

// ─── MACD / signal-line crossover ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MacdEvaluator {
    pub name: String,
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
    pub source: PriceSource,
}

impl SignalEvaluator for MacdEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_indicators(&self) -> IndicatorSet {
        IndicatorSet::new().with(Macd::new(self.fast, self.slow, self.signal, self.source))
    }

    fn evaluate(&self, _bar: &Bar, readings: &Readings, history: &History) -> Result<SignalDecision> {
        if !readings.all_formed() {
            return Ok(SignalDecision::Hold);
        }
        let current = readings.require(0)?;
        let Some(prev) = history.formed(1, 0) else {
            return Ok(SignalDecision::Hold);
        };
        let (Some(signal), Some(prev_signal)) = (current.signal, prev.signal) else {
            return Ok(SignalDecision::Hold);
        };

        Ok(match crossing(prev.value, prev_signal, current.value, signal) {
            Some(Cross::Up) => SignalDecision::EnterLong,
            Some(Cross::Down) => SignalDecision::EnterShort,
            None => SignalDecision::Hold,
        })
    }
}

// ─── Stochastic %K/%D crossover in extreme zones ─────────────────────────────

#[derive(Debug, Clone)]
pub struct StochasticEvaluator {
    pub name: String,
    pub k_period: usize,
    pub d_period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

impl SignalEvaluator for StochasticEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_indicators(&self) -> IndicatorSet {
        IndicatorSet::new().with(Stochastic::new(self.k_period, self.d_period))
    }

    fn evaluate(&self, _bar: &Bar, readings: &Readings, history: &History) -> Result<SignalDecision> {
        if !readings.all_formed() {
            return Ok(SignalDecision::Hold);
        }
        let current = readings.require(0)?;
        let Some(prev) = history.formed(1, 0) else {
            return Ok(SignalDecision::Hold);
        };
        let (Some(d), Some(prev_d)) = (current.signal, prev.signal) else {
            return Ok(SignalDecision::Hold);
        };

        Ok(match crossing(prev.value, prev_d, current.value, d) {
            Some(Cross::Up) if prev.value < self.oversold => SignalDecision::EnterLong,
            Some(Cross::Down) if prev.value > self.overbought => SignalDecision::EnterShort,
            _ => SignalDecision::Hold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Reading;
    use chrono::Utc;

    fn bar() -> Bar {
        Bar::new("TEST", Utc::now(), 1.0, 1.0, 1.0, 1.0, 1.0)
    }

    fn rsi_eval(exit_level: Option<f64>) -> RsiEvaluator {
        RsiEvaluator {
            name: "rsi".into(),
            period: 14,
            overbought: 70.0,
            oversold: 30.0,
            exit_level,
            source: PriceSource::Close,
        }
    }

    fn one(value: f64) -> Readings {
        Readings(vec![Reading::formed(value)])
    }

    fn pair(a: f64, b: f64) -> Readings {
        Readings(vec![Reading::formed(a), Reading::formed(b)])
    }

    fn history(items: Vec<Readings>) -> History {
        let mut h = History::new(items.len().max(1));
        for r in items {
            h.push(r);
        }
        h
    }

    #[test]
    fn crossing_detects_both_directions() {
        assert_eq!(crossing(1.0, 2.0, 3.0, 2.0), Some(Cross::Up));
        assert_eq!(crossing(3.0, 2.0, 1.0, 2.0), Some(Cross::Down));
        assert_eq!(crossing(3.0, 2.0, 4.0, 2.0), None);
    }

    #[test]
    fn rsi_thresholds_map_to_entries() {
        let e = rsi_eval(None);
        let h = History::new(0);
        assert_eq!(e.evaluate(&bar(), &one(25.0), &h).unwrap(), SignalDecision::EnterLong);
        assert_eq!(e.evaluate(&bar(), &one(75.0), &h).unwrap(), SignalDecision::EnterShort);
        assert_eq!(e.evaluate(&bar(), &one(50.0), &h).unwrap(), SignalDecision::Hold);
    }

    #[test]
    fn rsi_exit_level_maps_to_exits() {
        let e = rsi_eval(Some(50.0));
        let h = History::new(0);
        assert_eq!(e.evaluate(&bar(), &one(55.0), &h).unwrap(), SignalDecision::ExitLong);
        assert_eq!(e.evaluate(&bar(), &one(45.0), &h).unwrap(), SignalDecision::ExitShort);
    }

    #[test]
    fn unformed_reading_holds_regardless_of_value() {
        let e = rsi_eval(None);
        let readings = Readings(vec![Reading {
            value: 5.0,
            signal: None,
            is_formed: false,
        }]);
        assert_eq!(
            e.evaluate(&bar(), &readings, &History::new(0)).unwrap(),
            SignalDecision::Hold
        );
    }

    #[test]
    fn non_finite_reading_is_an_error() {
        let e = rsi_eval(None);
        assert!(e.evaluate(&bar(), &one(f64::NAN), &History::new(0)).is_err());
    }

    #[test]
    fn ma_cross_needs_previous_bar() {
        let e = MaCrossEvaluator {
            name: "ma".into(),
            fast: 2,
            slow: 4,
            kind: MaKind::Simple,
            source: PriceSource::Close,
        };
        assert_eq!(
            e.evaluate(&bar(), &pair(2.0, 1.0), &History::new(1)).unwrap(),
            SignalDecision::Hold
        );
        let h = history(vec![pair(1.0, 1.5)]);
        assert_eq!(e.evaluate(&bar(), &pair(2.0, 1.6), &h).unwrap(), SignalDecision::EnterLong);
        let h = history(vec![pair(2.0, 1.5)]);
        assert_eq!(e.evaluate(&bar(), &pair(1.0, 1.6), &h).unwrap(), SignalDecision::EnterShort);
    }

    #[test]
    fn macd_cross_uses_signal_line() {
        let e = MacdEvaluator {
            name: "macd".into(),
            fast: 3,
            slow: 6,
            signal: 3,
            source: PriceSource::Close,
        };
        let h = history(vec![Readings(vec![Reading::with_signal(-1.0, 0.0)])]);
        let now = Readings(vec![Reading::with_signal(0.5, 0.1)]);
        assert_eq!(e.evaluate(&bar(), &now, &h).unwrap(), SignalDecision::EnterLong);
    }

    #[test]
    fn stochastic_requires_extreme_zone() {
        let e = StochasticEvaluator {
            name: "stoch".into(),
            k_period: 5,
            d_period: 3,
            overbought: 80.0,
            oversold: 20.0,
        };
        let h = history(vec![Readings(vec![Reading::with_signal(10.0, 15.0)])]);
        let now = Readings(vec![Reading::with_signal(18.0, 14.0)]);
        assert_eq!(e.evaluate(&bar(), &now, &h).unwrap(), SignalDecision::EnterLong);

        // Same cross in the middle of the range is ignored.
        let h = history(vec![Readings(vec![Reading::with_signal(40.0, 45.0)])]);
        let now = Readings(vec![Reading::with_signal(50.0, 44.0)]);
        assert_eq!(e.evaluate(&bar(), &now, &h).unwrap(), SignalDecision::Hold);
    }
}
