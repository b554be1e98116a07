use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use common::{Bar, InstrumentSpec, IntentReason, PositionSide};

/// How protective exits reach the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionMode {
    /// The monitor inspects every bar and forces a market exit on breach.
    #[default]
    Synthetic,
    /// Stop and limit orders rest at the venue; the monitor only supplies
    /// their prices.
    Resting,
}

/// Stop-loss / take-profit / trailing parameters, all in price points
/// (multiples of the instrument's price step). Zero disables a leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProtectionConfig {
    pub stop_loss_points: f64,
    pub take_profit_points: f64,
    pub trailing_stop_points: f64,
    /// Minimum stop improvement before a trailing move is applied.
    pub trailing_step_points: f64,
    pub mode: ProtectionMode,
}

impl ProtectionConfig {
    pub fn is_enabled(&self) -> bool {
        self.stop_loss_points > 0.0
            || self.take_profit_points > 0.0
            || self.trailing_stop_points > 0.0
    }
}

/// Price thresholds anchored to the open position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProtectiveLevels {
    pub stop_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    /// Close price that last moved the stop, once trailing is active.
    pub trailing_anchor: Option<f64>,
}

/// A breached protective level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtectiveExit {
    pub reason: IntentReason,
    pub level: f64,
}

/// Tracks protective levels for one position and reports breaches.
///
/// Armed on an entry fill, re-armed when the average entry changes and
/// cleared when the position returns to flat.
#[derive(Debug, Clone)]
pub struct ProtectiveMonitor {
    config: ProtectionConfig,
    price_step: f64,
    side: PositionSide,
    entry_price: f64,
    levels: Option<ProtectiveLevels>,
}

impl ProtectiveMonitor {
    pub fn new(config: ProtectionConfig, spec: &InstrumentSpec) -> Self {
        if config.is_enabled() && !spec.has_price_step() {
            warn!(
                fallback = spec.effective_price_step(),
                "Instrument has no price step; protective distances use the default tick"
            );
        }
        Self {
            config,
            price_step: spec.effective_price_step(),
            side: PositionSide::Flat,
            entry_price: 0.0,
            levels: None,
        }
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    pub fn mode(&self) -> ProtectionMode {
        self.config.mode
    }

    pub fn levels(&self) -> Option<&ProtectiveLevels> {
        self.levels.as_ref()
    }

    pub fn is_armed(&self) -> bool {
        self.levels.is_some()
    }

    fn distance(&self, points: f64) -> Option<f64> {
        (points > 0.0).then(|| points * self.price_step)
    }

    /// Compute fresh levels around `entry_price`. A flat side clears.
    pub fn arm(&mut self, side: PositionSide, entry_price: f64) -> Option<ProtectiveLevels> {
        let sign = match side {
            PositionSide::Flat => {
                self.clear();
                return None;
            }
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        };

        let levels = ProtectiveLevels {
            stop_price: self
                .distance(self.config.stop_loss_points)
                .map(|d| entry_price - sign * d),
            take_profit_price: self
                .distance(self.config.take_profit_points)
                .map(|d| entry_price + sign * d),
            trailing_anchor: None,
        };

        debug!(
            side = %side,
            entry = entry_price,
            stop = ?levels.stop_price,
            take = ?levels.take_profit_price,
            "Protective levels armed"
        );

        self.side = side;
        self.entry_price = entry_price;
        self.levels = Some(levels);
        Some(levels)
    }

    pub fn clear(&mut self) {
        self.side = PositionSide::Flat;
        self.entry_price = 0.0;
        self.levels = None;
    }

    /// Check the bar against the current levels. Stop-loss wins over
    /// take-profit when both are touched by the same bar.
    pub fn check(&self, bar: &Bar) -> Option<ProtectiveExit> {
        let levels = self.levels.as_ref()?;

        if let Some(stop) = levels.stop_price {
            let hit = match self.side {
                PositionSide::Long => bar.low <= stop,
                PositionSide::Short => bar.high >= stop,
                PositionSide::Flat => false,
            };
            if hit {
                let reason = if levels.trailing_anchor.is_some() {
                    IntentReason::TrailingStop
                } else {
                    IntentReason::StopLoss
                };
                info!(instrument = %bar.instrument, level = stop, reason = %reason, "Stop level breached");
                return Some(ProtectiveExit { reason, level: stop });
            }
        }

        if let Some(take) = levels.take_profit_price {
            let hit = match self.side {
                PositionSide::Long => bar.high >= take,
                PositionSide::Short => bar.low <= take,
                PositionSide::Flat => false,
            };
            if hit {
                info!(instrument = %bar.instrument, level = take, "Take-profit level reached");
                return Some(ProtectiveExit {
                    reason: IntentReason::TakeProfit,
                    level: take,
                });
            }
        }

        None
    }

    /// Move the stop behind a favourable close. Returns the new stop when it
    /// moved. Stops only tighten, and only by at least the trailing step.
    pub fn trail(&mut self, bar: &Bar) -> Option<f64> {
        let distance = self.distance(self.config.trailing_stop_points)?;
        let step = self.config.trailing_step_points.max(0.0) * self.price_step;
        let side = self.side;
        let entry = self.entry_price;
        let levels = self.levels.as_mut()?;

        let (profit, candidate) = match side {
            PositionSide::Long => (bar.close - entry, bar.close - distance),
            PositionSide::Short => (entry - bar.close, bar.close + distance),
            PositionSide::Flat => return None,
        };

        if profit < distance + step {
            return None;
        }

        let improves = match (side, levels.stop_price) {
            (_, None) => true,
            (PositionSide::Long, Some(old)) => candidate - old >= step && candidate > old,
            (PositionSide::Short, Some(old)) => old - candidate >= step && candidate < old,
            (PositionSide::Flat, _) => false,
        };
        if !improves {
            return None;
        }

        debug!(
            instrument = %bar.instrument,
            old = ?levels.stop_price,
            new = candidate,
            "Trailing stop moved"
        );
        levels.stop_price = Some(candidate);
        levels.trailing_anchor = Some(bar.close);
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn unit_spec() -> InstrumentSpec {
        InstrumentSpec {
            price_step: 1.0,
            ..InstrumentSpec::default()
        }
    }

    fn bar(low: f64, high: f64, close: f64) -> Bar {
        Bar::new("TEST", Utc::now(), close, high, low, close, 1.0)
    }

    fn monitor(stop: f64, take: f64, trail: f64, step: f64) -> ProtectiveMonitor {
        ProtectiveMonitor::new(
            ProtectionConfig {
                stop_loss_points: stop,
                take_profit_points: take,
                trailing_stop_points: trail,
                trailing_step_points: step,
                mode: ProtectionMode::Synthetic,
            },
            &unit_spec(),
        )
    }

    #[test]
    fn long_levels_are_anchored_to_entry() {
        let mut m = monitor(10.0, 20.0, 0.0, 0.0);
        let levels = m.arm(PositionSide::Long, 100.0).unwrap();
        assert_eq!(levels.stop_price, Some(90.0));
        assert_eq!(levels.take_profit_price, Some(120.0));
    }

    #[test]
    fn short_levels_flip_direction() {
        let mut m = monitor(10.0, 20.0, 0.0, 0.0);
        let levels = m.arm(PositionSide::Short, 100.0).unwrap();
        assert_eq!(levels.stop_price, Some(110.0));
        assert_eq!(levels.take_profit_price, Some(80.0));
    }

    #[test]
    fn zero_distance_disables_leg() {
        let mut m = monitor(0.0, 20.0, 0.0, 0.0);
        let levels = m.arm(PositionSide::Long, 100.0).unwrap();
        assert_eq!(levels.stop_price, None);
        // A crash far below entry does not trigger anything without a stop.
        assert!(m.check(&bar(1.0, 101.0, 50.0)).is_none());
    }

    #[test]
    fn stop_loss_takes_priority_over_take_profit() {
        let mut m = monitor(10.0, 20.0, 0.0, 0.0);
        m.arm(PositionSide::Long, 100.0);
        let exit = m.check(&bar(85.0, 125.0, 100.0)).unwrap();
        assert_eq!(exit.reason, IntentReason::StopLoss);
        assert_eq!(exit.level, 90.0);
    }

    #[test]
    fn short_take_profit_fires_on_low() {
        let mut m = monitor(10.0, 20.0, 0.0, 0.0);
        m.arm(PositionSide::Short, 100.0);
        let exit = m.check(&bar(79.0, 95.0, 82.0)).unwrap();
        assert_eq!(exit.reason, IntentReason::TakeProfit);
        assert_eq!(exit.level, 80.0);
    }

    #[test]
    fn trailing_waits_for_distance_plus_step() {
        let mut m = monitor(10.0, 0.0, 10.0, 2.0);
        m.arm(PositionSide::Long, 100.0);
        assert!(m.trail(&bar(100.0, 111.0, 111.0)).is_none());
        assert_eq!(m.trail(&bar(110.0, 115.0, 115.0)), Some(105.0));
    }

    #[test]
    fn trailing_ignores_moves_smaller_than_step() {
        let mut m = monitor(10.0, 0.0, 10.0, 2.0);
        m.arm(PositionSide::Long, 100.0);
        m.trail(&bar(110.0, 115.0, 115.0));
        assert!(m.trail(&bar(114.0, 116.0, 116.0)).is_none());
        assert_eq!(m.levels().unwrap().stop_price, Some(105.0));
        assert_eq!(m.trail(&bar(114.0, 118.0, 118.0)), Some(108.0));
    }

    #[test]
    fn trailed_stop_reports_trailing_reason() {
        let mut m = monitor(10.0, 0.0, 10.0, 2.0);
        m.arm(PositionSide::Long, 100.0);
        m.trail(&bar(110.0, 115.0, 115.0));
        let exit = m.check(&bar(104.0, 108.0, 106.0)).unwrap();
        assert_eq!(exit.reason, IntentReason::TrailingStop);
        assert_eq!(exit.level, 105.0);
    }

    #[test]
    fn short_trailing_moves_stop_down() {
        let mut m = monitor(10.0, 0.0, 10.0, 2.0);
        m.arm(PositionSide::Short, 100.0);
        assert_eq!(m.trail(&bar(85.0, 90.0, 85.0)), Some(95.0));
        assert!(m.trail(&bar(86.0, 90.0, 88.0)).is_none());
    }

    #[test]
    fn clear_disarms() {
        let mut m = monitor(10.0, 20.0, 0.0, 0.0);
        m.arm(PositionSide::Long, 100.0);
        m.clear();
        assert!(!m.is_armed());
        assert!(m.check(&bar(0.0, 1000.0, 1.0)).is_none());
    }
}
