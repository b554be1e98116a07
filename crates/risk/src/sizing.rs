use serde::{Deserialize, Serialize};
use tracing::debug;

use common::InstrumentSpec;

fn default_max_steps() -> u32 {
    5
}

/// Volume scaling applied between trade cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SizingPolicy {
    /// Always trade the base volume.
    #[default]
    Fixed,
    /// Multiply after each losing cycle, reset after a win.
    Martingale {
        multiplier: f64,
        #[serde(default = "default_max_steps")]
        max_steps: u32,
    },
    /// Multiply after each winning cycle, reset after a loss.
    AntiMartingale {
        multiplier: f64,
        #[serde(default = "default_max_steps")]
        max_steps: u32,
    },
}

impl SizingPolicy {
    pub fn multiplier(&self) -> Option<f64> {
        match self {
            SizingPolicy::Fixed => None,
            SizingPolicy::Martingale { multiplier, .. }
            | SizingPolicy::AntiMartingale { multiplier, .. } => Some(*multiplier),
        }
    }
}

/// Computes entry volume from the base volume and the outcome of past
/// cycles. A cycle ends when the position returns to flat.
#[derive(Debug, Clone)]
pub struct VolumeSizer {
    base: f64,
    policy: SizingPolicy,
    steps: u32,
}

impl VolumeSizer {
    pub fn new(base: f64, policy: SizingPolicy) -> Self {
        Self {
            base,
            policy,
            steps: 0,
        }
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    /// Number of consecutive scaling steps currently applied.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Unrounded volume for the next entry.
    pub fn next_volume(&self) -> f64 {
        match self.policy.multiplier() {
            None => self.base,
            Some(m) => self.base * m.powi(self.steps as i32),
        }
    }

    /// Record the realised PnL of a finished cycle. Breakeven leaves the
    /// scaling unchanged.
    pub fn record_cycle(&mut self, realized_pnl: f64) {
        let (scale_up, max_steps) = match self.policy {
            SizingPolicy::Fixed => return,
            SizingPolicy::Martingale { max_steps, .. } => (realized_pnl < 0.0, max_steps),
            SizingPolicy::AntiMartingale { max_steps, .. } => (realized_pnl > 0.0, max_steps),
        };
        if realized_pnl == 0.0 {
            return;
        }
        self.steps = if scale_up {
            (self.steps + 1).min(max_steps)
        } else {
            0
        };
        debug!(pnl = realized_pnl, steps = self.steps, "Sizing steps updated");
    }

    pub fn reset(&mut self) {
        self.steps = 0;
    }
}

/// Floor `volume` to the instrument's volume step. Returns 0 when the
/// result is below the minimum tradable volume.
pub fn round_volume(volume: f64, spec: &InstrumentSpec) -> f64 {
    if !volume.is_finite() || volume <= 0.0 {
        return 0.0;
    }
    let rounded = if spec.volume_step > 0.0 {
        (volume / spec.volume_step + 1e-9).floor() * spec.volume_step
    } else {
        volume
    };
    if rounded <= 0.0 || rounded + 1e-12 < spec.min_volume {
        0.0
    } else {
        rounded
    }
}
