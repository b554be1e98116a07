use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use common::{
    Bar, IntentReason, OrderGateway, OrderIntent, OrderSide, OrderUpdate, PositionState,
};
use strategy::RingConfig;

/// Which way the direct cross is mispriced against the synthetic rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RingDirection {
    /// Direct cross rich: sell it, buy the two legs that build it.
    SellCross,
    /// Direct cross cheap: buy it, sell the synthetic legs.
    BuyCross,
}

impl RingDirection {
    /// Order sides for (base/quote, quote/cross, base/cross).
    fn sides(self) -> [OrderSide; 3] {
        match self {
            RingDirection::SellCross => [OrderSide::Buy, OrderSide::Buy, OrderSide::Sell],
            RingDirection::BuyCross => [OrderSide::Sell, OrderSide::Sell, OrderSide::Buy],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RingStats {
    pub bars: u64,
    pub intents: u64,
    pub fills: u64,
    pub rejections: u64,
    /// Openings or closings where only some legs were accepted.
    pub partial_failures: u64,
    pub realized_pnl: f64,
}

#[derive(Debug, Clone)]
pub struct RingLeg {
    pub instrument: String,
    pub position: PositionState,
    pub last_price: Option<f64>,
    pending: Option<String>,
}

impl RingLeg {
    fn new(instrument: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            position: PositionState::flat(),
            last_price: None,
            pending: None,
        }
    }
}

/// Triangular arbitrage over three instruments, each with its own position.
///
/// Legs are submitted one after another. A leg that fails is not rolled
/// back on the others; the ring just records a partial failure and closes
/// whatever did open once the deviation collapses.
pub struct RingArbitrage {
    config: RingConfig,
    legs: [RingLeg; 3],
    direction: Option<RingDirection>,
    gateway: Arc<dyn OrderGateway>,
    stats: RingStats,
}

impl RingArbitrage {
    pub fn new(config: RingConfig, gateway: Arc<dyn OrderGateway>) -> Self {
        let legs = [
            RingLeg::new(&config.base_quote),
            RingLeg::new(&config.quote_cross),
            RingLeg::new(&config.base_cross),
        ];
        Self {
            config,
            legs,
            direction: None,
            gateway,
            stats: RingStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn legs(&self) -> &[RingLeg; 3] {
        &self.legs
    }

    pub fn direction(&self) -> Option<RingDirection> {
        self.direction
    }

    pub fn stats(&self) -> &RingStats {
        &self.stats
    }

    pub fn instruments(&self) -> [&str; 3] {
        [
            self.legs[0].instrument.as_str(),
            self.legs[1].instrument.as_str(),
            self.legs[2].instrument.as_str(),
        ]
    }

    /// Relative deviation of the direct cross from base/quote × quote/cross.
    pub fn deviation(&self) -> Option<f64> {
        let [bq, qc, bc] = [
            self.legs[0].last_price?,
            self.legs[1].last_price?,
            self.legs[2].last_price?,
        ];
        let synthetic = bq * qc;
        (synthetic > 0.0).then(|| bc / synthetic - 1.0)
    }

    fn is_busy(&self) -> bool {
        self.legs.iter().any(|leg| leg.pending.is_some())
    }

    /// Mark a leg's price and act on the deviation. Returns the intents that
    /// the gateway accepted.
    pub async fn on_bar(&mut self, bar: &Bar) -> Vec<OrderIntent> {
        let Some(leg) = self.legs.iter_mut().find(|l| l.instrument == bar.instrument) else {
            return Vec::new();
        };
        if !bar.is_final {
            return Vec::new();
        }
        leg.last_price = Some(bar.close);
        self.stats.bars += 1;

        let Some(deviation) = self.deviation() else {
            return Vec::new();
        };
        if self.is_busy() {
            return Vec::new();
        }

        match self.direction {
            None if deviation > self.config.entry_threshold => {
                self.open(RingDirection::SellCross, deviation).await
            }
            None if deviation < -self.config.entry_threshold => {
                self.open(RingDirection::BuyCross, deviation).await
            }
            Some(_) if deviation.abs() <= self.config.exit_threshold => self.close(deviation).await,
            _ => Vec::new(),
        }
    }

    async fn open(&mut self, direction: RingDirection, deviation: f64) -> Vec<OrderIntent> {
        info!(ring = %self.config.name, deviation = deviation, direction = ?direction, "Ring opening");
        let volume = self.config.volume;
        let orders: Vec<(usize, OrderSide, f64)> = direction
            .sides()
            .into_iter()
            .enumerate()
            .map(|(i, side)| (i, side, volume))
            .collect();
        let accepted = self.issue(orders).await;
        if !accepted.is_empty() {
            self.direction = Some(direction);
        }
        accepted
    }

    async fn close(&mut self, deviation: f64) -> Vec<OrderIntent> {
        info!(ring = %self.config.name, deviation = deviation, "Ring closing");
        let orders: Vec<(usize, OrderSide, f64)> = self
            .legs
            .iter()
            .enumerate()
            .filter_map(|(i, leg)| {
                leg.position
                    .side
                    .closing_side()
                    .map(|side| (i, side, leg.position.volume))
            })
            .collect();
        let accepted = self.issue(orders).await;
        self.direction = None;
        accepted
    }

    async fn issue(&mut self, orders: Vec<(usize, OrderSide, f64)>) -> Vec<OrderIntent> {
        let requested = orders.len();
        let mut accepted = Vec::with_capacity(requested);

        for (index, side, volume) in orders {
            let intent = OrderIntent::market(
                self.legs[index].instrument.clone(),
                side,
                volume,
                IntentReason::Ring,
            );
            match self.gateway.submit(&intent).await {
                Ok(handle) => {
                    self.legs[index].pending = Some(handle.order_id);
                    self.stats.intents += 1;
                    accepted.push(intent);
                }
                Err(e) => {
                    self.stats.rejections += 1;
                    warn!(ring = %self.config.name, instrument = %intent.instrument, error = %e, "Ring leg failed");
                }
            }
        }

        if !accepted.is_empty() && accepted.len() < requested {
            self.stats.partial_failures += 1;
            warn!(
                ring = %self.config.name,
                accepted = accepted.len(),
                requested = requested,
                "Ring legs partially issued; no rollback"
            );
        }
        accepted
    }

    pub fn on_update(&mut self, update: &OrderUpdate) {
        let order_id = update.order_id();
        let Some(leg) = self
            .legs
            .iter_mut()
            .find(|l| l.pending.as_deref() == Some(order_id))
        else {
            return;
        };

        match update {
            OrderUpdate::Filled(fill) => {
                let effect = leg.position.apply_fill(fill);
                leg.pending = None;
                self.stats.fills += 1;
                self.stats.realized_pnl += effect.realized_pnl;
                debug!(
                    ring = %self.config.name,
                    instrument = %leg.instrument,
                    transition = ?effect.transition,
                    "Ring leg filled"
                );
            }
            OrderUpdate::Rejected { reason, .. } => {
                leg.pending = None;
                self.stats.rejections += 1;
                warn!(ring = %self.config.name, instrument = %leg.instrument, reason = %reason, "Ring leg rejected");
            }
            OrderUpdate::Cancelled { .. } => leg.pending = None,
        }
    }
}
