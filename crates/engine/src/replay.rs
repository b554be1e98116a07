use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

use common::{Bar, OrderGateway, OrderIntent, OrderUpdate, PortfolioPosition, PositionState, Result};
use paper::PaperGateway;
use strategy::{RingConfig, StrategyDefinition};

use crate::ring::{RingArbitrage, RingStats};
use crate::runner::{RunnerStats, StrategyRunner};

/// Outcome of replaying one strategy over a bar series.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub strategy: String,
    pub instrument: String,
    pub stats: RunnerStats,
    pub position: PositionState,
    /// The venue's view, including unrealised PnL at the last close.
    pub portfolio: PortfolioPosition,
}

/// Replays recorded bars through a runner on a paper gateway, one bar at a
/// time: venue first (resting and latent orders), then the strategy, with
/// all order updates applied in between.
pub struct Replay {
    runner: StrategyRunner,
    gateway: Arc<PaperGateway>,
    updates: mpsc::UnboundedReceiver<OrderUpdate>,
}

impl Replay {
    pub fn new(definition: StrategyDefinition, slippage_bps: f64, latency_bars: u32) -> Self {
        let (update_tx, updates) = mpsc::unbounded_channel();
        let gateway = Arc::new(PaperGateway::new(slippage_bps, latency_bars, update_tx));
        let mut runner = StrategyRunner::new(definition, gateway.clone());
        runner.start();
        Self {
            runner,
            gateway,
            updates,
        }
    }

    pub fn runner(&self) -> &StrategyRunner {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut StrategyRunner {
        &mut self.runner
    }

    pub fn gateway(&self) -> &PaperGateway {
        &self.gateway
    }

    /// Advance by one bar. Returns the intent the strategy submitted.
    pub async fn step(&mut self, bar: &Bar) -> Result<Option<OrderIntent>> {
        self.gateway.on_bar(bar).await;
        self.drain().await?;
        let intent = self.runner.on_bar(bar).await?;
        self.drain().await?;
        Ok(intent)
    }

    async fn drain(&mut self) -> Result<()> {
        while let Ok(update) = self.updates.try_recv() {
            self.runner.on_update(update).await?;
        }
        Ok(())
    }

    pub async fn summary(&self) -> Result<ReplaySummary> {
        let definition = self.runner.definition();
        Ok(ReplaySummary {
            strategy: definition.name.clone(),
            instrument: definition.instrument.clone(),
            stats: self.runner.stats(),
            position: self.runner.position(),
            portfolio: self.gateway.position(&definition.instrument).await?,
        })
    }

    pub async fn run(mut self, bars: &[Bar]) -> Result<ReplaySummary> {
        for bar in bars {
            self.step(bar).await?;
        }
        let summary = self.summary().await?;
        info!(
            strategy = %summary.strategy,
            bars = summary.stats.bars,
            intents = summary.stats.intents,
            realized_pnl = summary.stats.realized_pnl,
            "Replay finished"
        );
        Ok(summary)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RingSummary {
    pub ring: String,
    pub stats: RingStats,
    /// Signed volume per leg, in base/quote, quote/cross, base/cross order.
    pub leg_volumes: [f64; 3],
}

/// Replay a ring over bars of its three instruments, in time order.
pub async fn replay_ring(
    config: RingConfig,
    bars: &[Bar],
    slippage_bps: f64,
    latency_bars: u32,
) -> RingSummary {
    let (update_tx, mut updates) = mpsc::unbounded_channel();
    let gateway = Arc::new(PaperGateway::new(slippage_bps, latency_bars, update_tx));
    let mut ring = RingArbitrage::new(config, gateway.clone());

    let mut ordered: Vec<&Bar> = bars
        .iter()
        .filter(|b| ring.instruments().contains(&b.instrument.as_str()))
        .collect();
    ordered.sort_by_key(|b| b.open_time);

    for bar in ordered {
        gateway.on_bar(bar).await;
        while let Ok(update) = updates.try_recv() {
            ring.on_update(&update);
        }
        ring.on_bar(bar).await;
        while let Ok(update) = updates.try_recv() {
            ring.on_update(&update);
        }
    }

    let legs = ring.legs();
    let summary = RingSummary {
        ring: ring.name().to_string(),
        stats: ring.stats().clone(),
        leg_volumes: [
            legs[0].position.signed_volume(),
            legs[1].position.signed_volume(),
            legs[2].position.signed_volume(),
        ],
    };
    info!(
        ring = %summary.ring,
        intents = summary.stats.intents,
        partial_failures = summary.stats.partial_failures,
        realized_pnl = summary.stats.realized_pnl,
        "Ring replay finished"
    );
    summary
}
