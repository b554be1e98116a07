use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use common::{
    Bar, Error, Fill, OrderGateway, OrderHandle, OrderIntent, OrderKind, OrderSide, OrderUpdate,
    PortfolioPosition, PositionState, Result,
};

/// Simulated order gateway for replays and paper trading.
///
/// Market orders fill at the latest known close with configurable slippage,
/// either immediately or after `latency_bars` bars (then at that bar's
/// open). Limit and stop orders rest until a bar trades through them.
/// Every outcome is reported on the update channel, never synchronously.
pub struct PaperGateway {
    /// Slippage in basis points applied to market and stop fills.
    slippage_bps: f64,
    latency_bars: u32,
    updates: mpsc::UnboundedSender<OrderUpdate>,
    book: Mutex<Book>,
}

#[derive(Default)]
struct Book {
    prices: HashMap<String, (f64, DateTime<Utc>)>,
    resting: Vec<OrderIntent>,
    queued: Vec<(OrderIntent, u32)>,
    ledgers: HashMap<String, Ledger>,
}

#[derive(Default)]
struct Ledger {
    position: PositionState,
    realized_pnl: f64,
}

impl PaperGateway {
    pub fn new(
        slippage_bps: f64,
        latency_bars: u32,
        updates: mpsc::UnboundedSender<OrderUpdate>,
    ) -> Self {
        info!(
            slippage_bps = slippage_bps,
            latency_bars = latency_bars,
            "PaperGateway initialized"
        );
        Self {
            slippage_bps,
            latency_bars,
            updates,
            book: Mutex::new(Book::default()),
        }
    }

    /// Apply slippage: buys pay more, sells receive less.
    fn slipped(&self, side: OrderSide, price: f64) -> f64 {
        price * (1.0 + side.sign() * self.slippage_bps / 10_000.0)
    }

    /// Mark the bar's prices, release latent market orders and trigger
    /// resting orders the bar traded through. Called before the strategy
    /// sees the same bar.
    pub async fn on_bar(&self, bar: &Bar) {
        let mut book = self.book.lock().await;

        let mut fills = Vec::new();

        let mut still_queued = Vec::with_capacity(book.queued.len());
        for (intent, bars_left) in book.queued.drain(..) {
            if intent.instrument != bar.instrument {
                still_queued.push((intent, bars_left));
            } else if bars_left <= 1 {
                let price = self.slipped(intent.side, bar.open);
                fills.push(fill_for(&intent, price, bar.open_time));
            } else {
                still_queued.push((intent, bars_left - 1));
            }
        }
        book.queued = still_queued;

        let mut triggered = Vec::new();
        let mut still_resting = Vec::with_capacity(book.resting.len());
        for intent in book.resting.drain(..) {
            match (intent.instrument == bar.instrument)
                .then(|| self.trigger_price(&intent, bar))
                .flatten()
            {
                Some(price) => triggered.push((intent, price)),
                None => still_resting.push(intent),
            }
        }

        // Within an OCO group a bar reaching both legs exits at the stop.
        triggered.sort_by_key(|(intent, _)| intent.kind != OrderKind::Stop);
        let mut done_groups = HashSet::new();
        let mut cancelled = Vec::new();
        for (intent, price) in triggered {
            match &intent.oco_group {
                Some(group) if !done_groups.insert(group.clone()) => cancelled.push(intent.id),
                _ => fills.push(fill_for(&intent, price, bar.open_time)),
            }
        }
        still_resting.retain(|intent| match &intent.oco_group {
            Some(group) if done_groups.contains(group) => {
                cancelled.push(intent.id.clone());
                false
            }
            _ => true,
        });
        book.resting = still_resting;

        book.prices
            .insert(bar.instrument.clone(), (bar.close, bar.open_time));

        for fill in fills {
            self.record_fill(&mut book, fill);
        }
        for order_id in cancelled {
            debug!(id = %order_id, "OCO sibling cancelled");
            let _ = self.updates.send(OrderUpdate::Cancelled { order_id });
        }
    }

    /// Fill price for a resting order if `bar` reaches it. Gaps through the
    /// level fill at the open.
    fn trigger_price(&self, intent: &OrderIntent, bar: &Bar) -> Option<f64> {
        let level = intent.price?;
        match (intent.kind, intent.side) {
            (OrderKind::Limit, OrderSide::Buy) => (bar.low <= level).then(|| bar.open.min(level)),
            (OrderKind::Limit, OrderSide::Sell) => {
                (bar.high >= level).then(|| bar.open.max(level))
            }
            (OrderKind::Stop, OrderSide::Buy) => (bar.high >= level)
                .then(|| self.slipped(OrderSide::Buy, bar.open.max(level))),
            (OrderKind::Stop, OrderSide::Sell) => (bar.low <= level)
                .then(|| self.slipped(OrderSide::Sell, bar.open.min(level))),
            (OrderKind::Market, _) => None,
        }
    }

    fn record_fill(&self, book: &mut Book, fill: Fill) {
        let ledger = book.ledgers.entry(fill.instrument.clone()).or_default();
        let effect = ledger.position.apply_fill(&fill);
        ledger.realized_pnl += effect.realized_pnl;

        debug!(
            instrument = %fill.instrument,
            side = %fill.side,
            price = fill.price,
            volume = fill.volume,
            transition = ?effect.transition,
            "Paper fill simulated"
        );

        if self.updates.send(OrderUpdate::Filled(fill)).is_err() {
            warn!("Order update channel closed; fill not delivered");
        }
    }

    /// Report a rejection on the update channel and return it as an error.
    fn reject(&self, intent: &OrderIntent, reason: String) -> Error {
        warn!(id = %intent.id, instrument = %intent.instrument, reason = %reason, "Paper order rejected");
        let _ = self.updates.send(OrderUpdate::Rejected {
            order_id: intent.id.clone(),
            instrument: intent.instrument.clone(),
            reason: reason.clone(),
        });
        Error::OrderRejected { reason }
    }

    /// Number of orders waiting at the venue (resting plus latent market).
    pub async fn open_orders(&self) -> usize {
        let book = self.book.lock().await;
        book.resting.len() + book.queued.len()
    }
}

fn fill_for(intent: &OrderIntent, price: f64, timestamp: DateTime<Utc>) -> Fill {
    Fill {
        order_id: intent.id.clone(),
        instrument: intent.instrument.clone(),
        side: intent.side,
        price,
        volume: intent.volume,
        timestamp,
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderHandle> {
        if !(intent.volume.is_finite() && intent.volume > 0.0) {
            return Err(self.reject(intent, format!("non-positive volume {}", intent.volume)));
        }

        let mut book = self.book.lock().await;
        match intent.kind {
            OrderKind::Market if self.latency_bars == 0 => {
                let Some((mid, at)) = book.prices.get(&intent.instrument).copied() else {
                    return Err(self.reject(
                        intent,
                        format!("no price for '{}'; ensure bars are flowing", intent.instrument),
                    ));
                };
                let fill = fill_for(intent, self.slipped(intent.side, mid), at);
                self.record_fill(&mut book, fill);
            }
            OrderKind::Market => {
                book.queued.push((intent.clone(), self.latency_bars));
            }
            OrderKind::Limit | OrderKind::Stop => {
                let Some(price) = intent.price.filter(|p| p.is_finite() && *p > 0.0) else {
                    return Err(self.reject(
                        intent,
                        format!("{:?} order without a valid price", intent.kind),
                    ));
                };
                debug!(id = %intent.id, kind = ?intent.kind, price = price, "Resting order placed");
                book.resting.push(intent.clone());
            }
        }

        Ok(OrderHandle {
            order_id: intent.id.clone(),
        })
    }

    async fn cancel(&self, order_id: &str) -> Result<()> {
        let mut book = self.book.lock().await;
        let before = book.resting.len() + book.queued.len();
        book.resting.retain(|o| o.id != order_id);
        book.queued.retain(|(o, _)| o.id != order_id);
        if book.resting.len() + book.queued.len() < before {
            debug!(id = %order_id, "Order cancelled");
            let _ = self.updates.send(OrderUpdate::Cancelled {
                order_id: order_id.to_string(),
            });
        }
        Ok(())
    }

    async fn position(&self, instrument: &str) -> Result<PortfolioPosition> {
        let book = self.book.lock().await;
        let mark = book.prices.get(instrument).map(|(p, _)| *p);
        Ok(book
            .ledgers
            .get(instrument)
            .map(|l| PortfolioPosition {
                volume: l.position.signed_volume(),
                average_price: l.position.average_entry_price,
                realized_pnl: l.realized_pnl,
                unrealized_pnl: mark.map_or(0.0, |m| l.position.unrealized_pnl(m)),
            })
            .unwrap_or_default())
    }
}
