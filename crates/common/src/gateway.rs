use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{IntentReason, OrderHandle, OrderIntent, OrderSide, Result};

/// Read-only view of an instrument's position as the venue sees it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PortfolioPosition {
    /// Positive for long, negative for short.
    pub volume: f64,
    pub average_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

/// Abstraction over order routing.
///
/// `submit` only acknowledges the order. Fills, rejections and
/// cancellations arrive later as `OrderUpdate`s on the channel the
/// implementation was built with; the runner applies them whenever they
/// show up, possibly several bars later.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Hand an intent to the venue.
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderHandle>;

    /// Cancel a resting order. Cancelling an unknown or already-completed
    /// order is not an error.
    async fn cancel(&self, order_id: &str) -> Result<()>;

    /// Current position, average price and PnL for `instrument`.
    async fn position(&self, instrument: &str) -> Result<PortfolioPosition>;

    async fn buy_market(&self, instrument: &str, volume: f64) -> Result<OrderHandle> {
        let intent = OrderIntent::market(instrument, OrderSide::Buy, volume, IntentReason::Entry);
        self.submit(&intent).await
    }

    async fn sell_market(&self, instrument: &str, volume: f64) -> Result<OrderHandle> {
        let intent = OrderIntent::market(instrument, OrderSide::Sell, volume, IntentReason::Entry);
        self.submit(&intent).await
    }

    async fn buy_limit(&self, instrument: &str, price: f64, volume: f64) -> Result<OrderHandle> {
        let intent =
            OrderIntent::limit(instrument, OrderSide::Buy, volume, price, IntentReason::Entry);
        self.submit(&intent).await
    }

    async fn sell_limit(&self, instrument: &str, price: f64, volume: f64) -> Result<OrderHandle> {
        let intent =
            OrderIntent::limit(instrument, OrderSide::Sell, volume, price, IntentReason::Entry);
        self.submit(&intent).await
    }

    async fn buy_stop(&self, instrument: &str, price: f64, volume: f64) -> Result<OrderHandle> {
        let intent =
            OrderIntent::stop(instrument, OrderSide::Buy, volume, price, IntentReason::Entry);
        self.submit(&intent).await
    }

    async fn sell_stop(&self, instrument: &str, price: f64, volume: f64) -> Result<OrderHandle> {
        let intent =
            OrderIntent::stop(instrument, OrderSide::Sell, volume, price, IntentReason::Entry);
        self.submit(&intent).await
    }
}
