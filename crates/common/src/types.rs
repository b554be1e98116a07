use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Volumes below this are treated as zero when reconciling fills.
pub const VOLUME_EPSILON: f64 = 1e-9;

/// Tick size used when an instrument does not declare a usable price step.
pub const DEFAULT_PRICE_STEP: f64 = 0.0001;

/// One OHLCV time bar delivered by the bar feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// True once the bar has closed. Only final bars reach indicators and
    /// the controller.
    #[serde(default = "default_true")]
    pub is_final: bool,
}

fn default_true() -> bool {
    true
}

impl Bar {
    pub fn new(
        instrument: impl Into<String>,
        open_time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            open_time,
            open,
            high,
            low,
            close,
            volume,
            is_final: true,
        }
    }

    /// (high + low) / 2
    pub fn median(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    /// (high + low + close) / 3
    pub fn typical(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
    Stop,
}

/// Why the controller (or monitor) produced an intent. Carried through to
/// logs and used to route fills back to protective bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentReason {
    Entry,
    Exit,
    Reversal,
    StopLoss,
    TakeProfit,
    TrailingStop,
    GridLayer,
    Ring,
}

impl IntentReason {
    pub fn is_protective(self) -> bool {
        matches!(
            self,
            IntentReason::StopLoss | IntentReason::TakeProfit | IntentReason::TrailingStop
        )
    }
}

impl std::fmt::Display for IntentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntentReason::Entry => "entry",
            IntentReason::Exit => "exit",
            IntentReason::Reversal => "reversal",
            IntentReason::StopLoss => "stop-loss",
            IntentReason::TakeProfit => "take-profit",
            IntentReason::TrailingStop => "trailing-stop",
            IntentReason::GridLayer => "grid-layer",
            IntentReason::Ring => "ring",
        };
        f.write_str(s)
    }
}

/// An order the controller wants executed. Handed to the gateway and not
/// retained afterwards beyond its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub volume: f64,
    pub kind: OrderKind,
    /// `None` for market orders; trigger/limit price otherwise.
    pub price: Option<f64>,
    pub reason: IntentReason,
    /// Resting orders sharing a group are one-cancels-other: the venue
    /// fills at most one of them and cancels the rest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oco_group: Option<String>,
}

impl OrderIntent {
    fn build(
        instrument: impl Into<String>,
        side: OrderSide,
        volume: f64,
        kind: OrderKind,
        price: Option<f64>,
        reason: IntentReason,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            instrument: instrument.into(),
            side,
            volume,
            kind,
            price,
            reason,
            oco_group: None,
        }
    }

    pub fn in_oco_group(mut self, group: impl Into<String>) -> Self {
        self.oco_group = Some(group.into());
        self
    }

    pub fn market(
        instrument: impl Into<String>,
        side: OrderSide,
        volume: f64,
        reason: IntentReason,
    ) -> Self {
        Self::build(instrument, side, volume, OrderKind::Market, None, reason)
    }

    pub fn limit(
        instrument: impl Into<String>,
        side: OrderSide,
        volume: f64,
        price: f64,
        reason: IntentReason,
    ) -> Self {
        Self::build(instrument, side, volume, OrderKind::Limit, Some(price), reason)
    }

    pub fn stop(
        instrument: impl Into<String>,
        side: OrderSide,
        volume: f64,
        price: f64,
        reason: IntentReason,
    ) -> Self {
        Self::build(instrument, side, volume, OrderKind::Stop, Some(price), reason)
    }
}

/// Execution report for (part of) an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub price: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// Asynchronous order lifecycle notification from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderUpdate {
    Filled(Fill),
    Rejected {
        order_id: String,
        instrument: String,
        reason: String,
    },
    Cancelled {
        order_id: String,
    },
}

impl OrderUpdate {
    pub fn order_id(&self) -> &str {
        match self {
            OrderUpdate::Filled(fill) => &fill.order_id,
            OrderUpdate::Rejected { order_id, .. } | OrderUpdate::Cancelled { order_id } => {
                order_id
            }
        }
    }
}

/// Handle returned by the gateway for a submitted intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHandle {
    pub order_id: String,
}

/// Per-bar recommendation of a signal evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SignalDecision {
    EnterLong,
    EnterShort,
    ExitLong,
    ExitShort,
    #[default]
    Hold,
}

impl std::fmt::Display for SignalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalDecision::EnterLong => "enter-long",
            SignalDecision::EnterShort => "enter-short",
            SignalDecision::ExitLong => "exit-long",
            SignalDecision::ExitShort => "exit-short",
            SignalDecision::Hold => "hold",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    #[default]
    Flat,
    Long,
    Short,
}

impl PositionSide {
    /// Order side that reduces a position on this side.
    pub fn closing_side(self) -> Option<OrderSide> {
        match self {
            PositionSide::Flat => None,
            PositionSide::Long => Some(OrderSide::Sell),
            PositionSide::Short => Some(OrderSide::Buy),
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Flat => write!(f, "flat"),
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// What a fill did to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened,
    Increased,
    Reduced,
    Closed,
    Flipped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillEffect {
    pub transition: Transition,
    pub realized_pnl: f64,
}

/// Net position for one instrument.
///
/// `volume == 0` if and only if `side == Flat`. The only mutation path is
/// [`PositionState::apply_fill`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PositionState {
    pub side: PositionSide,
    pub volume: f64,
    pub average_entry_price: f64,
    pub entry_time: Option<DateTime<Utc>>,
}

impl PositionState {
    pub fn flat() -> Self {
        Self::default()
    }

    pub fn is_flat(&self) -> bool {
        self.side == PositionSide::Flat
    }

    /// Positive for long, negative for short.
    pub fn signed_volume(&self) -> f64 {
        match self.side {
            PositionSide::Flat => 0.0,
            PositionSide::Long => self.volume,
            PositionSide::Short => -self.volume,
        }
    }

    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        self.signed_volume() * (mark - self.average_entry_price)
    }

    /// Apply a confirmed fill. Same-direction fills re-average the entry
    /// price by volume; opposite fills realise PnL on the closed part and
    /// open the remainder (if any) at the fill price.
    pub fn apply_fill(&mut self, fill: &Fill) -> FillEffect {
        let current = self.signed_volume();
        let delta = fill.side.sign() * fill.volume;
        let next = current + delta;

        if current.abs() < VOLUME_EPSILON {
            self.open_at(next, fill.price, fill.timestamp);
            return FillEffect {
                transition: Transition::Opened,
                realized_pnl: 0.0,
            };
        }

        if current.signum() == delta.signum() {
            let total = current.abs() + fill.volume;
            self.average_entry_price =
                (self.average_entry_price * current.abs() + fill.price * fill.volume) / total;
            self.volume = total;
            return FillEffect {
                transition: Transition::Increased,
                realized_pnl: 0.0,
            };
        }

        let closed = fill.volume.min(current.abs());
        let realized_pnl = closed * (fill.price - self.average_entry_price) * current.signum();

        let transition = if next.abs() < VOLUME_EPSILON {
            *self = Self::flat();
            Transition::Closed
        } else if next.signum() != current.signum() {
            self.open_at(next, fill.price, fill.timestamp);
            Transition::Flipped
        } else {
            self.volume = next.abs();
            Transition::Reduced
        };

        FillEffect {
            transition,
            realized_pnl,
        }
    }

    fn open_at(&mut self, signed: f64, price: f64, at: DateTime<Utc>) {
        if signed.abs() < VOLUME_EPSILON {
            *self = Self::flat();
            return;
        }
        self.side = if signed > 0.0 {
            PositionSide::Long
        } else {
            PositionSide::Short
        };
        self.volume = signed.abs();
        self.average_entry_price = price;
        self.entry_time = Some(at);
    }
}

/// Trading constraints of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct InstrumentSpec {
    /// Minimum price increment. Zero or missing falls back to
    /// [`DEFAULT_PRICE_STEP`].
    #[serde(default)]
    pub price_step: f64,
    /// Volume granularity. Zero means any volume is tradable.
    #[serde(default)]
    pub volume_step: f64,
    /// Smallest tradable volume.
    #[serde(default)]
    pub min_volume: f64,
}

impl InstrumentSpec {
    pub fn has_price_step(&self) -> bool {
        self.price_step.is_finite() && self.price_step > 0.0
    }

    pub fn effective_price_step(&self) -> f64 {
        if self.has_price_step() {
            self.price_step
        } else {
            DEFAULT_PRICE_STEP
        }
    }
}

/// Lifecycle state of a strategy runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
        }
    }
}

/// Commands sent to a runner via its command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    Start,
    Stop,
    Pause,
    Resume,
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(side: OrderSide, price: f64, volume: f64) -> Fill {
        Fill {
            order_id: "o".into(),
            instrument: "TEST".into(),
            side,
            price,
            volume,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn opening_fill_sets_side_and_entry() {
        let mut pos = PositionState::flat();
        let effect = pos.apply_fill(&fill(OrderSide::Buy, 100.0, 1.0));
        assert_eq!(effect.transition, Transition::Opened);
        assert_eq!(pos.side, PositionSide::Long);
        assert_eq!(pos.volume, 1.0);
        assert_eq!(pos.average_entry_price, 100.0);
        assert!(pos.entry_time.is_some());
    }

    #[test]
    fn adding_fill_reaverages_by_volume() {
        let mut pos = PositionState::flat();
        pos.apply_fill(&fill(OrderSide::Buy, 100.0, 1.0));
        let effect = pos.apply_fill(&fill(OrderSide::Buy, 90.0, 3.0));
        assert_eq!(effect.transition, Transition::Increased);
        assert_eq!(pos.volume, 4.0);
        assert!((pos.average_entry_price - 92.5).abs() < 1e-9);
    }

    #[test]
    fn full_close_resets_to_flat_and_realizes_pnl() {
        let mut pos = PositionState::flat();
        pos.apply_fill(&fill(OrderSide::Sell, 100.0, 2.0));
        let effect = pos.apply_fill(&fill(OrderSide::Buy, 95.0, 2.0));
        assert_eq!(effect.transition, Transition::Closed);
        assert!((effect.realized_pnl - 10.0).abs() < 1e-9);
        assert_eq!(pos, PositionState::flat());
    }

    #[test]
    fn oversized_opposite_fill_flips_at_fill_price() {
        let mut pos = PositionState::flat();
        pos.apply_fill(&fill(OrderSide::Sell, 100.0, 1.0));
        let effect = pos.apply_fill(&fill(OrderSide::Buy, 104.0, 2.0));
        assert_eq!(effect.transition, Transition::Flipped);
        assert!((effect.realized_pnl + 4.0).abs() < 1e-9);
        assert_eq!(pos.side, PositionSide::Long);
        assert_eq!(pos.volume, 1.0);
        assert_eq!(pos.average_entry_price, 104.0);
    }

    #[test]
    fn partial_close_keeps_entry_price() {
        let mut pos = PositionState::flat();
        pos.apply_fill(&fill(OrderSide::Buy, 100.0, 3.0));
        let effect = pos.apply_fill(&fill(OrderSide::Sell, 110.0, 1.0));
        assert_eq!(effect.transition, Transition::Reduced);
        assert!((effect.realized_pnl - 10.0).abs() < 1e-9);
        assert_eq!(pos.volume, 2.0);
        assert_eq!(pos.average_entry_price, 100.0);
    }

    #[test]
    fn missing_price_step_falls_back_to_default() {
        let spec = InstrumentSpec::default();
        assert_eq!(spec.effective_price_step(), DEFAULT_PRICE_STEP);
        let spec = InstrumentSpec {
            price_step: 0.5,
            ..InstrumentSpec::default()
        };
        assert_eq!(spec.effective_price_step(), 0.5);
    }
}
