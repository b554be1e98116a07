use tracing::{debug, info, warn};

use common::{
    Fill, FillEffect, InstrumentSpec, IntentReason, OrderIntent, OrderSide, PositionSide,
    PositionState, SignalDecision, VOLUME_EPSILON,
};
use risk::round_volume;

/// An intent handed to the gateway whose outcome has not arrived yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub order_id: String,
    pub reason: IntentReason,
    pub remaining: f64,
}

/// Single-position state machine: turns decisions into at most one order
/// intent and applies fills to the position.
///
/// Decisions are edge-triggered. A non-Hold decision that repeats the
/// previous bar's decision issues nothing, so a level-based evaluator does
/// not re-enter every bar while its condition holds. While an intent is
/// pending no further intents are issued.
#[derive(Debug, Clone)]
pub struct PositionController {
    instrument: String,
    spec: InstrumentSpec,
    position: PositionState,
    pending: Option<PendingOrder>,
    last_decision: SignalDecision,
    dropped_intents: u64,
}

impl PositionController {
    pub fn new(instrument: impl Into<String>, spec: InstrumentSpec) -> Self {
        Self {
            instrument: instrument.into(),
            spec,
            position: PositionState::flat(),
            pending: None,
            last_decision: SignalDecision::Hold,
            dropped_intents: 0,
        }
    }

    pub fn position(&self) -> &PositionState {
        &self.position
    }

    pub fn pending(&self) -> Option<&PendingOrder> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_decision(&self) -> SignalDecision {
        self.last_decision
    }

    /// Intents dropped because their volume rounded to zero.
    pub fn dropped_intents(&self) -> u64 {
        self.dropped_intents
    }

    /// Map a decision to an intent. `entry_volume` is the unrounded size of
    /// a new position; closes always use the full open volume.
    pub fn decide(&mut self, decision: SignalDecision, entry_volume: f64) -> Option<OrderIntent> {
        if decision == SignalDecision::Hold {
            self.last_decision = decision;
            return None;
        }
        if decision == self.last_decision {
            debug!(instrument = %self.instrument, decision = %decision, "Repeated decision ignored");
            return None;
        }
        // Not remembered: the same decision is acted on once the order settles.
        if let Some(pending) = &self.pending {
            debug!(
                instrument = %self.instrument,
                decision = %decision,
                pending = %pending.order_id,
                "Decision deferred while an order is pending"
            );
            return None;
        }
        self.last_decision = decision;

        let held = self.position.volume;
        match (self.position.side, decision) {
            (PositionSide::Flat, SignalDecision::EnterLong) => {
                self.entry(OrderSide::Buy, entry_volume)
            }
            (PositionSide::Flat, SignalDecision::EnterShort) => {
                self.entry(OrderSide::Sell, entry_volume)
            }
            (PositionSide::Long, SignalDecision::ExitLong) => {
                self.issue(OrderSide::Sell, held, IntentReason::Exit)
            }
            (PositionSide::Short, SignalDecision::ExitShort) => {
                self.issue(OrderSide::Buy, held, IntentReason::Exit)
            }
            (PositionSide::Long, SignalDecision::EnterShort) => {
                self.reversal(OrderSide::Sell, entry_volume, held)
            }
            (PositionSide::Short, SignalDecision::EnterLong) => {
                self.reversal(OrderSide::Buy, entry_volume, held)
            }
            _ => None,
        }
    }

    /// Close the whole position for a protective reason. Skipped while
    /// another order is in flight.
    pub fn force_exit(&mut self, reason: IntentReason) -> Option<OrderIntent> {
        let side = self.position.side.closing_side()?;
        if self.pending.is_some() {
            debug!(instrument = %self.instrument, reason = %reason, "Forced exit deferred: order pending");
            return None;
        }
        let volume = self.position.volume;
        self.issue(side, volume, reason)
    }

    /// Same-direction averaging order for the grid.
    pub fn add_layer(&mut self, volume: f64) -> Option<OrderIntent> {
        let side = self.position.side.closing_side()?.opposite();
        if self.pending.is_some() {
            return None;
        }
        let volume = self.tradable(volume, IntentReason::GridLayer)?;
        self.issue(side, volume, IntentReason::GridLayer)
    }

    /// Apply a fill. The only path that mutates the position.
    pub fn on_fill(&mut self, fill: &Fill) -> FillEffect {
        let effect = self.position.apply_fill(fill);

        if let Some(pending) = self.pending.as_mut() {
            if pending.order_id == fill.order_id {
                pending.remaining -= fill.volume;
                if pending.remaining <= VOLUME_EPSILON {
                    self.pending = None;
                }
            }
        }

        debug!(
            instrument = %self.instrument,
            side = %self.position.side,
            volume = self.position.volume,
            avg = self.position.average_entry_price,
            transition = ?effect.transition,
            "Position updated"
        );
        effect
    }

    /// Clear the pending order if `order_id` is it. A rejected signal may be
    /// retried on the next bar, so the edge detector is re-armed.
    pub fn on_rejected(&mut self, order_id: &str) -> bool {
        if self.take_pending(order_id) {
            self.last_decision = SignalDecision::Hold;
            true
        } else {
            false
        }
    }

    pub fn on_cancelled(&mut self, order_id: &str) -> bool {
        self.take_pending(order_id)
    }

    fn take_pending(&mut self, order_id: &str) -> bool {
        if self.pending.as_ref().is_some_and(|p| p.order_id == order_id) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    fn tradable(&mut self, volume: f64, reason: IntentReason) -> Option<f64> {
        let rounded = round_volume(volume, &self.spec);
        if rounded <= 0.0 {
            self.dropped_intents += 1;
            warn!(
                instrument = %self.instrument,
                requested = volume,
                reason = %reason,
                min_volume = self.spec.min_volume,
                "Order volume rounds to zero; intent dropped"
            );
            return None;
        }
        Some(rounded)
    }

    fn entry(&mut self, side: OrderSide, volume: f64) -> Option<OrderIntent> {
        let volume = self.tradable(volume, IntentReason::Entry)?;
        self.issue(side, volume, IntentReason::Entry)
    }

    /// Close-and-flip as one order. If the new leg rounds to zero the order
    /// still closes the existing position.
    fn reversal(&mut self, side: OrderSide, entry_volume: f64, held: f64) -> Option<OrderIntent> {
        match self.tradable(entry_volume, IntentReason::Reversal) {
            Some(volume) => self.issue(side, volume + held, IntentReason::Reversal),
            None => self.issue(side, held, IntentReason::Exit),
        }
    }

    fn issue(&mut self, side: OrderSide, volume: f64, reason: IntentReason) -> Option<OrderIntent> {
        let intent = OrderIntent::market(self.instrument.clone(), side, volume, reason);
        info!(
            instrument = %intent.instrument,
            side = %side,
            volume = volume,
            reason = %reason,
            "Order intent issued"
        );
        self.pending = Some(PendingOrder {
            order_id: intent.id.clone(),
            reason,
            remaining: volume,
        });
        Some(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn controller() -> PositionController {
        PositionController::new(
            "TEST",
            InstrumentSpec {
                price_step: 1.0,
                volume_step: 1.0,
                min_volume: 1.0,
            },
        )
    }

    fn fill_for(intent: &OrderIntent, price: f64) -> Fill {
        Fill {
            order_id: intent.id.clone(),
            instrument: intent.instrument.clone(),
            side: intent.side,
            price,
            volume: intent.volume,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn flat_enter_long_issues_buy() {
        let mut c = controller();
        let intent = c.decide(SignalDecision::EnterLong, 1.0).unwrap();
        assert_eq!(intent.side, OrderSide::Buy);
        assert_eq!(intent.volume, 1.0);
        assert_eq!(intent.reason, IntentReason::Entry);
        assert!(c.is_pending());
    }

    #[test]
    fn pending_order_blocks_duplicate_entries() {
        let mut c = controller();
        c.decide(SignalDecision::EnterLong, 1.0).unwrap();
        assert!(c.decide(SignalDecision::Hold, 1.0).is_none());
        assert!(c.decide(SignalDecision::EnterLong, 1.0).is_none());
    }

    #[test]
    fn decision_seen_while_pending_is_acted_on_after_fill() {
        let mut c = controller();
        let entry = c.decide(SignalDecision::EnterLong, 1.0).unwrap();
        assert!(c.decide(SignalDecision::EnterShort, 1.0).is_none());
        assert!(c.decide(SignalDecision::EnterShort, 1.0).is_none());
        assert_eq!(c.last_decision(), SignalDecision::EnterLong);

        c.on_fill(&fill_for(&entry, 100.0));
        let flip = c.decide(SignalDecision::EnterShort, 1.0).unwrap();
        assert_eq!(flip.side, OrderSide::Sell);
        assert_eq!(flip.volume, 2.0);
        assert_eq!(flip.reason, IntentReason::Reversal);
    }

    #[test]
    fn repeated_decision_is_edge_triggered() {
        let mut c = controller();
        let intent = c.decide(SignalDecision::EnterLong, 1.0).unwrap();
        c.on_fill(&fill_for(&intent, 100.0));
        let exit = c.decide(SignalDecision::ExitLong, 1.0).unwrap();
        c.on_fill(&fill_for(&exit, 101.0));
        assert!(c.position().is_flat());

        // Same decision on the next bar does not re-enter.
        assert!(c.decide(SignalDecision::ExitLong, 1.0).is_none());
        assert!(c.decide(SignalDecision::EnterLong, 1.0).is_some());
    }

    #[test]
    fn hold_never_mutates() {
        let mut c = controller();
        for _ in 0..10 {
            assert!(c.decide(SignalDecision::Hold, 1.0).is_none());
        }
        assert!(c.position().is_flat());
        assert!(!c.is_pending());
    }

    #[test]
    fn reversal_is_one_order() {
        let mut c = controller();
        let entry = c.decide(SignalDecision::EnterShort, 2.0).unwrap();
        c.on_fill(&fill_for(&entry, 100.0));

        let flip = c.decide(SignalDecision::EnterLong, 1.0).unwrap();
        assert_eq!(flip.side, OrderSide::Buy);
        assert_eq!(flip.volume, 3.0);
        assert_eq!(flip.reason, IntentReason::Reversal);

        c.on_fill(&fill_for(&flip, 95.0));
        assert_eq!(c.position().side, PositionSide::Long);
        assert_eq!(c.position().volume, 1.0);
    }

    #[test]
    fn zero_volume_entry_is_dropped() {
        let mut c = controller();
        assert!(c.decide(SignalDecision::EnterShort, 0.4).is_none());
        assert_eq!(c.dropped_intents(), 1);
        assert!(c.position().is_flat());
        assert!(!c.is_pending());
    }

    #[test]
    fn rejection_clears_pending_and_allows_retry() {
        let mut c = controller();
        let intent = c.decide(SignalDecision::EnterLong, 1.0).unwrap();
        assert!(!c.on_rejected("other"));
        assert!(c.on_rejected(&intent.id));
        assert!(!c.is_pending());
        assert!(c.decide(SignalDecision::EnterLong, 1.0).is_some());
    }

    #[test]
    fn force_exit_closes_full_volume() {
        let mut c = controller();
        assert!(c.force_exit(IntentReason::StopLoss).is_none());
        let entry = c.decide(SignalDecision::EnterLong, 3.0).unwrap();
        c.on_fill(&fill_for(&entry, 10.0));
        let exit = c.force_exit(IntentReason::StopLoss).unwrap();
        assert_eq!(exit.side, OrderSide::Sell);
        assert_eq!(exit.volume, 3.0);
        assert_eq!(exit.reason, IntentReason::StopLoss);
    }

    #[test]
    fn grid_layer_adds_in_position_direction() {
        let mut c = controller();
        let entry = c.decide(SignalDecision::EnterShort, 1.0).unwrap();
        c.on_fill(&fill_for(&entry, 10.0));
        let layer = c.add_layer(2.0).unwrap();
        assert_eq!(layer.side, OrderSide::Sell);
        assert_eq!(layer.reason, IntentReason::GridLayer);
        c.on_fill(&fill_for(&layer, 13.0));
        assert_eq!(c.position().volume, 3.0);
        assert_eq!(c.position().average_entry_price, 12.0);
    }
}
