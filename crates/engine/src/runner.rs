use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::{
    Bar, EngineCommand, EngineState, Error, IntentReason, OrderGateway, OrderIntent, OrderUpdate,
    PositionSide, PositionState, Result, SignalDecision, Transition,
};
use risk::{GridLayering, ProtectionMode, ProtectiveLevels, ProtectiveMonitor, VolumeSizer};
use strategy::{History, IndicatorSet, Readings, SignalEvaluator, StrategyDefinition};

use crate::controller::PositionController;

/// Counters for one session. Cleared by `reset`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunnerStats {
    pub bars: u64,
    pub intents: u64,
    pub fills: u64,
    pub dropped_intents: u64,
    pub rejections: u64,
    pub realized_pnl: f64,
}

/// Ids of the protective orders resting at the venue. Both legs share an
/// OCO group so the venue never fills more than one of them.
#[derive(Debug, Default)]
struct RestingOrders {
    stop: Option<String>,
    take: Option<String>,
    group: String,
    placed: u64,
}

impl RestingOrders {
    /// Start a new OCO group for a fresh stop/take pair.
    fn next_group(&mut self, strategy: &str) -> String {
        self.placed += 1;
        self.group = format!("{strategy}#{}", self.placed);
        self.group.clone()
    }

    /// Forget `order_id` if it is one of ours, returning what it protected.
    fn release(&mut self, order_id: &str) -> Option<IntentReason> {
        if self.stop.as_deref() == Some(order_id) {
            self.stop = None;
            Some(IntentReason::StopLoss)
        } else if self.take.as_deref() == Some(order_id) {
            self.take = None;
            Some(IntentReason::TakeProfit)
        } else {
            None
        }
    }

    fn drain(&mut self) -> impl Iterator<Item = String> {
        [self.stop.take(), self.take.take()].into_iter().flatten()
    }
}

/// Per-run state, built fresh by `StrategyRunner::start`.
struct Session {
    name: String,
    instrument: String,
    evaluator: Arc<dyn SignalEvaluator>,
    indicators: IndicatorSet,
    history: History,
    controller: PositionController,
    monitor: ProtectiveMonitor,
    grid: GridLayering,
    sizer: VolumeSizer,
    resting: RestingOrders,
    cycle_pnl: f64,
    stats: RunnerStats,
}

impl Session {
    fn new(definition: &StrategyDefinition) -> Self {
        let evaluator = definition.evaluator.clone();
        let risk = &definition.risk;
        Self {
            name: definition.name.clone(),
            instrument: definition.instrument.clone(),
            indicators: evaluator.build_indicators(),
            history: History::new(evaluator.lookback()),
            evaluator,
            controller: PositionController::new(definition.instrument.clone(), definition.spec),
            monitor: ProtectiveMonitor::new(risk.protection.clone(), &definition.spec),
            grid: GridLayering::new(risk.grid.clone(), &definition.spec),
            sizer: VolumeSizer::new(definition.volume, risk.sizing.clone()),
            resting: RestingOrders::default(),
            cycle_pnl: 0.0,
            stats: RunnerStats::default(),
        }
    }

    fn resting_mode(&self) -> bool {
        self.monitor.mode() == ProtectionMode::Resting
    }

    /// The per-bar pipeline. Yields at most one intent.
    async fn process_bar(
        &mut self,
        bar: &Bar,
        paused: bool,
        gateway: &dyn OrderGateway,
    ) -> Option<OrderIntent> {
        self.stats.bars += 1;
        let readings = self.indicators.process(bar);

        let mut intent = None;
        let breach = if self.resting_mode() {
            None
        } else {
            self.monitor.check(bar)
        };

        match breach {
            Some(exit) => intent = self.controller.force_exit(exit.reason),
            None => {
                if let Some(stop) = self.monitor.trail(bar) {
                    if self.resting_mode() {
                        self.replace_resting_stop(stop, gateway).await;
                    }
                }
                if !paused {
                    let decision = self.evaluate(bar, &readings);
                    intent = self.controller.decide(decision, self.sizer.next_volume());
                    if intent.is_none() {
                        intent = self.grid_layer(bar);
                    }
                }
            }
        }
        self.stats.dropped_intents = self.controller.dropped_intents();

        let submitted = match intent {
            Some(intent) => self.submit(intent, gateway).await,
            None => None,
        };
        self.history.push(readings);
        submitted
    }

    fn evaluate(&self, bar: &Bar, readings: &Readings) -> SignalDecision {
        match self.evaluator.evaluate(bar, readings, &self.history) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(strategy = %self.name, error = %e, "Evaluation failed; holding");
                SignalDecision::Hold
            }
        }
    }

    fn grid_layer(&mut self, bar: &Bar) -> Option<OrderIntent> {
        let side = self.controller.position().side;
        if side == PositionSide::Flat {
            return None;
        }
        let volume = self.grid.next_layer(side, bar)?;
        self.controller.add_layer(volume)
    }

    async fn submit(&mut self, intent: OrderIntent, gateway: &dyn OrderGateway) -> Option<OrderIntent> {
        if self.resting_mode() && matches!(intent.reason, IntentReason::Exit | IntentReason::Reversal) {
            self.cancel_resting(gateway).await;
        }

        match gateway.submit(&intent).await {
            Ok(handle) => {
                self.stats.intents += 1;
                debug!(strategy = %self.name, order_id = %handle.order_id, "Order acknowledged");
                Some(intent)
            }
            Err(e) => {
                warn!(strategy = %self.name, reason = %intent.reason, error = %e, "Order rejected by gateway");
                if self.controller.on_rejected(&intent.id) {
                    self.stats.rejections += 1;
                }
                None
            }
        }
    }

    async fn on_update(&mut self, update: OrderUpdate, gateway: &dyn OrderGateway) {
        match update {
            OrderUpdate::Filled(fill) => {
                if fill.instrument != self.instrument {
                    return;
                }
                self.stats.fills += 1;

                let layer_fill = self
                    .controller
                    .pending()
                    .is_some_and(|p| p.order_id == fill.order_id && p.reason == IntentReason::GridLayer);
                if let Some(reason) = self.resting.release(&fill.order_id) {
                    info!(strategy = %self.name, reason = %reason, price = fill.price, "Resting protective order filled");
                }

                let effect = self.controller.on_fill(&fill);
                self.cycle_pnl += effect.realized_pnl;
                self.stats.realized_pnl += effect.realized_pnl;

                let position = self.controller.position().clone();
                match effect.transition {
                    Transition::Opened => self.open_cycle(&position),
                    Transition::Flipped => {
                        self.close_cycle();
                        self.open_cycle(&position);
                    }
                    Transition::Increased => {
                        if layer_fill {
                            self.grid.on_layer_filled(fill.price);
                        }
                        self.monitor.arm(position.side, position.average_entry_price);
                    }
                    Transition::Reduced => {}
                    Transition::Closed => self.close_cycle(),
                }

                if self.resting_mode() {
                    self.cancel_resting(gateway).await;
                    self.place_resting(gateway).await;
                }
            }
            OrderUpdate::Rejected { order_id, reason, .. } => {
                if self.controller.on_rejected(&order_id) {
                    self.stats.rejections += 1;
                    warn!(strategy = %self.name, order_id = %order_id, reason = %reason, "Order rejected");
                } else if let Some(leg) = self.resting.release(&order_id) {
                    warn!(strategy = %self.name, leg = %leg, reason = %reason, "Resting protective order rejected");
                }
            }
            OrderUpdate::Cancelled { order_id } => {
                if self.controller.on_cancelled(&order_id) {
                    info!(strategy = %self.name, order_id = %order_id, "Pending order cancelled");
                }
                self.resting.release(&order_id);
            }
        }
    }

    fn open_cycle(&mut self, position: &PositionState) {
        self.monitor.arm(position.side, position.average_entry_price);
        self.grid.on_open(position.average_entry_price, position.volume);
    }

    /// A cycle ends whenever the position leaves a side.
    fn close_cycle(&mut self) {
        self.sizer.record_cycle(self.cycle_pnl);
        info!(
            strategy = %self.name,
            pnl = self.cycle_pnl,
            next_volume = self.sizer.next_volume(),
            "Position cycle closed"
        );
        self.cycle_pnl = 0.0;
        self.monitor.clear();
        self.grid.clear();
    }

    async fn cancel_resting(&mut self, gateway: &dyn OrderGateway) {
        for order_id in self.resting.drain().collect::<Vec<_>>() {
            if let Err(e) = gateway.cancel(&order_id).await {
                warn!(strategy = %self.name, order_id = %order_id, error = %e, "Failed to cancel protective order");
            }
        }
    }

    /// Place stop and take-profit orders for the open position.
    async fn place_resting(&mut self, gateway: &dyn OrderGateway) {
        let Some(levels) = self.monitor.levels().copied() else {
            return;
        };
        let group = self.resting.next_group(&self.name);
        if let Some(stop) = levels.stop_price {
            self.resting.stop = Self::rest(&self.name, self.stop_intent(stop, &levels), gateway).await;
        }
        if let Some(take) = levels.take_profit_price {
            let position = self.controller.position();
            let intent = position.side.closing_side().map(|side| {
                OrderIntent::limit(self.instrument.clone(), side, position.volume, take, IntentReason::TakeProfit)
                    .in_oco_group(group)
            });
            self.resting.take = Self::rest(&self.name, intent, gateway).await;
        }
    }

    async fn replace_resting_stop(&mut self, stop: f64, gateway: &dyn OrderGateway) {
        if let Some(old) = self.resting.stop.take() {
            if let Err(e) = gateway.cancel(&old).await {
                warn!(strategy = %self.name, order_id = %old, error = %e, "Failed to cancel trailed stop");
            }
        }
        let Some(levels) = self.monitor.levels().copied() else {
            return;
        };
        self.resting.stop = Self::rest(&self.name, self.stop_intent(stop, &levels), gateway).await;
    }

    fn stop_intent(&self, stop: f64, levels: &ProtectiveLevels) -> Option<OrderIntent> {
        let position = self.controller.position();
        let reason = if levels.trailing_anchor.is_some() {
            IntentReason::TrailingStop
        } else {
            IntentReason::StopLoss
        };
        position.side.closing_side().map(|side| {
            OrderIntent::stop(self.instrument.clone(), side, position.volume, stop, reason)
                .in_oco_group(self.resting.group.clone())
        })
    }

    async fn rest(name: &str, intent: Option<OrderIntent>, gateway: &dyn OrderGateway) -> Option<String> {
        let intent = intent?;
        match gateway.submit(&intent).await {
            Ok(handle) => {
                debug!(strategy = %name, reason = %intent.reason, price = ?intent.price, "Protective order resting");
                Some(handle.order_id)
            }
            Err(e) => {
                warn!(strategy = %name, reason = %intent.reason, error = %e, "Failed to place protective order");
                None
            }
        }
    }
}

/// Drives one strategy definition against an order gateway.
///
/// `start` builds a fresh session (indicators, history, controller,
/// protection, sizing); `reset` tears it down. Bars for other instruments
/// and non-final bars are ignored.
pub struct StrategyRunner {
    definition: StrategyDefinition,
    gateway: Arc<dyn OrderGateway>,
    state: EngineState,
    session: Option<Session>,
}

impl StrategyRunner {
    pub fn new(definition: StrategyDefinition, gateway: Arc<dyn OrderGateway>) -> Self {
        Self {
            definition,
            gateway,
            state: EngineState::Stopped,
            session: None,
        }
    }

    pub fn definition(&self) -> &StrategyDefinition {
        &self.definition
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Begin processing. Builds a new session unless one survives a `stop`.
    pub fn start(&mut self) {
        if self.state == EngineState::Running {
            info!(strategy = %self.definition.name, "Runner already running");
            return;
        }
        if self.session.is_none() {
            self.session = Some(Session::new(&self.definition));
        }
        self.state = EngineState::Running;
        info!(strategy = %self.definition.name, instrument = %self.definition.instrument, "Runner started");
    }

    /// Stop taking bars. The session and its position are kept.
    pub fn stop(&mut self) {
        self.state = EngineState::Stopped;
        info!(strategy = %self.definition.name, "Runner stopped");
    }

    /// Keep indicators and protection current but issue no new entries.
    pub fn pause(&mut self) {
        if self.state == EngineState::Running {
            info!(strategy = %self.definition.name, "Runner paused; entries suppressed");
            self.state = EngineState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == EngineState::Paused {
            info!(strategy = %self.definition.name, "Runner resumed");
            self.state = EngineState::Running;
        }
    }

    /// Drop all per-run state. The next `start` begins from scratch.
    pub fn reset(&mut self) {
        self.session = None;
        self.state = EngineState::Stopped;
        info!(strategy = %self.definition.name, "Runner reset");
    }

    pub fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Start => self.start(),
            EngineCommand::Stop => self.stop(),
            EngineCommand::Pause => self.pause(),
            EngineCommand::Resume => self.resume(),
            EngineCommand::Reset => self.reset(),
        }
    }

    pub fn stats(&self) -> RunnerStats {
        self.session
            .as_ref()
            .map(|s| s.stats.clone())
            .unwrap_or_default()
    }

    pub fn position(&self) -> PositionState {
        self.session
            .as_ref()
            .map(|s| s.controller.position().clone())
            .unwrap_or_default()
    }

    pub fn protective_levels(&self) -> Option<ProtectiveLevels> {
        self.session.as_ref()?.monitor.levels().copied()
    }

    /// Volume the next entry would request before rounding.
    pub fn next_volume(&self) -> Option<f64> {
        self.session.as_ref().map(|s| s.sizer.next_volume())
    }

    pub fn is_pending(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.controller.is_pending())
    }

    /// Process one closed bar. Returns the intent submitted for it, if any.
    pub async fn on_bar(&mut self, bar: &Bar) -> Result<Option<OrderIntent>> {
        let paused = match self.state {
            EngineState::Stopped => {
                return Err(Error::Other(format!(
                    "strategy '{}' is not running",
                    self.definition.name
                )))
            }
            EngineState::Paused => true,
            EngineState::Running => false,
        };
        let session = self.session.as_mut().ok_or_else(|| {
            Error::Other(format!("strategy '{}' has not been started", self.definition.name))
        })?;

        if !bar.is_final || bar.instrument != self.definition.instrument {
            return Ok(None);
        }
        Ok(session.process_bar(bar, paused, self.gateway.as_ref()).await)
    }

    /// Apply a fill, rejection or cancellation reported by the gateway.
    pub async fn on_update(&mut self, update: OrderUpdate) -> Result<()> {
        let session = self.session.as_mut().ok_or_else(|| {
            Error::Other(format!("strategy '{}' has not been started", self.definition.name))
        })?;
        session.on_update(update, self.gateway.as_ref()).await;
        Ok(())
    }

    /// Event loop: commands first, then order updates, then bars, so every
    /// update that is already waiting is applied before the next bar.
    /// Returns when the bar stream ends.
    pub async fn run(
        mut self,
        mut bar_rx: mpsc::Receiver<Bar>,
        mut update_rx: mpsc::UnboundedReceiver<OrderUpdate>,
        mut command_rx: mpsc::Receiver<EngineCommand>,
    ) -> RunnerStats {
        info!(strategy = %self.definition.name, "StrategyRunner waiting for Start command");
        loop {
            tokio::select! {
                biased;

                Some(command) = command_rx.recv() => self.handle_command(command),

                Some(update) = update_rx.recv() => {
                    if let Err(e) = self.on_update(update).await {
                        debug!(error = %e, "Order update ignored");
                    }
                }

                bar = bar_rx.recv() => match bar {
                    Some(bar) if self.state != EngineState::Stopped => {
                        if let Err(e) = self.on_bar(&bar).await {
                            warn!(strategy = %self.definition.name, error = %e, "Bar processing failed");
                        }
                    }
                    Some(_) => debug!("Bar ignored while stopped"),
                    None => {
                        info!(strategy = %self.definition.name, "Bar stream closed; runner exiting");
                        break;
                    }
                },
            }
        }
        self.stats()
    }
}
