pub mod controller;
pub mod replay;
pub mod ring;
pub mod runner;

pub use controller::{PendingOrder, PositionController};
pub use replay::{replay_ring, Replay, ReplaySummary, RingSummary};
pub use ring::{RingArbitrage, RingDirection, RingLeg, RingStats};
pub use runner::{RunnerStats, StrategyRunner};
