pub mod config;
pub mod grid;
pub mod protective;
pub mod sizing;

pub use config::RiskConfig;
pub use grid::{GridConfig, GridLayering};
pub use protective::{
    ProtectionConfig, ProtectionMode, ProtectiveExit, ProtectiveLevels, ProtectiveMonitor,
};
pub use sizing::{round_volume, SizingPolicy, VolumeSizer};
