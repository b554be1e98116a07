pub mod config;
pub mod error;
pub mod gateway;
pub mod types;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use gateway::{OrderGateway, PortfolioPosition};
pub use types::*;
