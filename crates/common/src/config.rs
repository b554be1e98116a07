use crate::{Error, Result};

/// Process-level configuration loaded from environment variables at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Path of the TOML strategy file.
    pub strategy_config_path: String,
    /// JSON-lines file of bars to replay.
    pub bar_file: String,
    /// Slippage applied by the paper gateway to market and stop fills.
    pub paper_slippage_bps: f64,
    /// Bars a market order waits before the paper gateway fills it.
    pub paper_latency_bars: u32,
}

impl AppConfig {
    /// Load configuration from the environment, reading `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Separated from `from_env` so the
    /// parsing rules can be tested without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bar_file = lookup("BAR_FILE").ok_or_else(|| {
            Error::Config(
                "Required environment variable 'BAR_FILE' is not set. Check your .env file."
                    .to_string(),
            )
        })?;

        let paper_slippage_bps = parse_optional(&lookup, "PAPER_SLIPPAGE_BPS", 0.0)?;
        if paper_slippage_bps < 0.0 {
            return Err(Error::Config(format!(
                "PAPER_SLIPPAGE_BPS must be >= 0, got {paper_slippage_bps}"
            )));
        }

        Ok(AppConfig {
            strategy_config_path: lookup("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
            bar_file,
            paper_slippage_bps,
            paper_latency_bars: parse_optional(&lookup, "PAPER_LATENCY_BARS", 0)?,
        })
    }
}

fn parse_optional<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} is not a valid number: '{raw}'"))),
    }
}
