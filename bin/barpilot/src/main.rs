use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{AppConfig, Bar};
use engine::{replay_ring, Replay};
use strategy::{StrategyFileConfig, StrategyRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = AppConfig::from_env().context("Invalid environment configuration")?;
    info!(
        strategies = %cfg.strategy_config_path,
        bars = %cfg.bar_file,
        slippage_bps = cfg.paper_slippage_bps,
        latency_bars = cfg.paper_latency_bars,
        "Barpilot starting"
    );

    let strategy_file = StrategyFileConfig::load(&cfg.strategy_config_path)?;
    let registry = StrategyRegistry::from_config(&strategy_file)?;
    if registry.definitions().is_empty() && registry.rings().is_empty() {
        warn!("No strategies or rings configured; nothing to replay");
        return Ok(());
    }

    // ── Bars ──────────────────────────────────────────────────────────────────
    let bars = load_bars(&cfg.bar_file)?;
    let mut by_instrument: HashMap<&str, Vec<Bar>> = HashMap::new();
    for bar in &bars {
        by_instrument
            .entry(bar.instrument.as_str())
            .or_default()
            .push(bar.clone());
    }
    for series in by_instrument.values_mut() {
        series.sort_by_key(|b| b.open_time);
    }
    info!(bars = bars.len(), instruments = by_instrument.len(), "Bars loaded");

    // ── Strategies ────────────────────────────────────────────────────────────
    for definition in registry.definitions() {
        let Some(series) = by_instrument.get(definition.instrument.as_str()) else {
            warn!(strategy = %definition.name, instrument = %definition.instrument, "No bars for instrument; skipped");
            continue;
        };
        let summary = Replay::new(
            definition.clone(),
            cfg.paper_slippage_bps,
            cfg.paper_latency_bars,
        )
        .run(series)
        .await
        .with_context(|| format!("Replay of '{}' failed", definition.name))?;

        info!(
            strategy = %summary.strategy,
            fills = summary.stats.fills,
            dropped = summary.stats.dropped_intents,
            rejections = summary.stats.rejections,
            realized_pnl = summary.stats.realized_pnl,
            unrealized_pnl = summary.portfolio.unrealized_pnl,
            position = %summary.position.side,
            "Strategy summary"
        );
        println!("{}", serde_json::to_string(&summary)?);
    }

    // ── Rings ─────────────────────────────────────────────────────────────────
    for ring in registry.rings() {
        let summary = replay_ring(
            ring.clone(),
            &bars,
            cfg.paper_slippage_bps,
            cfg.paper_latency_bars,
        )
        .await;
        println!("{}", serde_json::to_string(&summary)?);
    }

    info!("Barpilot finished");
    Ok(())
}

/// One JSON-encoded bar per line; blank lines are skipped.
fn load_bars(path: &str) -> Result<Vec<Bar>> {
    let file = File::open(path).with_context(|| format!("Failed to open bar file '{path}'"))?;
    let mut bars = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let bar: Bar = serde_json::from_str(&line)
            .with_context(|| format!("{path}:{}: malformed bar", index + 1))?;
        bars.push(bar);
    }
    Ok(bars)
}
