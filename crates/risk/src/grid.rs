use serde::{Deserialize, Serialize};

use common::{Bar, InstrumentSpec, PositionSide};

/// Same-direction averaging layers added while a position runs against us.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Additional layers allowed on top of the initial entry. Zero disables.
    pub max_layers: u32,
    /// Adverse move, in price points, between consecutive layers.
    pub spacing_points: f64,
    /// Volume factor applied per layer relative to the entry volume.
    pub layer_multiplier: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_layers: 0,
            spacing_points: 0.0,
            layer_multiplier: 1.0,
        }
    }
}

impl GridConfig {
    pub fn is_enabled(&self) -> bool {
        self.max_layers > 0 && self.spacing_points > 0.0
    }
}

/// Per-position grid bookkeeping.
#[derive(Debug, Clone)]
pub struct GridLayering {
    config: GridConfig,
    spacing: f64,
    layers: u32,
    last_price: Option<f64>,
    entry_volume: f64,
}

impl GridLayering {
    pub fn new(config: GridConfig, spec: &InstrumentSpec) -> Self {
        let spacing = config.spacing_points * spec.effective_price_step();
        Self {
            config,
            spacing,
            layers: 0,
            last_price: None,
            entry_volume: 0.0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    /// Start a new grid from an opening fill.
    pub fn on_open(&mut self, price: f64, volume: f64) {
        self.layers = 0;
        self.last_price = Some(price);
        self.entry_volume = volume;
    }

    pub fn on_layer_filled(&mut self, price: f64) {
        self.layers += 1;
        self.last_price = Some(price);
    }

    pub fn clear(&mut self) {
        self.layers = 0;
        self.last_price = None;
        self.entry_volume = 0.0;
    }

    /// Unrounded volume of the next layer if this bar's close has moved a
    /// full spacing against the last layer.
    pub fn next_layer(&self, side: PositionSide, bar: &Bar) -> Option<f64> {
        if !self.is_enabled() || self.layers >= self.config.max_layers {
            return None;
        }
        let last = self.last_price?;
        let triggered = match side {
            PositionSide::Long => bar.close <= last - self.spacing,
            PositionSide::Short => bar.close >= last + self.spacing,
            PositionSide::Flat => false,
        };
        triggered.then(|| {
            self.entry_volume * self.config.layer_multiplier.powi(self.layers as i32 + 1)
        })
    }
}
