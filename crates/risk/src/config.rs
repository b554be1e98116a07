use serde::{Deserialize, Serialize};

use common::{Error, InstrumentSpec, Result};

use crate::{GridConfig, ProtectionConfig, SizingPolicy};

/// Risk parameters of one strategy instance.
///
/// Example `[strategy.risk]` section:
/// ```toml
/// [strategy.risk.protection]
/// stop_loss_points = 100
/// take_profit_points = 200
/// trailing_stop_points = 50
/// trailing_step_points = 10
///
/// [strategy.risk.sizing]
/// policy = "martingale"
/// multiplier = 2.0
/// max_steps = 4
///
/// [strategy.risk.grid]
/// max_layers = 3
/// spacing_points = 40
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RiskConfig {
    pub protection: ProtectionConfig,
    pub sizing: SizingPolicy,
    pub grid: GridConfig,
}

impl RiskConfig {
    /// Reject contradictory or out-of-range parameters before a run starts.
    pub fn validate(&self, spec: &InstrumentSpec) -> Result<()> {
        let p = &self.protection;
        for (name, value) in [
            ("stop_loss_points", p.stop_loss_points),
            ("take_profit_points", p.take_profit_points),
            ("trailing_stop_points", p.trailing_stop_points),
            ("trailing_step_points", p.trailing_step_points),
            ("grid.spacing_points", self.grid.spacing_points),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::invalid_parameter(name, format!("must be >= 0, got {value}")));
            }
        }

        if p.trailing_stop_points > 0.0 && p.trailing_step_points <= 0.0 {
            return Err(Error::invalid_parameter(
                "trailing_step_points",
                "trailing stop requires a positive trailing step",
            ));
        }

        if let Some(multiplier) = self.sizing.multiplier() {
            if !multiplier.is_finite() || multiplier <= 0.0 {
                return Err(Error::invalid_parameter(
                    "sizing.multiplier",
                    format!("must be > 0, got {multiplier}"),
                ));
            }
        }

        if spec.volume_step < 0.0 || spec.min_volume < 0.0 {
            return Err(Error::invalid_parameter(
                "instrument_spec",
                "volume_step and min_volume must be >= 0",
            ));
        }

        self.validate_grid()
    }

    fn validate_grid(&self) -> Result<()> {
        let grid = &self.grid;
        if grid.spacing_points <= 0.0 {
            return Ok(());
        }
        if grid.max_layers == 0 {
            return Err(Error::invalid_parameter(
                "grid.max_layers",
                "grid spacing is set but no layers are allowed",
            ));
        }
        if !grid.layer_multiplier.is_finite() || grid.layer_multiplier <= 0.0 {
            return Err(Error::invalid_parameter(
                "grid.layer_multiplier",
                format!("must be > 0, got {}", grid.layer_multiplier),
            ));
        }

        // A layer farther away than every protective exit can never be reached.
        let legs: Vec<f64> = [
            self.protection.stop_loss_points,
            self.protection.take_profit_points,
        ]
        .into_iter()
        .filter(|d| *d > 0.0)
        .collect();
        if !legs.is_empty() && legs.iter().all(|d| grid.spacing_points > *d) {
            return Err(Error::invalid_parameter(
                "grid.spacing_points",
                format!(
                    "spacing {} exceeds both stop-loss and take-profit distances",
                    grid.spacing_points
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_protection(stop: f64, take: f64) -> RiskConfig {
        RiskConfig {
            protection: ProtectionConfig {
                stop_loss_points: stop,
                take_profit_points: take,
                ..ProtectionConfig::default()
            },
            ..RiskConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(RiskConfig::default()
            .validate(&InstrumentSpec::default())
            .is_ok());
    }

    #[test]
    fn negative_distance_is_rejected() {
        let cfg = with_protection(-1.0, 0.0);
        let err = cfg.validate(&InstrumentSpec::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref name, .. } if name == "stop_loss_points"));
    }

    #[test]
    fn trailing_without_step_is_rejected() {
        let mut cfg = with_protection(10.0, 0.0);
        cfg.protection.trailing_stop_points = 5.0;
        assert!(cfg.validate(&InstrumentSpec::default()).is_err());
        cfg.protection.trailing_step_points = 1.0;
        assert!(cfg.validate(&InstrumentSpec::default()).is_ok());
    }

    #[test]
    fn grid_spacing_beyond_stop_and_take_is_rejected() {
        let mut cfg = with_protection(30.0, 50.0);
        cfg.grid = GridConfig {
            max_layers: 3,
            spacing_points: 60.0,
            layer_multiplier: 1.0,
        };
        let err = cfg.validate(&InstrumentSpec::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref name, .. } if name == "grid.spacing_points"));

        cfg.grid.spacing_points = 40.0;
        assert!(cfg.validate(&InstrumentSpec::default()).is_ok());
    }

    #[test]
    fn grid_without_layers_is_rejected() {
        let mut cfg = RiskConfig::default();
        cfg.grid.spacing_points = 10.0;
        assert!(cfg.validate(&InstrumentSpec::default()).is_err());
    }

    #[test]
    fn martingale_with_zero_multiplier_is_rejected() {
        let cfg = RiskConfig {
            sizing: SizingPolicy::Martingale {
                multiplier: 0.0,
                max_steps: 3,
            },
            ..RiskConfig::default()
        };
        assert!(cfg.validate(&InstrumentSpec::default()).is_err());
    }

    #[test]
    fn parses_from_toml() {
        let cfg: RiskConfig = toml::from_str(
            r#"
            [protection]
            stop_loss_points = 100
            take_profit_points = 200.0
            mode = "resting"

            [sizing]
            policy = "anti_martingale"
            multiplier = 1.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.protection.stop_loss_points, 100.0);
        assert_eq!(cfg.protection.mode, crate::ProtectionMode::Resting);
        assert_eq!(cfg.sizing.multiplier(), Some(1.5));
        assert!(!cfg.grid.is_enabled());
    }
}
