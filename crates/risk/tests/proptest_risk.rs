use chrono::Utc;
use common::{Bar, InstrumentSpec, PositionSide};
use proptest::prelude::*;
use risk::{round_volume, ProtectionConfig, ProtectionMode, ProtectiveMonitor};

fn monitor() -> ProtectiveMonitor {
    ProtectiveMonitor::new(
        ProtectionConfig {
            stop_loss_points: 10.0,
            take_profit_points: 0.0,
            trailing_stop_points: 10.0,
            trailing_step_points: 2.0,
            mode: ProtectionMode::Synthetic,
        },
        &InstrumentSpec {
            price_step: 1.0,
            ..InstrumentSpec::default()
        },
    )
}

fn bar_at(close: f64, spread: f64) -> Bar {
    Bar::new(
        "TESTUSDT",
        Utc::now(),
        close,
        close + spread,
        close - spread,
        close,
        1.0,
    )
}

proptest! {
    /// A long position's stop never loosens, whatever the closes do.
    #[test]
    fn long_trailing_stop_is_non_decreasing(
        closes in prop::collection::vec(50.0f64..200.0, 1..60),
        spread in 0.0f64..5.0,
    ) {
        let mut m = monitor();
        m.arm(PositionSide::Long, 100.0);
        let mut last = m.levels().and_then(|l| l.stop_price).unwrap();
        for close in closes {
            m.trail(&bar_at(close, spread));
            let stop = m.levels().and_then(|l| l.stop_price).unwrap();
            prop_assert!(stop >= last, "stop loosened from {} to {}", last, stop);
            last = stop;
        }
    }

    /// Mirror image for shorts.
    #[test]
    fn short_trailing_stop_is_non_increasing(
        closes in prop::collection::vec(20.0f64..150.0, 1..60),
    ) {
        let mut m = monitor();
        m.arm(PositionSide::Short, 100.0);
        let mut last = m.levels().and_then(|l| l.stop_price).unwrap();
        for close in closes {
            m.trail(&bar_at(close, 1.0));
            let stop = m.levels().and_then(|l| l.stop_price).unwrap();
            prop_assert!(stop <= last);
            last = stop;
        }
    }

    /// Protective checks on arbitrary prices must never panic.
    #[test]
    fn checks_never_panic_on_extreme_prices(
        entry in 0.0001f64..1_000_000.0,
        low in 0.0001f64..1_000_000.0,
        high in 0.0001f64..1_000_000.0,
    ) {
        let mut m = monitor();
        m.arm(PositionSide::Long, entry);
        let bar = Bar::new("TESTUSDT", Utc::now(), low, high.max(low), low, high.max(low), 1.0);
        let _ = m.check(&bar);
        let _ = m.trail(&bar);
    }

    /// Rounded volume is either zero or a tradable amount not above the request.
    #[test]
    fn rounded_volume_is_tradable(volume in 0.0f64..100.0) {
        let spec = InstrumentSpec { price_step: 0.01, volume_step: 0.01, min_volume: 0.05 };
        let rounded = round_volume(volume, &spec);
        prop_assert!(rounded == 0.0 || (rounded >= 0.05 - 1e-12 && rounded <= volume + 1e-9));
    }
}
