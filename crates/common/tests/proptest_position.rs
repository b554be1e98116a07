use chrono::Utc;
use proptest::prelude::*;

use common::{Fill, OrderSide, PositionSide, PositionState, VOLUME_EPSILON};

fn side() -> impl Strategy<Value = OrderSide> {
    prop_oneof![Just(OrderSide::Buy), Just(OrderSide::Sell)]
}

proptest! {
    /// Any fill sequence keeps volume == 0 exactly when flat, and the signed
    /// volume equals the running sum of signed fill volumes.
    #[test]
    fn position_tracks_net_volume(
        fills in prop::collection::vec((side(), 1u32..10, 1.0f64..1000.0), 1..40),
    ) {
        let mut position = PositionState::flat();
        let mut net = 0i64;

        for (i, (side, lots, price)) in fills.into_iter().enumerate() {
            let fill = Fill {
                order_id: format!("o{i}"),
                instrument: "TEST".into(),
                side,
                price,
                volume: lots as f64,
                timestamp: Utc::now(),
            };
            let effect = position.apply_fill(&fill);
            prop_assert!(effect.realized_pnl.is_finite());

            net += side.sign() as i64 * lots as i64;
            prop_assert!((position.signed_volume() - net as f64).abs() < VOLUME_EPSILON * 10.0);
            prop_assert_eq!(position.volume == 0.0, position.side == PositionSide::Flat);
            if !position.is_flat() {
                prop_assert!(position.average_entry_price > 0.0);
                prop_assert!(position.entry_time.is_some());
            }
        }
    }

    /// Opening and fully closing at the same price realises nothing.
    #[test]
    fn round_trip_at_same_price_is_flat_and_pnl_free(
        side in side(),
        volume in 0.001f64..100.0,
        price in 0.01f64..100_000.0,
    ) {
        let mut position = PositionState::flat();
        let mk = |side, order_id: &str| Fill {
            order_id: order_id.into(),
            instrument: "TEST".into(),
            side,
            price,
            volume,
            timestamp: Utc::now(),
        };
        position.apply_fill(&mk(side, "open"));
        let effect = position.apply_fill(&mk(side.opposite(), "close"));
        prop_assert!(position.is_flat());
        prop_assert!(effect.realized_pnl.abs() < 1e-9);
    }
}
