//! Merge Cache and Backoff Property Tests
//!
//! Randomized checks of the invariants the rest of the client leans on:
//! the sequence baseline never regresses, a FULL snapshot is always
//! authoritative, and the backoff schedule is monotone and capped.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;

use session_stream_client::infrastructure::connection::BackoffPolicy;
use session_stream_client::{
    EquityRecord, ExchangeCache, MarketUpdate, OrderRecord, OrderSide, OrderStatus,
    RecoverySettings, UpdateKind,
};

fn equity(symbol: &str, price: u32) -> EquityRecord {
    EquityRecord {
        symbol: symbol.to_string(),
        last_price: Decimal::from(price),
        bid: Decimal::from(price),
        ask: Decimal::from(price),
        volume: 0,
    }
}

fn order(id: u8, status: OrderStatus) -> OrderRecord {
    OrderRecord {
        order_id: format!("ord-{id}"),
        symbol: "ACME".to_string(),
        side: OrderSide::Buy,
        status,
        quantity: Decimal::from(10),
        filled_quantity: Decimal::ZERO,
        limit_price: None,
    }
}

fn update(kind: UpdateKind, sequence: u64, orders: Vec<OrderRecord>) -> MarketUpdate {
    MarketUpdate {
        delta_type: kind,
        sequence,
        timestamp: Utc::now(),
        equities: vec![equity("ACME", u32::try_from(sequence % 1_000).unwrap())],
        orders,
        portfolio: None,
    }
}

fn arb_status() -> impl Strategy<Value = OrderStatus> {
    prop_oneof![
        Just(OrderStatus::New),
        Just(OrderStatus::PartiallyFilled),
        Just(OrderStatus::Filled),
        Just(OrderStatus::Cancelled),
        Just(OrderStatus::Rejected),
    ]
}

fn arb_delta() -> impl Strategy<Value = MarketUpdate> {
    (1_u64..200, proptest::collection::vec((0_u8..8, arb_status()), 0..4)).prop_map(
        |(sequence, orders)| {
            let orders = orders
                .into_iter()
                .map(|(id, status)| order(id, status))
                .collect();
            update(UpdateKind::Delta, sequence, orders)
        },
    )
}

proptest! {
    /// The sequence baseline never moves backward, no matter how deltas
    /// are duplicated or reordered on the wire.
    #[test]
    fn baseline_never_regresses(deltas in proptest::collection::vec(arb_delta(), 1..40)) {
        let mut cache = ExchangeCache::new();
        cache.apply(&update(UpdateKind::Full, 0, Vec::new())).unwrap();

        let mut baseline = 0;
        for delta in &deltas {
            let before = cache.last_applied_sequence();
            let result = cache.apply(delta);
            prop_assert_eq!(result.is_ok(), delta.sequence > before);
            prop_assert!(cache.last_applied_sequence() >= baseline);
            baseline = cache.last_applied_sequence();
        }
    }

    /// A rejected delta leaves the cache byte-for-byte unchanged.
    #[test]
    fn stale_delta_is_a_complete_no_op(
        applied in arb_delta(),
        stale_orders in proptest::collection::vec((0_u8..8, arb_status()), 0..4),
    ) {
        let mut cache = ExchangeCache::new();
        cache.apply(&update(UpdateKind::Full, 0, Vec::new())).unwrap();
        cache.apply(&applied).unwrap();

        let equities_before = cache.equities_sorted();
        let orders_before = cache.orders_sorted();

        let stale = update(
            UpdateKind::Delta,
            applied.sequence,
            stale_orders.into_iter().map(|(id, s)| order(id, s)).collect(),
        );
        prop_assert!(cache.apply(&stale).is_err());

        prop_assert_eq!(cache.equities_sorted(), equities_before);
        prop_assert_eq!(cache.orders_sorted(), orders_before);
        prop_assert_eq!(cache.last_applied_sequence(), applied.sequence);
    }

    /// A FULL snapshot is authoritative regardless of its sequence
    /// relative to the cache: the result is exactly the snapshot.
    #[test]
    fn full_snapshot_is_authoritative(
        history in proptest::collection::vec(arb_delta(), 0..20),
        snapshot_sequence in 0_u64..500,
    ) {
        let mut cache = ExchangeCache::new();
        for delta in &history {
            let _ = cache.apply(delta);
        }

        let snapshot = update(
            UpdateKind::Full,
            snapshot_sequence,
            vec![order(1, OrderStatus::New)],
        );
        cache.apply(&snapshot).unwrap();

        prop_assert_eq!(cache.last_applied_sequence(), snapshot_sequence);
        prop_assert_eq!(cache.equity_count(), 1);
        prop_assert_eq!(cache.order_count(), 1);
        prop_assert!(cache.order("ord-1").is_some());
    }

    /// Delays never shrink and never exceed the configured ceiling.
    #[test]
    fn backoff_is_monotone_and_capped(
        initial_ms in 10_u64..2_000,
        max_ms in 2_000_u64..60_000,
        attempts in 1_usize..30,
    ) {
        let mut policy = BackoffPolicy::new(RecoverySettings {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: u32::MAX,
        });

        let mut previous = Duration::ZERO;
        for _ in 0..attempts {
            let delay = policy.next_delay();
            prop_assert!(delay >= previous);
            prop_assert!(delay <= Duration::from_millis(max_ms));
            previous = delay;
        }
    }
}
