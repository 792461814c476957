//! Sequence-Validated Merge Cache
//!
//! Applies full and delta updates from the exchange data stream to a local
//! cache of equities, orders, and portfolio state.
//!
//! # Merge Rules
//!
//! - A FULL update unconditionally replaces the entire cache and adopts the
//!   update's sequence as the new baseline, regardless of ordering relative
//!   to prior state.
//! - A DELTA update is applied only when its sequence is strictly greater
//!   than the last applied sequence; otherwise the whole message is
//!   discarded without touching any state. Duplicate and out-of-order
//!   delivery is expected over a reconnecting transport.
//! - Equity records upsert by symbol with full overwrite.
//! - Order records upsert by order id; a cancelled or rejected status
//!   removes the id from the cache entirely.
//! - A portfolio snapshot, when present, replaces the cached one wholesale.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{EquityRecord, MarketUpdate, OrderRecord, PortfolioSnapshot, UpdateKind};

/// Error raised for deltas that do not advance the sequence baseline.
///
/// Expected wire noise, not session failure: callers drop the update and
/// log at debug level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stale delta: sequence {received} <= last applied {last_applied}")]
pub struct SequenceError {
    /// Sequence carried by the rejected delta.
    pub received: u64,
    /// Sequence baseline at the time of rejection.
    pub last_applied: u64,
}

/// Outcome of a successfully applied update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedUpdate {
    /// A full snapshot replaced the cache.
    Full,
    /// A delta advanced the cache.
    Delta {
        /// Equity records upserted.
        equities: usize,
        /// Order records upserted.
        orders_upserted: usize,
        /// Order ids removed by terminal status.
        orders_removed: usize,
    },
}

/// Local cache of exchange data, keyed maps plus a portfolio snapshot.
#[derive(Debug, Default, Clone)]
pub struct ExchangeCache {
    equities: HashMap<String, EquityRecord>,
    orders: HashMap<String, OrderRecord>,
    portfolio: Option<PortfolioSnapshot>,
    last_applied_sequence: u64,
    last_update: Option<DateTime<Utc>>,
}

impl ExchangeCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one sequenced update.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceError`] for a delta whose sequence does not
    /// strictly advance the baseline. The cache is left byte-for-byte
    /// unchanged in that case.
    pub fn apply(&mut self, update: &MarketUpdate) -> Result<AppliedUpdate, SequenceError> {
        match update.delta_type {
            UpdateKind::Full => {
                self.apply_full(update);
                Ok(AppliedUpdate::Full)
            }
            UpdateKind::Delta => self.apply_delta(update),
        }
    }

    fn apply_full(&mut self, update: &MarketUpdate) {
        self.equities.clear();
        self.orders.clear();

        for equity in &update.equities {
            self.equities.insert(equity.symbol.clone(), equity.clone());
        }
        for order in &update.orders {
            // A snapshot should not carry tombstones, but tolerate them.
            if !order.status.is_terminal_removal() {
                self.orders.insert(order.order_id.clone(), order.clone());
            }
        }

        self.portfolio = update.portfolio.clone();
        self.last_applied_sequence = update.sequence;
        self.last_update = Some(update.timestamp);
    }

    fn apply_delta(&mut self, update: &MarketUpdate) -> Result<AppliedUpdate, SequenceError> {
        if update.sequence <= self.last_applied_sequence {
            return Err(SequenceError {
                received: update.sequence,
                last_applied: self.last_applied_sequence,
            });
        }

        for equity in &update.equities {
            self.equities.insert(equity.symbol.clone(), equity.clone());
        }

        let mut orders_upserted = 0;
        let mut orders_removed = 0;
        for order in &update.orders {
            if order.status.is_terminal_removal() {
                if self.orders.remove(&order.order_id).is_some() {
                    orders_removed += 1;
                }
            } else {
                self.orders.insert(order.order_id.clone(), order.clone());
                orders_upserted += 1;
            }
        }

        if let Some(portfolio) = &update.portfolio {
            self.portfolio = Some(portfolio.clone());
        }

        self.last_applied_sequence = update.sequence;
        self.last_update = Some(update.timestamp);

        Ok(AppliedUpdate::Delta {
            equities: update.equities.len(),
            orders_upserted,
            orders_removed,
        })
    }

    /// Clear all cached state and reset the sequence baseline.
    ///
    /// Used on disconnection so stale data is never shown as live; the next
    /// FULL snapshot rebuilds the cache.
    pub fn reset(&mut self) {
        self.equities.clear();
        self.orders.clear();
        self.portfolio = None;
        self.last_applied_sequence = 0;
        self.last_update = None;
    }

    /// Look up the latest record for a symbol.
    #[must_use]
    pub fn equity(&self, symbol: &str) -> Option<&EquityRecord> {
        self.equities.get(symbol)
    }

    /// Look up the latest record for an order id.
    #[must_use]
    pub fn order(&self, order_id: &str) -> Option<&OrderRecord> {
        self.orders.get(order_id)
    }

    /// Current portfolio snapshot, if any update carried one.
    #[must_use]
    pub const fn portfolio(&self) -> Option<&PortfolioSnapshot> {
        self.portfolio.as_ref()
    }

    /// Sequence of the last applied update.
    #[must_use]
    pub const fn last_applied_sequence(&self) -> u64 {
        self.last_applied_sequence
    }

    /// Timestamp of the last applied update.
    #[must_use]
    pub const fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Number of cached equity records.
    #[must_use]
    pub fn equity_count(&self) -> usize {
        self.equities.len()
    }

    /// Number of cached order records.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// All equity records, sorted by symbol for stable presentation.
    #[must_use]
    pub fn equities_sorted(&self) -> Vec<EquityRecord> {
        let mut records: Vec<_> = self.equities.values().cloned().collect();
        records.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        records
    }

    /// All order records, sorted by order id for stable presentation.
    #[must_use]
    pub fn orders_sorted(&self) -> Vec<OrderRecord> {
        let mut records: Vec<_> = self.orders.values().cloned().collect();
        records.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        records
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::market::{OrderSide, OrderStatus, Position};

    fn equity(symbol: &str, price: i64) -> EquityRecord {
        EquityRecord {
            symbol: symbol.to_string(),
            last_price: Decimal::new(price, 2),
            bid: Decimal::new(price - 1, 2),
            ask: Decimal::new(price + 1, 2),
            volume: 100,
        }
    }

    fn order(id: &str, status: OrderStatus) -> OrderRecord {
        OrderRecord {
            order_id: id.to_string(),
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            status,
            quantity: Decimal::new(10, 0),
            filled_quantity: Decimal::ZERO,
            limit_price: None,
        }
    }

    fn portfolio(cash: i64) -> PortfolioSnapshot {
        PortfolioSnapshot {
            cash: Decimal::new(cash, 2),
            total_value: Decimal::new(cash * 2, 2),
            positions: vec![Position {
                symbol: "AAPL".to_string(),
                quantity: Decimal::new(5, 0),
                average_price: Decimal::new(15_000, 2),
                market_value: Decimal::new(75_000, 2),
            }],
        }
    }

    fn full(sequence: u64, equities: Vec<EquityRecord>, orders: Vec<OrderRecord>) -> MarketUpdate {
        MarketUpdate {
            delta_type: UpdateKind::Full,
            sequence,
            timestamp: Utc::now(),
            equities,
            orders,
            portfolio: Some(portfolio(1_000_000)),
        }
    }

    fn delta(sequence: u64, equities: Vec<EquityRecord>, orders: Vec<OrderRecord>) -> MarketUpdate {
        MarketUpdate {
            delta_type: UpdateKind::Delta,
            sequence,
            timestamp: Utc::now(),
            equities,
            orders,
            portfolio: None,
        }
    }

    #[test]
    fn full_replaces_everything() {
        let mut cache = ExchangeCache::new();
        cache
            .apply(&full(10, vec![equity("AAPL", 15_000)], vec![]))
            .unwrap();

        cache
            .apply(&full(20, vec![equity("MSFT", 40_000)], vec![]))
            .unwrap();

        assert!(cache.equity("AAPL").is_none());
        assert!(cache.equity("MSFT").is_some());
        assert_eq!(cache.last_applied_sequence(), 20);
    }

    #[test]
    fn full_resets_regardless_of_sequence() {
        let mut cache = ExchangeCache::new();
        cache
            .apply(&full(100, vec![equity("AAPL", 15_000)], vec![]))
            .unwrap();

        // Lower sequence than the baseline still wins for a snapshot.
        cache
            .apply(&full(5, vec![equity("TSLA", 25_000)], vec![]))
            .unwrap();

        assert!(cache.equity("AAPL").is_none());
        assert!(cache.equity("TSLA").is_some());
        assert_eq!(cache.last_applied_sequence(), 5);
    }

    #[test]
    fn full_is_idempotent() {
        let update = full(
            7,
            vec![equity("AAPL", 15_000)],
            vec![order("o-1", OrderStatus::New)],
        );

        let mut first = ExchangeCache::new();
        first.apply(&update).unwrap();
        let mut second = first.clone();
        second.apply(&update).unwrap();

        assert_eq!(first.equities_sorted(), second.equities_sorted());
        assert_eq!(first.orders_sorted(), second.orders_sorted());
        assert_eq!(first.portfolio(), second.portfolio());
        assert_eq!(
            first.last_applied_sequence(),
            second.last_applied_sequence()
        );
    }

    #[test]
    fn delta_upserts_by_symbol_last_writer_wins() {
        let mut cache = ExchangeCache::new();
        cache
            .apply(&full(1, vec![equity("AAPL", 15_000)], vec![]))
            .unwrap();

        cache
            .apply(&delta(2, vec![equity("AAPL", 16_000)], vec![]))
            .unwrap();

        assert_eq!(
            cache.equity("AAPL").unwrap().last_price,
            Decimal::new(16_000, 2)
        );
        assert_eq!(cache.equity_count(), 1);
    }

    #[test]
    fn stale_delta_is_noop() {
        let mut cache = ExchangeCache::new();
        cache
            .apply(&full(10, vec![equity("AAPL", 15_000)], vec![]))
            .unwrap();
        let before = cache.clone();

        let err = cache
            .apply(&delta(10, vec![equity("AAPL", 99_999)], vec![]))
            .unwrap_err();

        assert_eq!(err.received, 10);
        assert_eq!(err.last_applied, 10);
        assert_eq!(cache.equities_sorted(), before.equities_sorted());
        assert_eq!(cache.last_applied_sequence(), before.last_applied_sequence());
        assert_eq!(cache.last_update(), before.last_update());
    }

    #[test]
    fn out_of_order_delta_is_dropped_entirely() {
        let mut cache = ExchangeCache::new();
        cache.apply(&full(10, vec![], vec![])).unwrap();

        // Even the order tombstone inside a stale delta must not apply.
        cache
            .apply(&delta(11, vec![], vec![order("o-1", OrderStatus::New)]))
            .unwrap();
        let result = cache.apply(&delta(
            9,
            vec![equity("AAPL", 1)],
            vec![order("o-1", OrderStatus::Cancelled)],
        ));

        assert!(result.is_err());
        assert!(cache.order("o-1").is_some());
        assert!(cache.equity("AAPL").is_none());
    }

    #[test]
    fn cancelled_order_is_removed() {
        let mut cache = ExchangeCache::new();
        cache
            .apply(&full(1, vec![], vec![order("o-1", OrderStatus::New)]))
            .unwrap();

        let applied = cache
            .apply(&delta(2, vec![], vec![order("o-1", OrderStatus::Cancelled)]))
            .unwrap();

        assert_eq!(
            applied,
            AppliedUpdate::Delta {
                equities: 0,
                orders_upserted: 0,
                orders_removed: 1,
            }
        );
        assert!(cache.order("o-1").is_none());
    }

    #[test]
    fn rejected_order_is_removed() {
        let mut cache = ExchangeCache::new();
        cache
            .apply(&full(1, vec![], vec![order("o-2", OrderStatus::PartiallyFilled)]))
            .unwrap();

        cache
            .apply(&delta(2, vec![], vec![order("o-2", OrderStatus::Rejected)]))
            .unwrap();

        assert!(cache.order("o-2").is_none());
        assert_eq!(cache.order_count(), 0);
    }

    #[test]
    fn filled_order_stays_cached() {
        let mut cache = ExchangeCache::new();
        cache
            .apply(&full(1, vec![], vec![order("o-3", OrderStatus::New)]))
            .unwrap();

        cache
            .apply(&delta(2, vec![], vec![order("o-3", OrderStatus::Filled)]))
            .unwrap();

        assert_eq!(cache.order("o-3").unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn tombstone_for_unknown_id_is_harmless() {
        let mut cache = ExchangeCache::new();
        cache.apply(&full(1, vec![], vec![])).unwrap();

        let applied = cache
            .apply(&delta(2, vec![], vec![order("ghost", OrderStatus::Cancelled)]))
            .unwrap();

        assert_eq!(
            applied,
            AppliedUpdate::Delta {
                equities: 0,
                orders_upserted: 0,
                orders_removed: 0,
            }
        );
    }

    #[test]
    fn delta_without_portfolio_retains_previous() {
        let mut cache = ExchangeCache::new();
        cache.apply(&full(1, vec![], vec![])).unwrap();
        let snapshot = cache.portfolio().cloned().unwrap();

        cache.apply(&delta(2, vec![equity("AAPL", 1)], vec![])).unwrap();

        assert_eq!(cache.portfolio(), Some(&snapshot));
    }

    #[test]
    fn delta_with_portfolio_replaces_wholesale() {
        let mut cache = ExchangeCache::new();
        cache.apply(&full(1, vec![], vec![])).unwrap();

        let mut update = delta(2, vec![], vec![]);
        update.portfolio = Some(portfolio(50));
        cache.apply(&update).unwrap();

        assert_eq!(cache.portfolio().unwrap().cash, Decimal::new(50, 2));
    }

    #[test]
    fn reset_clears_all_state() {
        let mut cache = ExchangeCache::new();
        cache
            .apply(&full(
                9,
                vec![equity("AAPL", 1)],
                vec![order("o-1", OrderStatus::New)],
            ))
            .unwrap();

        cache.reset();

        assert_eq!(cache.equity_count(), 0);
        assert_eq!(cache.order_count(), 0);
        assert!(cache.portfolio().is_none());
        assert_eq!(cache.last_applied_sequence(), 0);
        assert!(cache.last_update().is_none());

        // A delta with sequence 1 applies against the fresh baseline.
        assert!(cache.apply(&delta(1, vec![equity("A", 1)], vec![])).is_ok());
    }

    #[test]
    fn strictly_increasing_deltas_fold_in_order() {
        let mut cache = ExchangeCache::new();
        cache.apply(&full(0, vec![], vec![])).unwrap();

        cache
            .apply(&delta(1, vec![equity("AAPL", 100)], vec![order("o-1", OrderStatus::New)]))
            .unwrap();
        cache
            .apply(&delta(3, vec![equity("AAPL", 200)], vec![]))
            .unwrap();
        cache
            .apply(&delta(7, vec![], vec![order("o-1", OrderStatus::Cancelled)]))
            .unwrap();

        // No earlier upsert survives a later one to the same key.
        assert_eq!(
            cache.equity("AAPL").unwrap().last_price,
            Decimal::new(200, 2)
        );
        assert!(cache.order("o-1").is_none());
        assert_eq!(cache.last_applied_sequence(), 7);
    }
}
