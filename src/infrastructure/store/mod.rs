//! Exchange Data Store
//!
//! Shared, observable wrapper over the merge cache. Ingest happens on the
//! socket reader task; consumers watch the derived read models (equities,
//! orders, portfolio) and always see the merged result of a consistent
//! prefix of applied updates.

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::domain::market::{
    AppliedUpdate, EquityRecord, ExchangeCache, MarketUpdate, OrderRecord, PortfolioSnapshot,
};

/// Observable exchange data cache.
pub struct ExchangeDataStore {
    cache: Mutex<ExchangeCache>,
    equities_tx: watch::Sender<Vec<EquityRecord>>,
    orders_tx: watch::Sender<Vec<OrderRecord>>,
    portfolio_tx: watch::Sender<Option<PortfolioSnapshot>>,
}

impl Default for ExchangeDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeDataStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (equities_tx, _) = watch::channel(Vec::new());
        let (orders_tx, _) = watch::channel(Vec::new());
        let (portfolio_tx, _) = watch::channel(None);
        Self {
            cache: Mutex::new(ExchangeCache::new()),
            equities_tx,
            orders_tx,
            portfolio_tx,
        }
    }

    /// Apply one sequenced update and republish the read models.
    ///
    /// Stale deltas are dropped whole; they are expected on a
    /// reconnecting transport and leave the published state untouched.
    pub fn ingest(&self, update: &MarketUpdate) {
        let applied = {
            let mut cache = self.cache.lock();
            match cache.apply(update) {
                Ok(applied) => {
                    self.publish(&cache);
                    applied
                }
                Err(e) => {
                    tracing::debug!(
                        received = e.received,
                        last_applied = e.last_applied,
                        "Dropping stale delta"
                    );
                    return;
                }
            }
        };

        match applied {
            AppliedUpdate::Full => {
                tracing::debug!(sequence = update.sequence, "Applied full snapshot");
            }
            AppliedUpdate::Delta {
                equities,
                orders_upserted,
                orders_removed,
            } => {
                tracing::trace!(
                    sequence = update.sequence,
                    equities,
                    orders_upserted,
                    orders_removed,
                    "Applied delta"
                );
            }
        }
    }

    /// Clear all cached data and reset the sequence baseline.
    ///
    /// Called on any disconnect so stale data is never presented as live.
    pub fn reset(&self) {
        let mut cache = self.cache.lock();
        cache.reset();
        self.publish(&cache);
    }

    fn publish(&self, cache: &ExchangeCache) {
        self.equities_tx.send_replace(cache.equities_sorted());
        self.orders_tx.send_replace(cache.orders_sorted());
        self.portfolio_tx.send_replace(cache.portfolio().cloned());
    }

    /// Watch the equity list, sorted by symbol.
    #[must_use]
    pub fn equities(&self) -> watch::Receiver<Vec<EquityRecord>> {
        self.equities_tx.subscribe()
    }

    /// Watch the open-order list, sorted by order id.
    #[must_use]
    pub fn orders(&self) -> watch::Receiver<Vec<OrderRecord>> {
        self.orders_tx.subscribe()
    }

    /// Watch the portfolio snapshot.
    #[must_use]
    pub fn portfolio(&self) -> watch::Receiver<Option<PortfolioSnapshot>> {
        self.portfolio_tx.subscribe()
    }

    /// Sequence of the last applied update.
    #[must_use]
    pub fn last_applied_sequence(&self) -> u64 {
        self.cache.lock().last_applied_sequence()
    }
}
