//! Market Data Records
//!
//! Typed records for the exchange data stream: equities keyed by symbol,
//! orders keyed by order id, and a single portfolio snapshot. These map
//! directly to the JSON payload of `exchange_data` messages.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

mod cache;

pub use cache::{AppliedUpdate, ExchangeCache, SequenceError};

// =============================================================================
// Equity
// =============================================================================

/// Latest state of one traded equity.
///
/// Delta updates overwrite the whole record for a symbol; there is no
/// field-level merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityRecord {
    /// Ticker symbol (cache key).
    pub symbol: String,
    /// Last traded price.
    pub last_price: Decimal,
    /// Best bid.
    pub bid: Decimal,
    /// Best ask.
    pub ask: Decimal,
    /// Cumulative session volume.
    #[serde(default)]
    pub volume: u64,
}

// =============================================================================
// Orders
// =============================================================================

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted, not yet filled.
    New,
    /// Partially filled.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancelled by the client or the exchange.
    Cancelled,
    /// Rejected by the exchange.
    Rejected,
}

impl OrderStatus {
    /// Whether an update with this status removes the order from the cache.
    ///
    /// Cancelled and rejected orders are tombstoned by deletion; filled
    /// orders stay visible until the next full snapshot.
    #[must_use]
    pub const fn is_terminal_removal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Rejected)
    }
}

/// Latest state of one working order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Exchange-assigned order id (cache key).
    pub order_id: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Ordered quantity.
    pub quantity: Decimal,
    /// Quantity filled so far.
    #[serde(default)]
    pub filled_quantity: Decimal,
    /// Limit price, absent for market orders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
}

// =============================================================================
// Portfolio
// =============================================================================

/// One open position within a portfolio snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Ticker symbol.
    pub symbol: String,
    /// Signed position quantity.
    pub quantity: Decimal,
    /// Average entry price.
    pub average_price: Decimal,
    /// Current market value.
    pub market_value: Decimal,
}

/// Complete portfolio snapshot.
///
/// Replaced wholesale when present in an update; never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// Available cash balance.
    pub cash: Decimal,
    /// Total account value.
    pub total_value: Decimal,
    /// Open positions.
    #[serde(default)]
    pub positions: Vec<Position>,
}

// =============================================================================
// Sequenced Updates
// =============================================================================

/// Whether an update is a full snapshot or an incremental delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateKind {
    /// Authoritative complete snapshot; unconditionally replaces the cache.
    Full,
    /// Incremental update, valid only when its sequence advances the cache.
    Delta,
}

/// One sequenced update from the exchange data stream.
///
/// # Wire Format (JSON, inside an `exchange_data` message)
/// ```json
/// {
///   "delta_type": "DELTA",
///   "sequence": 4812,
///   "timestamp": "2026-08-27T14:03:22Z",
///   "equities": [{"symbol": "AAPL", "last_price": "231.10", ...}],
///   "orders": [],
///   "portfolio": null
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketUpdate {
    /// Full snapshot or incremental delta.
    pub delta_type: UpdateKind,
    /// Monotonic stream sequence number.
    pub sequence: u64,
    /// Server-side emission time.
    pub timestamp: DateTime<Utc>,
    /// Equity records to apply.
    #[serde(default)]
    pub equities: Vec<EquityRecord>,
    /// Order records to apply.
    #[serde(default)]
    pub orders: Vec<OrderRecord>,
    /// Portfolio snapshot, replacing the cached one when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio: Option<PortfolioSnapshot>,
}
