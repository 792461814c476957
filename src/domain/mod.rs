//! Domain layer - Core session and market data types.
//!
//! Pure types and merge logic with no I/O. The infrastructure layer feeds
//! these from the wire and publishes the results upward.

/// Connection lifecycle state types.
pub mod connection;

/// Market data records and the sequence-validated merge cache.
pub mod market;
