//! Device and Session Identity
//!
//! Durable client identity so the server can recognize a returning client
//! across reconnects, tab reloads, and backend instance migration, plus a
//! lightweight session record with an inactivity expiry window.

mod device;
mod session;

pub use device::DeviceIdentityManager;
pub use session::{SessionRecord, SessionStore};
