//! Device Identity Manager
//!
//! Generates and persists an opaque, durable device identifier. The id is
//! immutable for the lifetime of the installation unless explicitly
//! cleared or regenerated (forced logout). Storage failures degrade to an
//! in-process id and are logged, never propagated.

use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::application::ports::StorageProvider;

/// Storage key under which the device id is persisted.
const DEVICE_ID_KEY: &str = "session.device_id";

/// Prefix of the high-entropy fallback id format.
///
/// Clients on platforms without UUID support write `dev-<32+ hex chars>`;
/// validation accepts both formats so those ids keep working here.
const FALLBACK_PREFIX: &str = "dev-";

/// Minimum hex digits after the fallback prefix.
const FALLBACK_MIN_HEX: usize = 32;

/// Manages the durable device identifier.
pub struct DeviceIdentityManager {
    storage: Arc<dyn StorageProvider>,
    cached: RwLock<Option<String>>,
}

impl DeviceIdentityManager {
    /// Create a manager over the given storage.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            storage,
            cached: RwLock::new(None),
        }
    }

    /// The persisted device id, generating and persisting one on first
    /// access or when the stored value fails validation.
    #[must_use]
    pub fn device_id(&self) -> String {
        if let Some(id) = self.cached.read().as_ref() {
            return id.clone();
        }

        let id = match self.storage.get(DEVICE_ID_KEY) {
            Ok(Some(stored)) if is_valid_device_id(&stored) => stored,
            Ok(stored) => {
                if let Some(invalid) = stored {
                    tracing::warn!(stored = %invalid, "Stored device id failed validation, regenerating");
                }
                self.generate_and_persist()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Device id storage unavailable, using in-process id");
                Uuid::new_v4().to_string()
            }
        };

        *self.cached.write() = Some(id.clone());
        id
    }

    /// Discard the current id and generate a fresh one.
    ///
    /// Escape hatch for forced logout; the server will treat the client as
    /// a new installation.
    #[must_use]
    pub fn regenerate(&self) -> String {
        let id = self.generate_and_persist();
        *self.cached.write() = Some(id.clone());
        id
    }

    /// Remove the persisted id. The next [`Self::device_id`] call
    /// generates a fresh one.
    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(DEVICE_ID_KEY) {
            tracing::warn!(error = %e, "Failed to clear device id from storage");
        }
        *self.cached.write() = None;
    }

    fn generate_and_persist(&self) -> String {
        let id = Uuid::new_v4().to_string();
        if let Err(e) = self.storage.set(DEVICE_ID_KEY, &id) {
            tracing::warn!(error = %e, "Failed to persist device id, using in-process id");
        }
        id
    }
}

/// Validate a device id: canonical UUID or the hex fallback format.
#[must_use]
pub fn is_valid_device_id(id: &str) -> bool {
    if Uuid::parse_str(id).is_ok() {
        return true;
    }

    id.strip_prefix(FALLBACK_PREFIX).is_some_and(|hex| {
        hex.len() >= FALLBACK_MIN_HEX && hex.chars().all(|c| c.is_ascii_hexdigit())
    })
}
