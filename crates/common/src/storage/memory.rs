//! In-memory key store.
//!
//! Keeps the bundle behind a [`parking_lot::Mutex`]; updates run under the lock so
//! they are atomic with respect to each other.

use async_trait::async_trait;
use error_stack::Report;
use parking_lot::Mutex;

use crate::error::SignerError;

use super::{KeyStore, Keys, KeysUpdater};

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: Mutex<Keys>,
}

impl MemoryKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `keys`.
    #[must_use]
    pub fn with_keys(keys: Keys) -> Self {
        Self {
            keys: Mutex::new(keys),
        }
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_keys(&self) -> Result<Keys, Report<SignerError>> {
        Ok(self.keys.lock().clone())
    }

    async fn update_keys(&self, updater: KeysUpdater) -> Result<(), Report<SignerError>> {
        let mut keys = self.keys.lock();
        let updated = updater(keys.clone())?;
        *keys = updated;
        Ok(())
    }
}
