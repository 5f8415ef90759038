//! Time-gated cache in front of a [`KeyStore`].
//!
//! The store is read on the very first call and afterwards only once the cached
//! bundle's `next_rotation` is unset or has passed. Everything in between is served
//! from memory without touching the store.

use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Report;
use tokio::sync::Mutex;

use crate::error::SignerError;

use super::{Clock, KeyStore, Keys, KeysUpdater};

pub struct KeyCache {
    store: Arc<dyn KeyStore>,
    now: Clock,
    /// `None` until the first successful fetch.
    ///
    /// Held across the store round trip so overlapping callers never replace a
    /// bundle with an older one.
    keys: Mutex<Option<Keys>>,
}

impl KeyCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyStore>, now: Clock) -> Self {
        Self {
            store,
            now,
            keys: Mutex::new(None),
        }
    }

    fn is_stale(&self, keys: &Keys) -> bool {
        match keys.next_rotation {
            Some(next_rotation) => (self.now)() >= next_rotation,
            None => true,
        }
    }
}

#[async_trait]
impl KeyStore for KeyCache {
    async fn get_keys(&self) -> Result<Keys, Report<SignerError>> {
        let mut cached = self.keys.lock().await;

        if let Some(keys) = cached.as_ref() {
            if !self.is_stale(keys) {
                return Ok(keys.clone());
            }
        }

        log::debug!("key cache refreshing from store");
        let keys = self.store.get_keys().await?;
        *cached = Some(keys.clone());
        Ok(keys)
    }

    async fn update_keys(&self, updater: KeysUpdater) -> Result<(), Report<SignerError>> {
        self.store.update_keys(updater).await
    }
}
