//! Persistent key storage collaborator.
//!
//! The store owns the [`Keys`] bundle. Reads go through [`KeyStore::get_keys`] and the
//! only write path is [`KeyStore::update_keys`], which implementations must apply
//! atomically so concurrent rotations from several instances serialize on the store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error_stack::Report;
use jose_jwk::Jwk;

use crate::error::SignerError;
use crate::signer::jwks::PrivateKey;

pub mod cache;
pub mod memory;

pub use cache::KeyCache;
pub use memory::MemoryKeyStore;

/// Source of the current time, injectable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The wall clock.
#[must_use]
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// The active private key together with its key id.
#[derive(Debug, Clone)]
pub struct SigningKey {
    pub kid: String,
    pub key: PrivateKey,
}

/// A previously active public key kept for verification during rotation overlap.
#[derive(Debug, Clone)]
pub struct VerificationKey {
    pub public_key: Jwk,
    pub expiry: DateTime<Utc>,
}

/// Key bundle owned by the persistent store.
#[derive(Debug, Clone, Default)]
pub struct Keys {
    /// Active private key.
    pub signing_key: Option<SigningKey>,
    /// Public half of `signing_key`.
    pub signing_key_pub: Option<Jwk>,
    /// Previously active public keys, oldest first.
    pub verification_keys: Vec<VerificationKey>,
    /// When the active key is due to be replaced. `None` until the first rotation.
    pub next_rotation: Option<DateTime<Utc>>,
}

/// Mutation applied to the stored bundle inside the store's transaction.
pub type KeysUpdater = Box<dyn FnOnce(Keys) -> Result<Keys, Report<SignerError>> + Send>;

/// Persistent key-store collaborator.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Reads the current key bundle.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::BackendUnavailable`] if the store cannot be read.
    async fn get_keys(&self) -> Result<Keys, Report<SignerError>>;

    /// Atomically replaces the key bundle with the result of `updater`.
    ///
    /// An error returned by `updater` aborts the update and is passed through unchanged.
    ///
    /// # Errors
    ///
    /// Returns the updater's error, or [`SignerError::BackendUnavailable`] if the store
    /// cannot be written.
    async fn update_keys(&self, updater: KeysUpdater) -> Result<(), Report<SignerError>>;
}
