//! Token signing backends.
//!
//! Both backends satisfy [`Signer`]: [`LocalSigner`] holds private keys obtained from a
//! [`KeyStore`](crate::storage::KeyStore) and rotates them itself, while [`RemoteSigner`]
//! delegates the raw signature to a transit engine and only builds the token envelope.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error_stack::Report;
use jose_jwk::JwkSet;

use crate::error::SignerError;

pub mod algorithm;
pub mod jwks;
pub mod jws;
pub mod local;
pub mod remote;

pub use algorithm::{Hasher, KeyFamily, SignatureAlgorithm};
pub use jws::KeySet;
pub use local::{LocalConfig, LocalSigner, RotationStrategy};
pub use remote::{RemoteSigner, TransitConfig};

/// Public keys published by a signer.
#[derive(Debug, Clone)]
pub struct SigningKeyResponse {
    /// Active key first, then verification keys.
    pub jwks: JwkSet,
    /// `None` when the backend does not publish a rotation schedule.
    pub next_rotation: Option<DateTime<Utc>>,
}

/// Signing contract shared by every backend.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Returns the current public key set.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::NoUsableKey`] if no public signing key is available, or the
    /// backend's error if keys cannot be fetched.
    async fn signing_keys(&self) -> Result<SigningKeyResponse, Report<SignerError>>;

    /// Returns a [`KeySet`] able to verify tokens from this signer.
    ///
    /// # Errors
    ///
    /// Same as [`Signer::signing_keys`].
    async fn key_set(&self) -> Result<KeySet, Report<SignerError>> {
        let response = self.signing_keys().await?;
        Ok(KeySet::new(response.jwks))
    }

    /// Signs `payload` into a compact JWS.
    ///
    /// # Errors
    ///
    /// Returns an error if keys cannot be fetched, the algorithm is unsupported or the
    /// signing primitive fails.
    async fn sign(&self, payload: &[u8]) -> Result<String, Report<SignerError>>;

    /// Hash matching the algorithm tokens are currently signed with.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::UnsupportedAlgorithm`] if the key family is unknown.
    async fn hasher(&self) -> Result<Hasher, Report<SignerError>>;

    /// Rotates the signing key.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::RotationUnsupported`] or [`SignerError::RotationRaced`] as
    /// non-fatal outcomes, anything else is a hard failure.
    async fn rotate_key(&self) -> Result<(), Report<SignerError>>;
}
