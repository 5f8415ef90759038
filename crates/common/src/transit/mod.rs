//! Transit engine collaborator.
//!
//! A transit engine holds private key material and only exposes key metadata reads
//! and a raw sign operation. [`VaultTransit`] talks to a Vault-compatible engine over
//! HTTP; tests use an in-process fake.

use std::collections::HashMap;

use async_trait::async_trait;
use error_stack::Report;
use serde::{Deserialize, Serialize};

use crate::error::SignerError;

pub mod vault;

pub use vault::VaultTransit;

/// Key metadata returned by the engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RemoteKeyInfo {
    /// Key family string, for example `rsa-2048` or `ed25519`.
    #[serde(rename = "type")]
    pub key_type: String,
    /// Version identifier to version metadata.
    #[serde(rename = "keys", default)]
    pub versions: HashMap<String, RemoteKeyVersion>,
}

impl RemoteKeyInfo {
    /// Highest numeric version. Non-numeric version identifiers are ignored.
    #[must_use]
    pub fn latest_version(&self) -> Option<u32> {
        self.versions
            .keys()
            .filter_map(|v| v.parse::<u32>().ok())
            .max()
    }

    /// Version identifiers, numeric ones highest first, then the rest in lexical order.
    #[must_use]
    pub fn ordered_versions(&self) -> Vec<(&str, &RemoteKeyVersion)> {
        let mut versions: Vec<_> = self
            .versions
            .iter()
            .map(|(id, info)| (id.as_str(), info))
            .collect();
        versions.sort_by(|(a, _), (b, _)| {
            match (a.parse::<u32>().ok(), b.parse::<u32>().ok()) {
                (Some(a), Some(b)) => b.cmp(&a),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.cmp(b),
            }
        });
        versions
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RemoteKeyVersion {
    #[serde(default)]
    pub creation_time: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub public_key: String,
}

/// Body of a transit sign call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitSignRequest {
    /// Standard base64 of the digest, or of the message when not pre-hashed.
    pub input: String,
    pub prehashed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_algorithm: Option<String>,
    pub marshaling_algorithm: String,
    pub key_version: u32,
}

/// Remote engine that signs without releasing private keys.
#[async_trait]
pub trait TransitEngine: Send + Sync {
    /// Reads metadata for `key` under `mount`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::BackendUnavailable`] on transport or engine failure.
    async fn read_key(&self, mount: &str, key: &str) -> Result<RemoteKeyInfo, Report<SignerError>>;

    /// Signs with `key` and returns the composite `<scheme>:<version>:<signature>` string.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::BackendUnavailable`] on transport or engine failure and
    /// [`SignerError::MalformedRemoteSignature`] if no signature came back.
    async fn sign(
        &self,
        mount: &str,
        key: &str,
        request: &TransitSignRequest,
    ) -> Result<String, Report<SignerError>>;
}
