//! Signer that delegates the raw signature to a transit engine.
//!
//! The engine never releases private keys, so the compact JWS envelope is assembled
//! here: the signing input is built and hashed locally, only the digest travels to the
//! engine, and the returned signature is appended to the signing input.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use error_stack::{Report, ResultExt};
use jose_jwk::JwkSet;

use crate::error::SignerError;
use crate::transit::{TransitEngine, TransitSignRequest, VaultTransit};

use super::algorithm::{
    hash_for_algorithm, signature_algorithm, transit_hash_name, transit_signature_scheme,
    Hasher, KeyFamily, SignatureAlgorithm,
};
use super::jwks::PublicKey;
use super::jws::{compact, signing_input, JwsHeader};
use super::{Signer, SigningKeyResponse};

/// Marshaling mode asking the engine for a JWS-ready, base64url encoded signature.
const JWS_MARSHALING: &str = "jws";

/// Connection settings for a [`RemoteSigner`] over HTTP.
#[derive(Debug, Clone)]
pub struct TransitConfig {
    pub address: String,
    pub mount: String,
    pub key: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl TransitConfig {
    /// Connects to the engine and resolves the key family.
    ///
    /// # Errors
    ///
    /// Fails if the client cannot be built, the key metadata cannot be read or the key
    /// family is unsupported.
    pub async fn open(self) -> Result<Box<dyn Signer>, Report<SignerError>> {
        let engine = VaultTransit::new(&self.address, self.token, self.timeout)?;
        let signer = RemoteSigner::connect(Arc::new(engine), self.mount, self.key).await?;
        Ok(Box::new(signer))
    }
}

pub struct RemoteSigner {
    engine: Arc<dyn TransitEngine>,
    mount: String,
    key_name: String,
    /// Resolved once at construction; a key name never changes family.
    family: KeyFamily,
}

impl RemoteSigner {
    /// Reads the key metadata once to learn the key family.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::BackendUnavailable`] if the engine cannot be reached and
    /// [`SignerError::UnsupportedAlgorithm`] if the key family is not supported.
    pub async fn connect(
        engine: Arc<dyn TransitEngine>,
        mount: impl Into<String>,
        key_name: impl Into<String>,
    ) -> Result<Self, Report<SignerError>> {
        let mount = mount.into();
        let key_name = key_name.into();

        let info = engine
            .read_key(&mount, &key_name)
            .await
            .attach(format!("reading transit key {}/{}", mount, key_name))?;
        let family: KeyFamily = info.key_type.parse()?;

        log::info!(
            "transit signer using key {}/{} ({}, {})",
            mount,
            key_name,
            family,
            signature_algorithm(family)
        );

        Ok(Self {
            engine,
            mount,
            key_name,
            family,
        })
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        signature_algorithm(self.family)
    }

    fn sign_request(
        &self,
        alg: SignatureAlgorithm,
        input: &str,
        key_version: u32,
    ) -> TransitSignRequest {
        let signature_algorithm = transit_signature_scheme(self.family).map(String::from);

        match transit_hash_name(alg) {
            Some(hash_name) => {
                let mut hasher = hash_for_algorithm(alg);
                hasher.update(input.as_bytes());
                let digest = hasher.finalize_reset();
                TransitSignRequest {
                    input: general_purpose::STANDARD.encode(&digest),
                    prehashed: true,
                    hash_algorithm: Some(hash_name.to_string()),
                    signature_algorithm,
                    marshaling_algorithm: JWS_MARSHALING.to_string(),
                    key_version,
                }
            }
            // EdDSA signs the message itself.
            None => TransitSignRequest {
                input: general_purpose::STANDARD.encode(input.as_bytes()),
                prehashed: false,
                hash_algorithm: None,
                signature_algorithm,
                marshaling_algorithm: JWS_MARSHALING.to_string(),
                key_version,
            },
        }
    }
}

/// Extracts the signature from a `<scheme>:<version>:<signature>` engine response.
fn extract_signature(composite: &str) -> Result<&str, Report<SignerError>> {
    let mut parts = composite.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(_), Some(signature)) if !signature.is_empty() => Ok(signature),
        _ => Err(Report::new(SignerError::MalformedRemoteSignature {
            message: format!("unexpected transit signature format: {}", composite),
        })),
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    async fn signing_keys(&self) -> Result<SigningKeyResponse, Report<SignerError>> {
        let info = self.engine.read_key(&self.mount, &self.key_name).await?;
        let alg = self.algorithm();

        let mut keys = Vec::with_capacity(info.versions.len());
        for (version, metadata) in info.ordered_versions() {
            match PublicKey::from_transit(self.family, &metadata.public_key) {
                Ok(public_key) => keys.push(public_key.to_jwk(version, alg)),
                Err(e) => {
                    log::warn!("skipping transit key version {}: {:?}", version, e);
                }
            }
        }

        if keys.is_empty() {
            return Err(Report::new(SignerError::NoUsableKey));
        }

        Ok(SigningKeyResponse {
            jwks: JwkSet { keys },
            next_rotation: None,
        })
    }

    async fn sign(&self, payload: &[u8]) -> Result<String, Report<SignerError>> {
        let alg = self.algorithm();
        let info = self.engine.read_key(&self.mount, &self.key_name).await?;
        let version = info
            .latest_version()
            .ok_or_else(|| Report::new(SignerError::NoUsableKey))?;

        let header = JwsHeader::new(alg, version.to_string());
        let input = signing_input(&header, payload)?;
        let request = self.sign_request(alg, &input, version);

        let composite = self
            .engine
            .sign(&self.mount, &self.key_name, &request)
            .await
            .attach(format!("signing with key version {}", version))?;
        let signature = extract_signature(&composite)?;

        Ok(compact(&input, signature))
    }

    async fn hasher(&self) -> Result<Hasher, Report<SignerError>> {
        Ok(hash_for_algorithm(self.algorithm()))
    }

    async fn rotate_key(&self) -> Result<(), Report<SignerError>> {
        Err(Report::new(SignerError::RotationUnsupported))
    }
}
