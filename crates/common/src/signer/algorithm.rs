//! Key family, signature algorithm and hash resolution.
//!
//! Both signer backends resolve through these tables so that digests derived from
//! a token's `alg` (for example `at_hash`) agree no matter which backend signed it.

use std::str::FromStr;

use derive_more::Display;
use error_stack::Report;
use jose_jwk::jose_jwa::Signing;
use serde::{Deserialize, Serialize};
use sha2::digest::DynDigest;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::SignerError;

/// A fresh hash instance matching a signature algorithm.
pub type Hasher = Box<dyn DynDigest + Send + Sync>;

/// Underlying key type. String forms follow the transit engine key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum KeyFamily {
    #[display("rsa-2048")]
    #[serde(rename = "rsa-2048")]
    Rsa2048,
    #[display("rsa-3072")]
    #[serde(rename = "rsa-3072")]
    Rsa3072,
    #[display("rsa-4096")]
    #[serde(rename = "rsa-4096")]
    Rsa4096,
    #[display("ecdsa-p256")]
    #[serde(rename = "ecdsa-p256")]
    EcdsaP256,
    #[display("ecdsa-p384")]
    #[serde(rename = "ecdsa-p384")]
    EcdsaP384,
    #[display("ecdsa-p521")]
    #[serde(rename = "ecdsa-p521")]
    EcdsaP521,
    #[display("ed25519")]
    #[serde(rename = "ed25519")]
    Ed25519,
}

impl KeyFamily {
    #[must_use]
    pub fn is_rsa(self) -> bool {
        matches!(self, Self::Rsa2048 | Self::Rsa3072 | Self::Rsa4096)
    }

    /// RSA modulus size for RSA families.
    #[must_use]
    pub fn rsa_bits(self) -> Option<usize> {
        match self {
            Self::Rsa2048 => Some(2048),
            Self::Rsa3072 => Some(3072),
            Self::Rsa4096 => Some(4096),
            _ => None,
        }
    }
}

impl FromStr for KeyFamily {
    type Err = Report<SignerError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rsa-2048" => Ok(Self::Rsa2048),
            "rsa-3072" => Ok(Self::Rsa3072),
            "rsa-4096" => Ok(Self::Rsa4096),
            "ecdsa-p256" => Ok(Self::EcdsaP256),
            "ecdsa-p384" => Ok(Self::EcdsaP384),
            "ecdsa-p521" => Ok(Self::EcdsaP521),
            "ed25519" => Ok(Self::Ed25519),
            other => Err(Report::new(SignerError::unsupported(other))),
        }
    }
}

/// JWS signature algorithms this subsystem can produce or verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[display("RS256")]
    #[serde(rename = "RS256")]
    Rs256,
    #[display("RS384")]
    #[serde(rename = "RS384")]
    Rs384,
    #[display("RS512")]
    #[serde(rename = "RS512")]
    Rs512,
    #[display("ES256")]
    #[serde(rename = "ES256")]
    Es256,
    #[display("ES384")]
    #[serde(rename = "ES384")]
    Es384,
    #[display("ES512")]
    #[serde(rename = "ES512")]
    Es512,
    #[display("EdDSA")]
    #[serde(rename = "EdDSA")]
    EdDsa,
}

impl FromStr for SignatureAlgorithm {
    type Err = Report<SignerError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::Rs256),
            "RS384" => Ok(Self::Rs384),
            "RS512" => Ok(Self::Rs512),
            "ES256" => Ok(Self::Es256),
            "ES384" => Ok(Self::Es384),
            "ES512" => Ok(Self::Es512),
            "EdDSA" => Ok(Self::EdDsa),
            other => Err(Report::new(SignerError::unsupported(other))),
        }
    }
}

impl From<SignatureAlgorithm> for Signing {
    fn from(alg: SignatureAlgorithm) -> Self {
        match alg {
            SignatureAlgorithm::Rs256 => Signing::Rs256,
            SignatureAlgorithm::Rs384 => Signing::Rs384,
            SignatureAlgorithm::Rs512 => Signing::Rs512,
            SignatureAlgorithm::Es256 => Signing::Es256,
            SignatureAlgorithm::Es384 => Signing::Es384,
            SignatureAlgorithm::Es512 => Signing::Es512,
            SignatureAlgorithm::EdDsa => Signing::EdDsa,
        }
    }
}

/// Signature algorithm for a key family.
///
/// OIDC mandates RS256 support, so every RSA size is normalised to RS256. ECDSA
/// algorithms are prescribed by the curve.
#[must_use]
pub fn signature_algorithm(family: KeyFamily) -> SignatureAlgorithm {
    match family {
        KeyFamily::Rsa2048 | KeyFamily::Rsa3072 | KeyFamily::Rsa4096 => SignatureAlgorithm::Rs256,
        KeyFamily::EcdsaP256 => SignatureAlgorithm::Es256,
        KeyFamily::EcdsaP384 => SignatureAlgorithm::Es384,
        KeyFamily::EcdsaP521 => SignatureAlgorithm::Es512,
        KeyFamily::Ed25519 => SignatureAlgorithm::EdDsa,
    }
}

/// Resolves a transit key type string straight to its signature algorithm.
///
/// # Errors
///
/// Returns [`SignerError::UnsupportedAlgorithm`] for an unknown key type.
pub fn signature_algorithm_for_key_type(
    key_type: &str,
) -> Result<SignatureAlgorithm, Report<SignerError>> {
    key_type.parse::<KeyFamily>().map(signature_algorithm)
}

/// Returns a new hash instance for `alg`.
///
/// The `at_hash` hash is the one named by the ID token's `alg` header. Ed25519 uses
/// SHA-512 internally, so `EdDSA` maps to SHA-512.
#[must_use]
pub fn hash_for_algorithm(alg: SignatureAlgorithm) -> Hasher {
    match alg {
        SignatureAlgorithm::Rs256 | SignatureAlgorithm::Es256 => Box::new(Sha256::default()),
        SignatureAlgorithm::Rs384 | SignatureAlgorithm::Es384 => Box::new(Sha384::default()),
        SignatureAlgorithm::Rs512 | SignatureAlgorithm::Es512 | SignatureAlgorithm::EdDsa => {
            Box::new(Sha512::default())
        }
    }
}

/// Returns a new hash instance for an algorithm given by name.
///
/// # Errors
///
/// Returns [`SignerError::UnsupportedAlgorithm`] for an unknown algorithm name.
pub fn hash_for_algorithm_name(name: &str) -> Result<Hasher, Report<SignerError>> {
    name.parse::<SignatureAlgorithm>().map(hash_for_algorithm)
}

/// Hash name the transit engine expects for a pre-hashed input.
///
/// `None` for `EdDSA`, which signs the message itself.
#[must_use]
pub fn transit_hash_name(alg: SignatureAlgorithm) -> Option<&'static str> {
    match alg {
        SignatureAlgorithm::Rs256 | SignatureAlgorithm::Es256 => Some("sha2-256"),
        SignatureAlgorithm::Rs384 | SignatureAlgorithm::Es384 => Some("sha2-384"),
        SignatureAlgorithm::Rs512 | SignatureAlgorithm::Es512 => Some("sha2-512"),
        SignatureAlgorithm::EdDsa => None,
    }
}

/// Signature scheme the transit engine should use for a key family.
#[must_use]
pub fn transit_signature_scheme(family: KeyFamily) -> Option<&'static str> {
    family.is_rsa().then_some("pkcs1v15")
}
