//! Compact JWS envelopes and key set verification.
//!
//! The envelope is built by hand so the raw signature step can happen anywhere,
//! in-process or inside a transit engine that never releases its private key:
//!
//! ```text
//! BASE64URL(header) "." BASE64URL(payload) "." BASE64URL(signature)
//! ```
//!
//! All three segments use the URL-safe alphabet without padding.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use error_stack::{Report, ResultExt};
use jose_jwk::JwkSet;
use serde::{Deserialize, Serialize};

use crate::error::SignerError;

use super::algorithm::SignatureAlgorithm;
use super::jwks::PublicKey;

/// Protected header of a compact token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsHeader {
    pub alg: SignatureAlgorithm,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kid: Option<String>,
}

impl JwsHeader {
    #[must_use]
    pub fn new(alg: SignatureAlgorithm, kid: impl Into<String>) -> Self {
        Self {
            alg,
            kid: Some(kid.into()),
        }
    }
}

/// Builds the JWS signing input `BASE64URL(header) "." BASE64URL(payload)`.
///
/// # Errors
///
/// Returns [`SignerError::Signing`] if the header cannot be serialized.
pub fn signing_input(header: &JwsHeader, payload: &[u8]) -> Result<String, Report<SignerError>> {
    let header_json = serde_json::to_vec(header).change_context(SignerError::Signing {
        message: "Failed to serialize JWS header".into(),
    })?;

    let mut input = URL_SAFE_NO_PAD.encode(header_json);
    input.push('.');
    URL_SAFE_NO_PAD.encode_string(payload, &mut input);
    Ok(input)
}

/// Appends an already encoded signature segment to a signing input.
#[must_use]
pub fn compact(signing_input: &str, encoded_signature: &str) -> String {
    format!("{}.{}", signing_input, encoded_signature)
}

/// Appends raw signature bytes to a signing input.
#[must_use]
pub fn compact_with_signature(signing_input: &str, signature: &[u8]) -> String {
    compact(signing_input, &URL_SAFE_NO_PAD.encode(signature))
}

/// A compact token split into its decoded parts.
#[derive(Debug)]
pub struct DecodedJws<'a> {
    pub header: JwsHeader,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    /// The `header.payload` prefix the signature covers.
    pub signing_input: &'a str,
}

/// Splits and decodes a compact token.
///
/// # Errors
///
/// Returns [`SignerError::Verification`] unless the token has exactly three
/// base64url segments and a parseable header.
pub fn decode(token: &str) -> Result<DecodedJws<'_>, Report<SignerError>> {
    let malformed = |message: &str| {
        Report::new(SignerError::Verification {
            message: message.to_string(),
        })
    };

    let (signing_input, signature_b64) = token
        .rsplit_once('.')
        .ok_or_else(|| malformed("token must have three segments"))?;
    let (header_b64, payload_b64) = signing_input
        .split_once('.')
        .ok_or_else(|| malformed("token must have three segments"))?;
    if payload_b64.contains('.') {
        return Err(malformed("token must have three segments"));
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| malformed("invalid header encoding"))?;
    let header: JwsHeader =
        serde_json::from_slice(&header_bytes).map_err(|_| malformed("invalid header"))?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| malformed("invalid payload encoding"))?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| malformed("invalid signature encoding"))?;

    Ok(DecodedJws {
        header,
        payload,
        signature,
        signing_input,
    })
}

/// Public keys able to verify tokens issued by a signer.
#[derive(Debug, Clone)]
pub struct KeySet {
    jwks: JwkSet,
}

impl KeySet {
    #[must_use]
    pub fn new(jwks: JwkSet) -> Self {
        Self { jwks }
    }

    #[must_use]
    pub fn jwks(&self) -> &JwkSet {
        &self.jwks
    }

    /// Verifies a compact token and returns its payload.
    ///
    /// Only keys whose `kid` matches the header are tried; a header without `kid`
    /// tries every key in the set.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Verification`] if the token is malformed or no key in
    /// the set verifies it.
    pub fn verify(&self, token: &str) -> Result<Vec<u8>, Report<SignerError>> {
        let decoded = decode(token)?;
        let kid = decoded.header.kid.as_deref();

        let candidates = self
            .jwks
            .keys
            .iter()
            .filter(|jwk| kid.is_none() || jwk.prm.kid.as_deref() == kid);

        for jwk in candidates {
            let public_key = match PublicKey::from_jwk(jwk) {
                Ok(key) => key,
                Err(e) => {
                    log::debug!("skipping JWK {:?}: {:?}", jwk.prm.kid, e);
                    continue;
                }
            };
            if public_key
                .verify(
                    decoded.header.alg,
                    decoded.signing_input.as_bytes(),
                    &decoded.signature,
                )
                .is_ok()
            {
                return Ok(decoded.payload);
            }
        }

        Err(Report::new(SignerError::Verification {
            message: "failed to verify id token signature".into(),
        }))
    }
}
