//! Key material and JSON Web Key conversion.
//!
//! [`PrivateKey`] holds in-process signing keys for the local backend, [`PublicKey`]
//! is the common public half used to publish JWKS documents and to verify tokens.

use std::fmt;

use base64::{engine::general_purpose, Engine};
use ed25519_dalek::Verifier as _;
use error_stack::Report;
use jose_jwk::{
    jose_jwa::Algorithm, Class, Ec, EcCurves, Jwk, Key, Okp, OkpCurves, Parameters, Rsa,
};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use pkcs8::DecodePublicKey;
use rand::rngs::OsRng;
use rsa::signature::{SignatureEncoding, Signer as RawSigner};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};

use crate::error::SignerError;

use super::algorithm::{signature_algorithm, KeyFamily, SignatureAlgorithm};

fn signing_error(message: impl fmt::Display) -> Report<SignerError> {
    Report::new(SignerError::Signing {
        message: message.to_string(),
    })
}

fn verification_error(message: impl fmt::Display) -> Report<SignerError> {
    Report::new(SignerError::Verification {
        message: message.to_string(),
    })
}

/// Private signing key held in-process.
#[derive(Clone)]
pub enum PrivateKey {
    Rsa(RsaPrivateKey),
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    P521(p521::SecretKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", self.signature_algorithm())
    }
}

impl PrivateKey {
    /// Generates a fresh key for `family`.
    ///
    /// # Errors
    ///
    /// Returns an error if RSA key generation fails.
    pub fn generate(family: KeyFamily) -> Result<Self, Report<SignerError>> {
        let mut csprng = OsRng;

        let key = match family {
            KeyFamily::Rsa2048 | KeyFamily::Rsa3072 | KeyFamily::Rsa4096 => {
                let bits = family.rsa_bits().unwrap_or(2048);
                let key = RsaPrivateKey::new(&mut csprng, bits).map_err(|e| {
                    signing_error(format!("Failed to generate RSA key: {}", e))
                })?;
                Self::Rsa(key)
            }
            KeyFamily::EcdsaP256 => Self::P256(p256::ecdsa::SigningKey::random(&mut csprng)),
            KeyFamily::EcdsaP384 => Self::P384(p384::ecdsa::SigningKey::random(&mut csprng)),
            KeyFamily::EcdsaP521 => Self::P521(p521::SecretKey::random(&mut csprng)),
            KeyFamily::Ed25519 => Self::Ed25519(ed25519_dalek::SigningKey::generate(&mut csprng)),
        };

        Ok(key)
    }

    /// Algorithm tokens signed by this key carry.
    ///
    /// Every RSA key signs RS256, independent of its size.
    #[must_use]
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        match self {
            Self::Rsa(_) => signature_algorithm(KeyFamily::Rsa2048),
            Self::P256(_) => signature_algorithm(KeyFamily::EcdsaP256),
            Self::P384(_) => signature_algorithm(KeyFamily::EcdsaP384),
            Self::P521(_) => signature_algorithm(KeyFamily::EcdsaP521),
            Self::Ed25519(_) => signature_algorithm(KeyFamily::Ed25519),
        }
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        match self {
            Self::Rsa(key) => PublicKey::Rsa(key.to_public_key()),
            Self::P256(key) => PublicKey::P256(p256::PublicKey::from(key.verifying_key())),
            Self::P384(key) => PublicKey::P384(p384::PublicKey::from(key.verifying_key())),
            Self::P521(key) => PublicKey::P521(key.public_key()),
            Self::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
        }
    }

    /// Produces the raw JWS signature over `message`.
    ///
    /// ECDSA signatures are the fixed-size `r || s` concatenation JWS requires.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Signing`] if the signing primitive fails.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Report<SignerError>> {
        match self {
            Self::Rsa(key) => {
                let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(key.clone());
                let signature = signing_key
                    .try_sign(message)
                    .map_err(|e| signing_error(format!("RSA signing failed: {}", e)))?;
                Ok(signature.to_vec())
            }
            Self::P256(key) => {
                let signature: p256::ecdsa::Signature = key
                    .try_sign(message)
                    .map_err(|e| signing_error(format!("P-256 signing failed: {}", e)))?;
                Ok(signature.to_bytes().to_vec())
            }
            Self::P384(key) => {
                let signature: p384::ecdsa::Signature = key
                    .try_sign(message)
                    .map_err(|e| signing_error(format!("P-384 signing failed: {}", e)))?;
                Ok(signature.to_bytes().to_vec())
            }
            Self::P521(key) => {
                let signing_key = p521::ecdsa::SigningKey::from_bytes(&key.to_bytes())
                    .map_err(|e| signing_error(format!("Invalid P-521 key: {}", e)))?;
                let signature: p521::ecdsa::Signature = signing_key
                    .try_sign(message)
                    .map_err(|e| signing_error(format!("P-521 signing failed: {}", e)))?;
                Ok(signature.to_bytes().to_vec())
            }
            Self::Ed25519(key) => {
                let signature = key
                    .try_sign(message)
                    .map_err(|e| signing_error(format!("Ed25519 signing failed: {}", e)))?;
                Ok(signature.to_bytes().to_vec())
            }
        }
    }
}

/// Public verification key.
#[derive(Clone, Debug)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    P256(p256::PublicKey),
    P384(p384::PublicKey),
    P521(p521::PublicKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    /// Decodes a public key as published by the transit engine.
    ///
    /// Ed25519 keys are standard base64 of the raw 32 bytes, every other family is a
    /// PEM encoded X.509 `SubjectPublicKeyInfo`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Verification`] if the encoding cannot be parsed.
    pub fn from_transit(family: KeyFamily, encoded: &str) -> Result<Self, Report<SignerError>> {
        let pem_error =
            |e: pkcs8::spki::Error| verification_error(format!("Invalid PEM key: {}", e));

        match family {
            KeyFamily::Ed25519 => {
                let bytes = general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| verification_error(format!("Invalid base64 key: {}", e)))?;
                Self::ed25519_from_bytes(&bytes)
            }
            KeyFamily::Rsa2048 | KeyFamily::Rsa3072 | KeyFamily::Rsa4096 => {
                RsaPublicKey::from_public_key_pem(encoded)
                    .map(Self::Rsa)
                    .map_err(pem_error)
            }
            KeyFamily::EcdsaP256 => p256::PublicKey::from_public_key_pem(encoded)
                .map(Self::P256)
                .map_err(pem_error),
            KeyFamily::EcdsaP384 => p384::PublicKey::from_public_key_pem(encoded)
                .map(Self::P384)
                .map_err(pem_error),
            KeyFamily::EcdsaP521 => p521::PublicKey::from_public_key_pem(encoded)
                .map(Self::P521)
                .map_err(pem_error),
        }
    }

    fn ed25519_from_bytes(bytes: &[u8]) -> Result<Self, Report<SignerError>> {
        let key_array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| verification_error("Public key must be 32 bytes"))?;
        ed25519_dalek::VerifyingKey::from_bytes(&key_array)
            .map(Self::Ed25519)
            .map_err(|e| verification_error(format!("Invalid Ed25519 key: {}", e)))
    }

    /// Builds the public JWK published for this key.
    #[must_use]
    pub fn to_jwk(&self, kid: impl Into<String>, alg: SignatureAlgorithm) -> Jwk {
        let key = match self {
            Self::Rsa(key) => Key::Rsa(Rsa {
                n: key.n().to_bytes_be().into(),
                e: key.e().to_bytes_be().into(),
                prv: None,
            }),
            Self::P256(key) => {
                let point = key.to_encoded_point(false);
                ec_key(EcCurves::P256, point.x(), point.y())
            }
            Self::P384(key) => {
                let point = key.to_encoded_point(false);
                ec_key(EcCurves::P384, point.x(), point.y())
            }
            Self::P521(key) => {
                let point = key.to_encoded_point(false);
                ec_key(EcCurves::P521, point.x(), point.y())
            }
            Self::Ed25519(key) => Key::Okp(Okp {
                crv: OkpCurves::Ed25519,
                x: key.as_bytes().to_vec().into(),
                d: None, // No private key in JWK (public only)
            }),
        };

        Jwk {
            key,
            prm: Parameters {
                kid: Some(kid.into()),
                alg: Some(Algorithm::Signing(alg.into())),
                cls: Some(Class::Signing),
                ..Default::default()
            },
        }
    }

    /// Reconstructs a public key from a JWK.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::UnsupportedAlgorithm`] for key types this subsystem does
    /// not sign with and [`SignerError::Verification`] for malformed key parameters.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, Report<SignerError>> {
        match &jwk.key {
            Key::Rsa(key) => {
                let n = BigUint::from_bytes_be(&key.n);
                let e = BigUint::from_bytes_be(&key.e);
                RsaPublicKey::new(n, e)
                    .map(Self::Rsa)
                    .map_err(|e| verification_error(format!("Invalid RSA key: {}", e)))
            }
            Key::Ec(key) => {
                let x: &[u8] = &key.x;
                let y: &[u8] = &key.y;
                let mut sec1 = Vec::with_capacity(1 + x.len() + y.len());
                sec1.push(0x04);
                sec1.extend_from_slice(x);
                sec1.extend_from_slice(y);

                let sec1_error = |e: p256::elliptic_curve::Error| {
                    verification_error(format!("Invalid EC point: {}", e))
                };
                match key.crv {
                    EcCurves::P256 => p256::PublicKey::from_sec1_bytes(&sec1)
                        .map(Self::P256)
                        .map_err(sec1_error),
                    EcCurves::P384 => p384::PublicKey::from_sec1_bytes(&sec1)
                        .map(Self::P384)
                        .map_err(sec1_error),
                    EcCurves::P521 => p521::PublicKey::from_sec1_bytes(&sec1)
                        .map(Self::P521)
                        .map_err(sec1_error),
                    _ => Err(Report::new(SignerError::unsupported(
                        "unsupported ecdsa curve",
                    ))),
                }
            }
            Key::Okp(key) if key.crv == OkpCurves::Ed25519 => Self::ed25519_from_bytes(&key.x),
            _ => Err(Report::new(SignerError::unsupported(
                "unsupported JWK key type",
            ))),
        }
    }

    /// Verifies a raw JWS signature made with `alg`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Verification`] if the signature does not match or `alg`
    /// does not fit this key type.
    pub fn verify(
        &self,
        alg: SignatureAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Report<SignerError>> {
        let mismatch = || verification_error("signature verification failed");

        match (self, alg) {
            (Self::Rsa(key), SignatureAlgorithm::Rs256) => {
                let sig = rsa::pkcs1v15::Signature::try_from(signature).map_err(|_| mismatch())?;
                rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key.clone())
                    .verify(message, &sig)
                    .map_err(|_| mismatch())
            }
            (Self::Rsa(key), SignatureAlgorithm::Rs384) => {
                let sig = rsa::pkcs1v15::Signature::try_from(signature).map_err(|_| mismatch())?;
                rsa::pkcs1v15::VerifyingKey::<Sha384>::new(key.clone())
                    .verify(message, &sig)
                    .map_err(|_| mismatch())
            }
            (Self::Rsa(key), SignatureAlgorithm::Rs512) => {
                let sig = rsa::pkcs1v15::Signature::try_from(signature).map_err(|_| mismatch())?;
                rsa::pkcs1v15::VerifyingKey::<Sha512>::new(key.clone())
                    .verify(message, &sig)
                    .map_err(|_| mismatch())
            }
            (Self::P256(key), SignatureAlgorithm::Es256) => {
                let sig = p256::ecdsa::Signature::from_slice(signature).map_err(|_| mismatch())?;
                p256::ecdsa::VerifyingKey::from(key)
                    .verify(message, &sig)
                    .map_err(|_| mismatch())
            }
            (Self::P384(key), SignatureAlgorithm::Es384) => {
                let sig = p384::ecdsa::Signature::from_slice(signature).map_err(|_| mismatch())?;
                p384::ecdsa::VerifyingKey::from(key)
                    .verify(message, &sig)
                    .map_err(|_| mismatch())
            }
            (Self::P521(key), SignatureAlgorithm::Es512) => {
                let sig = p521::ecdsa::Signature::from_slice(signature).map_err(|_| mismatch())?;
                let point = key.to_encoded_point(false);
                p521::ecdsa::VerifyingKey::from_sec1_bytes(point.as_bytes())
                    .map_err(|_| mismatch())?
                    .verify(message, &sig)
                    .map_err(|_| mismatch())
            }
            (Self::Ed25519(key), SignatureAlgorithm::EdDsa) => {
                let sig = ed25519_dalek::Signature::from_slice(signature).map_err(|_| mismatch())?;
                key.verify(message, &sig).map_err(|_| mismatch())
            }
            (_, alg) => Err(verification_error(format!(
                "algorithm {} does not match key type",
                alg
            ))),
        }
    }
}

fn ec_key<X: AsRef<[u8]>>(crv: EcCurves, x: Option<&X>, y: Option<&X>) -> Key {
    Key::Ec(Ec {
        crv,
        x: x.map(|x| x.as_ref().to_vec()).unwrap_or_default().into(),
        y: y.map(|y| y.as_ref().to_vec()).unwrap_or_default().into(),
        d: None,
    })
}

/// Returns true when `jwk` carries no private key components.
#[must_use]
pub fn public_only(jwk: &Jwk) -> bool {
    match &jwk.key {
        Key::Rsa(key) => key.prv.is_none(),
        Key::Ec(key) => key.d.is_none(),
        Key::Okp(key) => key.d.is_none(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(family: KeyFamily) {
        let private = PrivateKey::generate(family).expect("should generate key");
        let alg = private.signature_algorithm();
        let jwk = private.public_key().to_jwk("test-kid", alg);

        assert_eq!(jwk.prm.kid, Some("test-kid".to_string()));
        assert_eq!(jwk.prm.alg, Some(Algorithm::Signing(alg.into())));
        assert!(public_only(&jwk));

        let message = b"test message";
        let signature = private.sign(message).expect("should sign");
        let public = PublicKey::from_jwk(&jwk).expect("JWK should decode");
        assert!(public.verify(alg, message, &signature).is_ok());
        assert!(public.verify(alg, b"other message", &signature).is_err());
    }

    #[test]
    fn test_rsa_sign_and_verify_through_jwk() {
        round_trip(KeyFamily::Rsa2048);
    }

    #[test]
    fn test_ecdsa_sign_and_verify_through_jwk() {
        round_trip(KeyFamily::EcdsaP256);
        round_trip(KeyFamily::EcdsaP384);
        round_trip(KeyFamily::EcdsaP521);
    }

    #[test]
    fn test_ed25519_sign_and_verify_through_jwk() {
        round_trip(KeyFamily::Ed25519);
    }

    #[test]
    fn test_ecdsa_signatures_are_fixed_size() {
        let cases = [
            (KeyFamily::EcdsaP256, 64),
            (KeyFamily::EcdsaP384, 96),
            (KeyFamily::EcdsaP521, 132),
            (KeyFamily::Ed25519, 64),
        ];
        for (family, len) in cases {
            let key = PrivateKey::generate(family).expect("should generate key");
            let signature = key.sign(b"payload").expect("should sign");
            assert_eq!(signature.len(), len, "signature length for {family}");
        }
    }

    #[test]
    fn test_create_jwk_from_ed25519_key() {
        let key = PrivateKey::generate(KeyFamily::Ed25519).expect("should generate key");
        let jwk = key.public_key().to_jwk("ed-kid", SignatureAlgorithm::EdDsa);

        match jwk.key {
            Key::Okp(okp) => {
                assert_eq!(okp.crv, OkpCurves::Ed25519);
                assert_eq!(okp.x.len(), 32); // Ed25519 public keys are 32 bytes
                assert!(okp.d.is_none()); // No private key component
            }
            _ => panic!("Expected OKP key type"),
        }
        assert_eq!(jwk.prm.cls, Some(Class::Signing));
    }

    #[test]
    fn test_algorithm_mismatch_is_rejected() {
        let key = PrivateKey::generate(KeyFamily::EcdsaP256).expect("should generate key");
        let signature = key.sign(b"payload").expect("should sign");
        let err = key
            .public_key()
            .verify(SignatureAlgorithm::Es384, b"payload", &signature)
            .expect_err("ES384 should not verify with a P-256 key");
        assert!(matches!(
            err.current_context(),
            SignerError::Verification { .. }
        ));
    }

    #[test]
    fn test_transit_ed25519_decoding() {
        let key = PrivateKey::generate(KeyFamily::Ed25519).expect("should generate key");
        let PublicKey::Ed25519(verifying) = key.public_key() else {
            panic!("Expected Ed25519 public key");
        };
        let encoded = general_purpose::STANDARD.encode(verifying.as_bytes());

        let decoded = PublicKey::from_transit(KeyFamily::Ed25519, &encoded).expect("should decode");
        assert!(matches!(decoded, PublicKey::Ed25519(k) if k == verifying));

        let not_base64 = PublicKey::from_transit(KeyFamily::Ed25519, "not-base64!!");
        assert!(not_base64.is_err());
        assert!(PublicKey::from_transit(KeyFamily::Ed25519, "AAAA").is_err());
    }

    #[test]
    fn test_transit_pem_decoding() {
        use pkcs8::{EncodePublicKey, LineEnding};

        let key = PrivateKey::generate(KeyFamily::EcdsaP256).expect("should generate key");
        let PublicKey::P256(public) = key.public_key() else {
            panic!("Expected P-256 public key");
        };
        let pem = public
            .to_public_key_pem(LineEnding::LF)
            .expect("should encode PEM");

        let decoded = PublicKey::from_transit(KeyFamily::EcdsaP256, &pem).expect("should decode");
        assert!(matches!(decoded, PublicKey::P256(k) if k == public));
        assert!(PublicKey::from_transit(KeyFamily::Rsa2048, &pem).is_err());
        let garbage = PublicKey::from_transit(KeyFamily::EcdsaP256, "garbage");
        assert!(garbage.is_err());
    }
}
