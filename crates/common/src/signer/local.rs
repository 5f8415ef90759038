//! Signer backed by private keys held in a [`KeyStore`].
//!
//! Reads go through a [`KeyCache`] so the store is only consulted once the bundle's
//! rotation deadline has passed. Rotation writes straight to the store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use error_stack::{Report, ResultExt};
use jose_jwk::JwkSet;
use rand::{rngs::OsRng, RngCore};

use crate::error::SignerError;
use crate::storage::{system_clock, Clock, KeyCache, KeyStore, Keys, SigningKey, VerificationKey};

use super::algorithm::{hash_for_algorithm, Hasher, KeyFamily};
use super::jwks::{public_only, PrivateKey};
use super::jws::{compact_with_signature, signing_input, JwsHeader};
use super::{Signer, SigningKeyResponse};

/// How often keys are replaced and how long replaced keys stay published.
#[derive(Debug, Clone, Copy)]
pub struct RotationStrategy {
    pub family: KeyFamily,
    /// Time between rotations.
    pub rotation_period: Duration,
    /// How long a replaced public key keeps verifying tokens.
    pub verification_key_ttl: Duration,
}

impl Default for RotationStrategy {
    fn default() -> Self {
        Self {
            family: KeyFamily::Rsa2048,
            rotation_period: Duration::hours(6),
            verification_key_ttl: Duration::hours(24),
        }
    }
}

/// Configuration for a [`LocalSigner`].
pub struct LocalConfig {
    pub store: Arc<dyn KeyStore>,
    /// Overrides the wall clock, mostly for tests.
    pub now: Option<Clock>,
    pub strategy: RotationStrategy,
}

impl LocalConfig {
    #[must_use]
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            now: None,
            strategy: RotationStrategy::default(),
        }
    }

    #[must_use]
    pub fn open(self) -> Box<dyn Signer> {
        let now = self.now.unwrap_or_else(system_clock);
        Box::new(LocalSigner::new(self.store, now, self.strategy))
    }
}

pub struct LocalSigner {
    cache: KeyCache,
    now: Clock,
    strategy: RotationStrategy,
}

impl LocalSigner {
    #[must_use]
    pub fn new(store: Arc<dyn KeyStore>, now: Clock, strategy: RotationStrategy) -> Self {
        Self {
            cache: KeyCache::new(store, now.clone()),
            now,
            strategy,
        }
    }

    async fn active_key(&self) -> Result<SigningKey, Report<SignerError>> {
        self.cache
            .get_keys()
            .await?
            .signing_key
            .ok_or_else(|| Report::new(SignerError::NoUsableKey))
    }
}

/// Random 20 byte hex key id.
fn new_key_id() -> String {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[async_trait]
impl Signer for LocalSigner {
    async fn signing_keys(&self) -> Result<SigningKeyResponse, Report<SignerError>> {
        let keys = self.cache.get_keys().await?;
        let active = keys
            .signing_key_pub
            .ok_or_else(|| Report::new(SignerError::NoUsableKey))?;
        if !public_only(&active) {
            return Err(Report::new(SignerError::Signing {
                message: "refusing to publish private key material".into(),
            }));
        }

        let mut jwks = Vec::with_capacity(1 + keys.verification_keys.len());
        jwks.push(active);
        jwks.extend(keys.verification_keys.into_iter().map(|k| k.public_key));

        Ok(SigningKeyResponse {
            jwks: JwkSet { keys: jwks },
            next_rotation: keys.next_rotation,
        })
    }

    async fn sign(&self, payload: &[u8]) -> Result<String, Report<SignerError>> {
        let signing_key = self.active_key().await?;
        let header = JwsHeader::new(signing_key.key.signature_algorithm(), signing_key.kid);
        let input = signing_input(&header, payload)?;
        let signature = signing_key.key.sign(input.as_bytes())?;
        Ok(compact_with_signature(&input, &signature))
    }

    async fn hasher(&self) -> Result<Hasher, Report<SignerError>> {
        let signing_key = self.active_key().await?;
        Ok(hash_for_algorithm(signing_key.key.signature_algorithm()))
    }

    async fn rotate_key(&self) -> Result<(), Report<SignerError>> {
        let now = (self.now)();

        let current = self.cache.get_keys().await?;
        if current.next_rotation.is_some_and(|next| now < next) {
            return Err(Report::new(SignerError::RotationRaced));
        }

        let kid = new_key_id();
        let family = self.strategy.family;
        // RSA generation is CPU bound; keep it off the async workers.
        let key = tokio::task::spawn_blocking(move || PrivateKey::generate(family))
            .await
            .change_context(SignerError::Signing {
                message: "key generation task failed".into(),
            })??;
        let public_jwk = key
            .public_key()
            .to_jwk(kid.clone(), key.signature_algorithm());
        let strategy = self.strategy;
        // The updater only proceeds once the stored deadline has passed, so this never
        // moves it backwards.
        let next_rotation = now + strategy.rotation_period;

        log::info!("rotating keys: new signing key {}", kid);

        self.cache
            .update_keys(Box::new(move |mut keys: Keys| {
                // Another instance may have rotated since the check above.
                if keys.next_rotation.is_some_and(|next| now < next) {
                    return Err(Report::new(SignerError::RotationRaced));
                }

                keys.verification_keys.retain(|k| k.expiry >= now);

                if let Some(previous) = keys.signing_key_pub.take() {
                    keys.verification_keys.push(VerificationKey {
                        public_key: previous,
                        expiry: now + strategy.verification_key_ttl,
                    });
                }

                keys.signing_key = Some(SigningKey { kid, key });
                keys.signing_key_pub = Some(public_jwk);
                keys.next_rotation = Some(next_rotation);

                Ok(keys)
            }))
            .await?;

        log::info!(
            "keys rotated, next rotation at {}",
            next_rotation.to_rfc3339()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::algorithm::SignatureAlgorithm;
    use crate::signer::jws::decode;
    use crate::storage::MemoryKeyStore;
    use crate::test_support::tests::{CountingKeyStore, TestClock};

    fn fast_strategy() -> RotationStrategy {
        RotationStrategy {
            family: KeyFamily::Ed25519,
            ..RotationStrategy::default()
        }
    }

    fn seeded_rsa_store(clock: &TestClock) -> Arc<MemoryKeyStore> {
        let key = PrivateKey::generate(KeyFamily::Rsa2048).expect("should generate RSA key");
        let public_jwk = key.public_key().to_jwk("seed", SignatureAlgorithm::Rs256);
        Arc::new(MemoryKeyStore::with_keys(Keys {
            signing_key: Some(SigningKey {
                kid: "seed".into(),
                key,
            }),
            signing_key_pub: Some(public_jwk),
            verification_keys: Vec::new(),
            next_rotation: Some(clock.now() + Duration::hours(1)),
        }))
    }

    fn kids(response: &SigningKeyResponse) -> Vec<String> {
        response
            .jwks
            .keys
            .iter()
            .map(|jwk| jwk.prm.kid.clone().unwrap_or_default())
            .collect()
    }

    #[tokio::test]
    async fn test_sign_and_verify_with_rsa_bundle() {
        let clock = TestClock::new();
        let signer = LocalSigner::new(
            seeded_rsa_store(&clock),
            clock.clock(),
            RotationStrategy::default(),
        );

        let token = signer.sign(b"hello world").await.expect("should sign");
        let key_set = signer.key_set().await.expect("should build key set");
        let payload = key_set.verify(&token).expect("token should verify");
        assert_eq!(payload, b"hello world");

        let decoded = decode(&token).expect("should decode");
        assert_eq!(decoded.header.alg, SignatureAlgorithm::Rs256);
        assert_eq!(decoded.header.kid.as_deref(), Some("seed"));

        let sig_start = token.rfind('.').expect("has signature") + 1;
        let mut tampered = token.into_bytes();
        let pos = sig_start + 10;
        tampered[pos] = if tampered[pos] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).expect("still ascii");
        assert!(key_set.verify(&tampered).is_err());
    }

    #[tokio::test]
    async fn test_hasher_follows_active_key() {
        let clock = TestClock::new();
        let signer = LocalSigner::new(
            seeded_rsa_store(&clock),
            clock.clock(),
            RotationStrategy::default(),
        );

        let hasher = signer.hasher().await.expect("should resolve hasher");
        assert_eq!(hasher.output_size(), 32);
    }

    #[tokio::test]
    async fn test_empty_store_has_no_usable_key() {
        let clock = TestClock::new();
        let signer = LocalSigner::new(
            Arc::new(MemoryKeyStore::new()),
            clock.clock(),
            fast_strategy(),
        );

        let err = signer.signing_keys().await.expect_err("no keys yet");
        assert!(matches!(err.current_context(), SignerError::NoUsableKey));
        let err = signer.sign(b"x").await.expect_err("no keys yet");
        assert!(matches!(err.current_context(), SignerError::NoUsableKey));
    }

    #[tokio::test]
    async fn test_rotation_lifecycle() {
        let clock = TestClock::new();
        let t0 = clock.now();
        let signer = LocalSigner::new(
            Arc::new(MemoryKeyStore::new()),
            clock.clock(),
            fast_strategy(),
        );

        signer.rotate_key().await.expect("cold store should rotate");
        let first = signer.signing_keys().await.expect("should have keys");
        assert_eq!(first.jwks.keys.len(), 1);
        assert_eq!(first.next_rotation, Some(t0 + Duration::hours(6)));
        let first_kid = kids(&first)[0].clone();
        assert_eq!(first_kid.len(), 40);

        let err = signer.rotate_key().await.expect_err("not due yet");
        assert!(matches!(err.current_context(), SignerError::RotationRaced));

        clock.advance(Duration::hours(7));
        signer.rotate_key().await.expect("due again");
        let second = signer.signing_keys().await.expect("should have keys");
        let second_kids = kids(&second);
        assert_eq!(second_kids.len(), 2);
        assert_ne!(second_kids[0], first_kid);
        assert_eq!(
            second_kids[1], first_kid,
            "previous key kept for verification"
        );
        assert!(second.next_rotation > first.next_rotation);

        // Past the first key's verification ttl it is dropped on the next rotation.
        clock.advance(Duration::hours(25));
        signer.rotate_key().await.expect("due again");
        let third = signer.signing_keys().await.expect("should have keys");
        let third_kids = kids(&third);
        assert_eq!(third_kids.len(), 2);
        assert!(!third_kids.contains(&first_kid));
        assert_eq!(third_kids[1], second_kids[0]);
        assert!(third.next_rotation > second.next_rotation);
    }

    #[tokio::test]
    async fn test_tokens_survive_one_rotation() {
        let clock = TestClock::new();
        let signer = LocalSigner::new(
            Arc::new(MemoryKeyStore::new()),
            clock.clock(),
            fast_strategy(),
        );

        signer.rotate_key().await.expect("should rotate");
        let token = signer.sign(b"payload").await.expect("should sign");

        clock.advance(Duration::hours(7));
        signer.rotate_key().await.expect("should rotate");

        let key_set = signer.key_set().await.expect("should build key set");
        let payload = key_set.verify(&token).expect("old token verifies");
        assert_eq!(payload, b"payload");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_rsa_generation_leaves_runtime_responsive() {
        let clock = TestClock::new();
        let signer = Arc::new(LocalSigner::new(
            Arc::new(MemoryKeyStore::new()),
            clock.clock(),
            RotationStrategy {
                family: KeyFamily::Rsa2048,
                ..RotationStrategy::default()
            },
        ));

        let rotating = Arc::clone(&signer);
        let rotation = tokio::spawn(async move { rotating.rotate_key().await });

        // On a single worker this loop only gets polled while key generation runs elsewhere.
        let mut polls = 0;
        while !rotation.is_finished() {
            polls += 1;
            tokio::task::yield_now().await;
        }
        rotation
            .await
            .expect("rotation task should not panic")
            .expect("should rotate");

        assert!(polls > 1, "runtime stalled during key generation");
        let hasher = signer.hasher().await.expect("should resolve hasher");
        assert_eq!(hasher.output_size(), 32);
    }

    #[tokio::test]
    async fn test_second_instance_races() {
        let clock = TestClock::new();
        let store = Arc::new(MemoryKeyStore::new());
        let counting = Arc::new(CountingKeyStore::new(store.clone()));
        let a = LocalSigner::new(store.clone(), clock.clock(), fast_strategy());
        let b = LocalSigner::new(counting.clone(), clock.clock(), fast_strategy());

        a.rotate_key().await.expect("first instance rotates");
        let err = b.rotate_key().await.expect_err("second instance loses");
        assert!(matches!(err.current_context(), SignerError::RotationRaced));
        assert_eq!(counting.get_calls(), 1);

        let a_keys = a.signing_keys().await.expect("keys");
        let b_keys = b.signing_keys().await.expect("keys");
        assert_eq!(kids(&a_keys), kids(&b_keys));
    }

    #[tokio::test]
    async fn test_rotation_sees_writes_from_other_writers() {
        let clock = TestClock::new();
        let store = Arc::new(MemoryKeyStore::new());
        let signer = LocalSigner::new(store.clone(), clock.clock(), fast_strategy());

        // Warm the cache with the empty bundle, then let another writer rotate.
        assert!(signer.signing_keys().await.is_err(), "empty store");
        let next = clock.now() + Duration::hours(1);
        store
            .update_keys(Box::new(move |mut keys| {
                keys.next_rotation = Some(next);
                Ok(keys)
            }))
            .await
            .expect("should update");

        let err = signer.rotate_key().await.expect_err("should race");
        assert!(matches!(err.current_context(), SignerError::RotationRaced));
        let stored = store.get_keys().await.expect("read");
        assert!(stored.signing_key.is_none());
        assert_eq!(stored.next_rotation, Some(next));
    }
}
