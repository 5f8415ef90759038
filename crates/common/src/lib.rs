//! Token signing for an OIDC provider.
//!
//! Two interchangeable backends implement [`signer::Signer`]: a local signer that keeps
//! private keys in a [`storage::KeyStore`] and rotates them itself, and a remote signer
//! that asks a transit engine for raw signatures so private keys never enter the
//! process.
//!
//! # Modules
//!
//! - [`constants`]: Environment variable names and configuration defaults
//! - [`error`]: Error types and error handling utilities
//! - [`rotation`]: Background key rotation driver
//! - [`settings`]: Configuration management and validation
//! - [`signer`]: Signer contract, algorithm resolution, JWK and JWS handling
//! - [`storage`]: Key store contract, in-memory store and the time-gated key cache
//! - [`test_support`]: Testing utilities and fakes
//! - [`transit`]: Transit engine contract and its HTTP client

pub mod constants;
pub mod error;
pub mod rotation;
pub mod settings;
pub mod signer;
pub mod storage;
pub mod transit;
