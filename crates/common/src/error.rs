//! Error types for the signing subsystem.
//!
//! All fallible operations return `Result<T, Report<SignerError>>`. Callers that need
//! to branch on an outcome (for example the rotation sentinels) inspect
//! [`Report::current_context`](error_stack::Report::current_context).

use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum SignerError {
    /// The backend has no rotation concept. Not fatal, stops periodic rotation.
    #[display("key rotation not supported")]
    RotationUnsupported,

    /// Another instance rotated first, or the current keys are not due yet.
    #[display("keys already rotated by another server instance")]
    RotationRaced,

    /// Store or transit engine I/O failure.
    #[display("Backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// A fetch succeeded but produced no public signing key.
    #[display("no usable signing key found")]
    NoUsableKey,

    /// Unrecognised key family or signature algorithm.
    #[display("unsupported algorithm: {name}")]
    UnsupportedAlgorithm { name: String },

    /// The transit engine answered without a signature component.
    #[display("Malformed remote signature: {message}")]
    MalformedRemoteSignature { message: String },

    #[display("Configuration error: {message}")]
    Configuration { message: String },

    #[display("Signing error: {message}")]
    Signing { message: String },

    #[display("Verification error: {message}")]
    Verification { message: String },
}

impl SignerError {
    pub(crate) fn unsupported(name: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm { name: name.into() }
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    /// Returns true for the non-fatal rotation outcomes.
    #[must_use]
    pub fn is_rotation_sentinel(&self) -> bool {
        matches!(self, Self::RotationUnsupported | Self::RotationRaced)
    }
}
