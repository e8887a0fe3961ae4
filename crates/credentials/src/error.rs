//! Credential-store error types.

use thiserror::Error;

/// Errors produced by the credential store and its cipher.
///
/// Messages never carry payload plaintext or key material.
#[derive(Debug, Error)]
pub enum CredentialError {
    // ------ Cipher errors ------

    /// The configured encryption key is not 64 hex characters (32 bytes).
    #[error("encryption key must be 64 hex characters (32 bytes)")]
    BadKey,

    /// The stored ciphertext does not match `HEX(IV):HEX(ciphertext)` or
    /// fails to decrypt into a JSON object.
    #[error("ciphertext is malformed or was encrypted under a different key")]
    BadCiphertext,

    // ------ Store errors ------

    /// The referenced credential type is not registered.
    #[error("unknown credential type '{0}'")]
    UnknownCredentialType(String),

    /// The payload does not satisfy the type's property schema.
    #[error("credential validation failed: {0}")]
    ValidationFailed(String),

    /// The owner already has a credential with this name.
    #[error("a credential with this name already exists")]
    DuplicateName,

    /// The credential is past its `expires_at`.
    #[error("credential has expired")]
    Expired,

    /// The caller does not own the credential.
    #[error("operation requires credential ownership")]
    NotOwner,

    /// No credential with the given id exists.
    #[error("credential not found")]
    NotFound,

    /// `apply_authentication` was asked for a type with no auth policy.
    #[error("no authentication policy for credential type '{0}'")]
    UnsupportedAuthType(String),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
