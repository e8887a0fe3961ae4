//! `credentials` crate — encrypted secret storage and typed authentication.
//!
//! Payloads are encrypted at rest with AES-256-CBC (random per-record IV,
//! PKCS#7 padding) and validated against declared credential-type schemas.
//! Decrypted payloads exist only inside an execution scope and are sanitized
//! before they cross into one.

pub mod auth;
pub mod crypto;
pub mod error;
pub mod sanitize;
pub mod store;
pub mod types;

pub use auth::RequestDescriptor;
pub use crypto::Cipher;
pub use error::CredentialError;
pub use sanitize::sanitize;
pub use store::{CredentialStore, DecryptedCredential};
pub use types::{CredentialProperty, CredentialTypeDefinition, CredentialTypeRegistry, TestOutcome};
