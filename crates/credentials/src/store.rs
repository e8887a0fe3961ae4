//! The credential store — CRUD, sharing, rotation, and scoped decryption.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use db::models::{CredentialRecord, CredentialShareRecord, SharePermission, ShareSubject};
use db::{DbError, Repository};

use crate::crypto::Cipher;
use crate::sanitize::sanitize_map;
use crate::types::{CredentialTypeRegistry, TestOutcome};
use crate::CredentialError;

/// Rotation pushes expiry out by this many days.
const ROTATION_VALIDITY_DAYS: i64 = 90;

/// A decrypted credential scoped to one consumer.
///
/// The payload lives only as long as this value; callers must not capture it
/// in long-lived closures or hand it to the event bus or logger.
#[derive(Debug, Clone)]
pub struct DecryptedCredential {
    pub id: Uuid,
    pub name: String,
    pub credential_type: String,
    pub payload: Map<String, Value>,
}

/// Fields that may change on [`CredentialStore::update`].
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    pub name: Option<String>,
    pub payload: Option<Map<String, Value>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Symmetric-encrypted storage of secrets with per-type validation.
pub struct CredentialStore {
    repository: Arc<dyn Repository>,
    registry: Arc<CredentialTypeRegistry>,
    cipher: Cipher,
}

impl CredentialStore {
    pub fn new(
        repository: Arc<dyn Repository>,
        registry: Arc<CredentialTypeRegistry>,
        cipher: Cipher,
    ) -> Self {
        Self {
            repository,
            registry,
            cipher,
        }
    }

    pub fn registry(&self) -> Arc<CredentialTypeRegistry> {
        self.registry.clone()
    }

    /// Validate, encrypt, and persist a new credential.
    ///
    /// # Errors
    /// `UnknownCredentialType`, `ValidationFailed`, or `DuplicateName`.
    pub async fn create(
        &self,
        user_id: Uuid,
        name: &str,
        credential_type: &str,
        payload: Map<String, Value>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CredentialRecord, CredentialError> {
        let definition = self.registry.resolve(credential_type)?;
        definition.validate(&payload)?;

        let now = Utc::now();
        let record = CredentialRecord {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_owned(),
            credential_type: credential_type.to_owned(),
            ciphertext: self.cipher.encrypt(&payload),
            expires_at,
            created_at: now,
            updated_at: now,
        };

        let record = self
            .repository
            .insert_credential(record)
            .await
            .map_err(duplicate_or_db)?;
        info!(credential_id = %record.id, credential_type, "credential created");
        Ok(record)
    }

    /// Decrypt a credential for `user_id`.
    ///
    /// Returns `None` when the credential does not exist or neither ownership
    /// nor a share grants access.  Fails with [`CredentialError::Expired`]
    /// when the credential is past its `expires_at`.
    pub async fn get(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<DecryptedCredential>, CredentialError> {
        let Some(record) = self.repository.find_credential_by_id(id).await? else {
            return Ok(None);
        };

        if record.user_id != user_id && !self.has_share(id, user_id).await? {
            debug!(credential_id = %id, "credential access denied");
            return Ok(None);
        }
        if record.expires_at.is_some_and(|at| at <= Utc::now()) {
            return Err(CredentialError::Expired);
        }

        let payload = self.cipher.decrypt(&record.ciphertext)?;
        Ok(Some(DecryptedCredential {
            id: record.id,
            name: record.name,
            credential_type: record.credential_type,
            payload,
        }))
    }

    /// Decrypt and sanitize a credential for injection into an execution
    /// scope.  Same access rules as [`CredentialStore::get`].
    pub async fn get_for_execution(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<DecryptedCredential>, CredentialError> {
        Ok(self.get(id, user_id).await?.map(|mut credential| {
            credential.payload = sanitize_map(&credential.payload);
            credential
        }))
    }

    /// Update name, payload, or expiry.  Owner only; a new payload is
    /// re-validated against the type schema.
    pub async fn update(
        &self,
        id: Uuid,
        user_id: Uuid,
        update: CredentialUpdate,
    ) -> Result<(), CredentialError> {
        let mut record = self.owned_record(id, user_id).await?;

        if let Some(payload) = update.payload {
            let definition = self.registry.resolve(&record.credential_type)?;
            definition.validate(&payload)?;
            record.ciphertext = self.cipher.encrypt(&payload);
        }
        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(expires_at) = update.expires_at {
            record.expires_at = Some(expires_at);
        }
        record.updated_at = Utc::now();

        self.repository
            .update_credential(record)
            .await
            .map_err(duplicate_or_db)?;
        Ok(())
    }

    /// Delete a credential.  Owner only.
    pub async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<(), CredentialError> {
        self.owned_record(id, user_id).await?;
        self.repository.delete_credential(id).await?;
        info!(credential_id = %id, "credential deleted");
        Ok(())
    }

    /// Replace the payload and extend expiry by the rotation window.
    /// Owner only; the new payload is re-validated.
    pub async fn rotate(
        &self,
        id: Uuid,
        user_id: Uuid,
        new_payload: Map<String, Value>,
    ) -> Result<(), CredentialError> {
        let mut record = self.owned_record(id, user_id).await?;

        let definition = self.registry.resolve(&record.credential_type)?;
        definition.validate(&new_payload)?;

        let now = Utc::now();
        record.ciphertext = self.cipher.encrypt(&new_payload);
        record.expires_at = Some(now + Duration::days(ROTATION_VALIDITY_DAYS));
        record.updated_at = now;

        self.repository.update_credential(record).await?;
        info!(credential_id = %id, "credential rotated");
        Ok(())
    }

    /// Run the type's test hook against an (unpersisted) payload.
    ///
    /// Types without a hook fall back to schema validation.
    pub fn test(
        &self,
        credential_type: &str,
        payload: &Map<String, Value>,
    ) -> Result<TestOutcome, CredentialError> {
        let definition = self.registry.resolve(credential_type)?;
        if let Some(hook) = definition.test {
            return Ok(hook(payload));
        }
        Ok(match definition.validate(payload) {
            Ok(()) => TestOutcome {
                success: true,
                message: "Credential format is valid".into(),
            },
            Err(e) => TestOutcome {
                success: false,
                message: e.to_string(),
            },
        })
    }

    /// Grant `subject` access at `permission` level.  Owner only.
    pub async fn share(
        &self,
        id: Uuid,
        user_id: Uuid,
        subject: ShareSubject,
        permission: SharePermission,
    ) -> Result<(), CredentialError> {
        self.owned_record(id, user_id).await?;
        self.repository
            .insert_share(CredentialShareRecord {
                credential_id: id,
                subject,
                permission,
            })
            .await?;
        Ok(())
    }

    /// Revoke a share.  Owner only.
    pub async fn unshare(
        &self,
        id: Uuid,
        user_id: Uuid,
        subject: ShareSubject,
    ) -> Result<(), CredentialError> {
        self.owned_record(id, user_id).await?;
        self.repository.delete_share(id, subject).await?;
        Ok(())
    }

    /// Credentials owned by `user_id` expiring within `within_days`.
    pub async fn find_expiring(
        &self,
        user_id: Uuid,
        within_days: i64,
    ) -> Result<Vec<CredentialRecord>, CredentialError> {
        Ok(self
            .repository
            .find_expiring_credentials(user_id, within_days, Utc::now())
            .await?)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    async fn owned_record(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<CredentialRecord, CredentialError> {
        let record = self
            .repository
            .find_credential_by_id(id)
            .await?
            .ok_or(CredentialError::NotFound)?;
        if record.user_id != user_id {
            return Err(CredentialError::NotOwner);
        }
        Ok(record)
    }

    async fn has_share(&self, credential_id: Uuid, user_id: Uuid) -> Result<bool, CredentialError> {
        let shares = self
            .repository
            .find_shares_for_credential(credential_id)
            .await?;
        Ok(shares
            .iter()
            .any(|s| s.subject == ShareSubject::User(user_id)))
    }
}

fn duplicate_or_db(err: DbError) -> CredentialError {
    match err {
        DbError::DuplicateName => CredentialError::DuplicateName,
        other => other.into(),
    }
}
