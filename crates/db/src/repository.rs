//! The [`Repository`] contract — the only door to persistent state.
//!
//! Every operation is transactional at the single-call grain.  The engine
//! orders its calls so no invariant is violated at any intermediate point;
//! backends need not provide multi-call transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    CredentialRecord, CredentialShareRecord, ExecutionPatch, ExecutionRecord, NodeExecutionPatch,
    NodeExecutionRecord, ShareSubject, WorkflowRecord,
};
use crate::DbError;

/// Abstract CRUD over workflows, executions, node-execution rows, and
/// credential rows.  Purely a contract — the engine neither assumes a
/// specific schema nor performs joins outside of it.
#[async_trait]
pub trait Repository: Send + Sync {
    // ------ workflows ------

    async fn create_workflow(&self, record: WorkflowRecord) -> Result<WorkflowRecord, DbError>;

    /// Fetch a workflow by id.  Fails with [`DbError::NotFound`].
    async fn load_workflow(&self, id: Uuid) -> Result<WorkflowRecord, DbError>;

    // ------ executions ------

    async fn create_execution(&self, record: ExecutionRecord) -> Result<ExecutionRecord, DbError>;

    async fn load_execution(&self, id: Uuid) -> Result<ExecutionRecord, DbError>;

    /// Apply `patch` (status, finished_at, error) to an execution.
    async fn update_execution(&self, id: Uuid, patch: ExecutionPatch) -> Result<(), DbError>;

    /// All executions, optionally restricted to one submitting user.
    async fn list_executions(&self, user_id: Option<Uuid>) -> Result<Vec<ExecutionRecord>, DbError>;

    /// Delete an execution and cascade to its node-execution rows.
    async fn delete_execution(&self, id: Uuid) -> Result<(), DbError>;

    // ------ node executions ------

    async fn create_node_execution(&self, record: NodeExecutionRecord) -> Result<(), DbError>;

    /// Update the row keyed by `(execution_id, node_id)`.
    async fn update_node_execution(
        &self,
        execution_id: Uuid,
        node_id: &str,
        patch: NodeExecutionPatch,
    ) -> Result<(), DbError>;

    async fn get_node_execution(
        &self,
        execution_id: Uuid,
        node_id: &str,
    ) -> Result<NodeExecutionRecord, DbError>;

    /// All node rows for an execution, ordered by `started_at` (rows that
    /// never started sort last, in insertion order).
    async fn list_node_executions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<NodeExecutionRecord>, DbError>;

    // ------ credentials ------

    /// Insert a credential.  Fails with [`DbError::DuplicateName`] when the
    /// owner already has a credential with the same name.
    async fn insert_credential(&self, record: CredentialRecord) -> Result<CredentialRecord, DbError>;

    async fn find_credential_by_id(&self, id: Uuid) -> Result<Option<CredentialRecord>, DbError>;

    async fn find_credential_by_id_and_user(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<CredentialRecord>, DbError>;

    async fn find_credentials_by_user(
        &self,
        user_id: Uuid,
        type_filter: Option<&str>,
    ) -> Result<Vec<CredentialRecord>, DbError>;

    /// Replace the stored record (same id).  Name uniqueness per user is
    /// preserved.
    async fn update_credential(&self, record: CredentialRecord) -> Result<(), DbError>;

    async fn delete_credential(&self, id: Uuid) -> Result<(), DbError>;

    /// Credentials owned by `user_id` whose `expires_at` falls within the
    /// next `within_days` days (measured from `now`).
    async fn find_expiring_credentials(
        &self,
        user_id: Uuid,
        within_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<CredentialRecord>, DbError>;

    // ------ credential shares ------

    async fn insert_share(&self, record: CredentialShareRecord) -> Result<(), DbError>;

    async fn delete_share(&self, credential_id: Uuid, subject: ShareSubject) -> Result<(), DbError>;

    async fn find_shares_for_credential(
        &self,
        credential_id: Uuid,
    ) -> Result<Vec<CredentialShareRecord>, DbError>;
}
