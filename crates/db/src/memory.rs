//! In-memory [`Repository`] backend.
//!
//! Default backend for tests and the CLI `run` command.  State lives in
//! `tokio::sync::RwLock`-guarded maps; every method is transactional by
//! construction because it holds the lock for the duration of the call.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    CredentialRecord, CredentialShareRecord, ExecutionPatch, ExecutionRecord, NodeExecutionPatch,
    NodeExecutionRecord, ShareSubject, WorkflowRecord,
};
use crate::repository::Repository;
use crate::DbError;

#[derive(Default)]
struct Tables {
    workflows: HashMap<Uuid, WorkflowRecord>,
    executions: HashMap<Uuid, ExecutionRecord>,
    /// Keyed by `(execution_id, node_id)`; insertion order is preserved in
    /// `node_order` so rows that never started list deterministically.
    node_executions: HashMap<(Uuid, String), NodeExecutionRecord>,
    node_order: Vec<(Uuid, String)>,
    credentials: HashMap<Uuid, CredentialRecord>,
    shares: Vec<CredentialShareRecord>,
}

/// A `Repository` backed by process memory.
#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    // ------ workflows ------

    async fn create_workflow(&self, record: WorkflowRecord) -> Result<WorkflowRecord, DbError> {
        let mut t = self.tables.write().await;
        t.workflows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn load_workflow(&self, id: Uuid) -> Result<WorkflowRecord, DbError> {
        let t = self.tables.read().await;
        t.workflows.get(&id).cloned().ok_or(DbError::NotFound)
    }

    // ------ executions ------

    async fn create_execution(&self, record: ExecutionRecord) -> Result<ExecutionRecord, DbError> {
        let mut t = self.tables.write().await;
        t.executions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn load_execution(&self, id: Uuid) -> Result<ExecutionRecord, DbError> {
        let t = self.tables.read().await;
        t.executions.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn update_execution(&self, id: Uuid, patch: ExecutionPatch) -> Result<(), DbError> {
        let mut t = self.tables.write().await;
        let row = t.executions.get_mut(&id).ok_or(DbError::NotFound)?;
        if let Some(status) = patch.status {
            row.status = status;
        }
        if let Some(finished_at) = patch.finished_at {
            row.finished_at = Some(finished_at);
        }
        if let Some(error) = patch.error {
            row.error = Some(error);
        }
        Ok(())
    }

    async fn list_executions(&self, user_id: Option<Uuid>) -> Result<Vec<ExecutionRecord>, DbError> {
        let t = self.tables.read().await;
        let mut rows: Vec<ExecutionRecord> = t
            .executions
            .values()
            .filter(|e| user_id.map_or(true, |u| e.user_id == u))
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.started_at);
        Ok(rows)
    }

    async fn delete_execution(&self, id: Uuid) -> Result<(), DbError> {
        let mut t = self.tables.write().await;
        t.executions.remove(&id).ok_or(DbError::NotFound)?;
        // Cascade to the node rows.
        t.node_executions.retain(|(exec_id, _), _| *exec_id != id);
        t.node_order.retain(|(exec_id, _)| *exec_id != id);
        Ok(())
    }

    // ------ node executions ------

    async fn create_node_execution(&self, record: NodeExecutionRecord) -> Result<(), DbError> {
        let mut t = self.tables.write().await;
        let key = (record.execution_id, record.node_id.clone());
        if !t.node_executions.contains_key(&key) {
            t.node_order.push(key.clone());
        }
        t.node_executions.insert(key, record);
        Ok(())
    }

    async fn update_node_execution(
        &self,
        execution_id: Uuid,
        node_id: &str,
        patch: NodeExecutionPatch,
    ) -> Result<(), DbError> {
        let mut t = self.tables.write().await;
        let row = t
            .node_executions
            .get_mut(&(execution_id, node_id.to_owned()))
            .ok_or(DbError::NotFound)?;
        if let Some(status) = patch.status {
            row.status = status;
        }
        if let Some(started_at) = patch.started_at {
            row.started_at = Some(started_at);
        }
        if let Some(finished_at) = patch.finished_at {
            row.finished_at = Some(finished_at);
        }
        if let Some(input_data) = patch.input_data {
            row.input_data = Some(input_data);
        }
        if let Some(output_data) = patch.output_data {
            row.output_data = Some(output_data);
        }
        if let Some(error) = patch.error {
            row.error = Some(error);
        }
        if let Some(attempt_count) = patch.attempt_count {
            row.attempt_count = attempt_count;
        }
        Ok(())
    }

    async fn get_node_execution(
        &self,
        execution_id: Uuid,
        node_id: &str,
    ) -> Result<NodeExecutionRecord, DbError> {
        let t = self.tables.read().await;
        t.node_executions
            .get(&(execution_id, node_id.to_owned()))
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn list_node_executions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<NodeExecutionRecord>, DbError> {
        let t = self.tables.read().await;
        let mut rows: Vec<NodeExecutionRecord> = t
            .node_order
            .iter()
            .filter(|(exec_id, _)| *exec_id == execution_id)
            .filter_map(|key| t.node_executions.get(key).cloned())
            .collect();
        // Started rows first in start order; never-started rows keep
        // insertion order at the tail.
        rows.sort_by_key(|r| r.started_at.map_or((1, DateTime::<Utc>::MAX_UTC), |at| (0, at)));
        Ok(rows)
    }

    // ------ credentials ------

    async fn insert_credential(
        &self,
        record: CredentialRecord,
    ) -> Result<CredentialRecord, DbError> {
        let mut t = self.tables.write().await;
        let clash = t
            .credentials
            .values()
            .any(|c| c.user_id == record.user_id && c.name == record.name);
        if clash {
            return Err(DbError::DuplicateName);
        }
        t.credentials.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_credential_by_id(&self, id: Uuid) -> Result<Option<CredentialRecord>, DbError> {
        let t = self.tables.read().await;
        Ok(t.credentials.get(&id).cloned())
    }

    async fn find_credential_by_id_and_user(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<CredentialRecord>, DbError> {
        let t = self.tables.read().await;
        Ok(t.credentials
            .get(&id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }

    async fn find_credentials_by_user(
        &self,
        user_id: Uuid,
        type_filter: Option<&str>,
    ) -> Result<Vec<CredentialRecord>, DbError> {
        let t = self.tables.read().await;
        let mut rows: Vec<CredentialRecord> = t
            .credentials
            .values()
            .filter(|c| c.user_id == user_id)
            .filter(|c| type_filter.map_or(true, |ty| c.credential_type == ty))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn update_credential(&self, record: CredentialRecord) -> Result<(), DbError> {
        let mut t = self.tables.write().await;
        if !t.credentials.contains_key(&record.id) {
            return Err(DbError::NotFound);
        }
        let clash = t
            .credentials
            .values()
            .any(|c| c.id != record.id && c.user_id == record.user_id && c.name == record.name);
        if clash {
            return Err(DbError::DuplicateName);
        }
        t.credentials.insert(record.id, record);
        Ok(())
    }

    async fn delete_credential(&self, id: Uuid) -> Result<(), DbError> {
        let mut t = self.tables.write().await;
        t.credentials.remove(&id).ok_or(DbError::NotFound)?;
        t.shares.retain(|s| s.credential_id != id);
        Ok(())
    }

    async fn find_expiring_credentials(
        &self,
        user_id: Uuid,
        within_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<CredentialRecord>, DbError> {
        let horizon = now + Duration::days(within_days);
        let t = self.tables.read().await;
        let mut rows: Vec<CredentialRecord> = t
            .credentials
            .values()
            .filter(|c| c.user_id == user_id)
            .filter(|c| c.expires_at.is_some_and(|at| at <= horizon))
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.expires_at);
        Ok(rows)
    }

    // ------ credential shares ------

    async fn insert_share(&self, record: CredentialShareRecord) -> Result<(), DbError> {
        let mut t = self.tables.write().await;
        // Re-sharing with the same subject replaces the permission level.
        t.shares
            .retain(|s| !(s.credential_id == record.credential_id && s.subject == record.subject));
        t.shares.push(record);
        Ok(())
    }

    async fn delete_share(&self, credential_id: Uuid, subject: ShareSubject) -> Result<(), DbError> {
        let mut t = self.tables.write().await;
        let before = t.shares.len();
        t.shares
            .retain(|s| !(s.credential_id == credential_id && s.subject == subject));
        if t.shares.len() == before {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn find_shares_for_credential(
        &self,
        credential_id: Uuid,
    ) -> Result<Vec<CredentialShareRecord>, DbError> {
        let t = self.tables.read().await;
        Ok(t.shares
            .iter()
            .filter(|s| s.credential_id == credential_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn execution(user: Uuid) -> ExecutionRecord {
        ExecutionRecord {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            user_id: user,
            snapshot: json!({}),
            trigger_data: json!({}),
            mode: "manual".into(),
            status: crate::models::ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    fn credential(user: Uuid, name: &str) -> CredentialRecord {
        let now = Utc::now();
        CredentialRecord {
            id: Uuid::new_v4(),
            user_id: user,
            name: name.into(),
            credential_type: "httpBasicAuth".into(),
            ciphertext: "00".repeat(16) + ":" + &"11".repeat(16),
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn deleting_an_execution_cascades_to_node_rows() {
        let repo = MemoryRepository::new();
        let exec = repo.create_execution(execution(Uuid::new_v4())).await.unwrap();

        repo.create_node_execution(NodeExecutionRecord {
            execution_id: exec.id,
            node_id: "a".into(),
            status: crate::models::NodeExecutionStatus::Queued,
            started_at: None,
            finished_at: None,
            input_data: None,
            output_data: None,
            error: None,
            attempt_count: 0,
        })
        .await
        .unwrap();

        repo.delete_execution(exec.id).await.unwrap();
        assert!(repo.get_node_execution(exec.id, "a").await.is_err());
        assert!(repo.list_node_executions(exec.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_credential_name_per_user_is_rejected() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();

        repo.insert_credential(credential(user, "prod-api")).await.unwrap();
        let err = repo.insert_credential(credential(user, "prod-api")).await;
        assert!(matches!(err, Err(DbError::DuplicateName)));

        // Same name under a different user is fine.
        repo.insert_credential(credential(Uuid::new_v4(), "prod-api"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expiring_credentials_respect_the_window() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let now = Utc::now();

        let mut soon = credential(user, "soon");
        soon.expires_at = Some(now + Duration::days(3));
        let mut later = credential(user, "later");
        later.expires_at = Some(now + Duration::days(300));

        repo.insert_credential(soon).await.unwrap();
        repo.insert_credential(later).await.unwrap();

        let expiring = repo.find_expiring_credentials(user, 7, now).await.unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].name, "soon");
    }
}
