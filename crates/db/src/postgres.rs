//! Postgres [`Repository`] backend.
//!
//! Uses runtime-bound queries against the following tables (see the DDL in
//! `migrations/`): `workflows`, `executions`, `node_executions`,
//! `credentials`, `credential_shares`.  Statuses are stored as `text` and
//! parsed through the model enums' `FromStr` impls.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::models::{
    CredentialRecord, CredentialShareRecord, ExecutionPatch, ExecutionRecord, ExecutionStatus,
    NodeExecutionPatch, NodeExecutionRecord, NodeExecutionStatus, SharePermission, ShareSubject,
    WorkflowRecord,
};
use crate::repository::Repository;
use crate::{DbError, DbPool};

/// A `Repository` backed by a Postgres pool.
pub struct PgRepository {
    pool: DbPool,
}

impl PgRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_err(msg: String) -> DbError {
    DbError::Sqlx(sqlx::Error::Decode(msg.into()))
}

fn workflow_from_row(row: &PgRow) -> Result<WorkflowRecord, DbError> {
    Ok(WorkflowRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        definition: row.try_get("definition")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn execution_from_row(row: &PgRow) -> Result<ExecutionRecord, DbError> {
    let status: String = row.try_get("status")?;
    Ok(ExecutionRecord {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        user_id: row.try_get("user_id")?,
        snapshot: row.try_get("snapshot")?,
        trigger_data: row.try_get("trigger_data")?,
        mode: row.try_get("mode")?,
        status: ExecutionStatus::from_str(&status).map_err(decode_err)?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error: row.try_get("error")?,
    })
}

fn node_execution_from_row(row: &PgRow) -> Result<NodeExecutionRecord, DbError> {
    let status: String = row.try_get("status")?;
    Ok(NodeExecutionRecord {
        execution_id: row.try_get("execution_id")?,
        node_id: row.try_get("node_id")?,
        status: NodeExecutionStatus::from_str(&status).map_err(decode_err)?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        input_data: row.try_get("input_data")?,
        output_data: row.try_get("output_data")?,
        error: row.try_get("error")?,
        attempt_count: row.try_get("attempt_count")?,
    })
}

fn credential_from_row(row: &PgRow) -> Result<CredentialRecord, DbError> {
    Ok(CredentialRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        credential_type: row.try_get("credential_type")?,
        ciphertext: row.try_get("ciphertext")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn share_from_row(row: &PgRow) -> Result<CredentialShareRecord, DbError> {
    let kind: String = row.try_get("subject_kind")?;
    let subject_id: Uuid = row.try_get("subject_id")?;
    let permission: String = row.try_get("permission")?;
    let subject = match kind.as_str() {
        "user" => ShareSubject::User(subject_id),
        "team" => ShareSubject::Team(subject_id),
        other => return Err(decode_err(format!("unknown share subject kind: {other}"))),
    };
    let permission = match permission.as_str() {
        "use" => SharePermission::Use,
        "view" => SharePermission::View,
        "edit" => SharePermission::Edit,
        other => return Err(decode_err(format!("unknown share permission: {other}"))),
    };
    Ok(CredentialShareRecord {
        credential_id: row.try_get("credential_id")?,
        subject,
        permission,
    })
}

fn subject_parts(subject: ShareSubject) -> (&'static str, Uuid) {
    match subject {
        ShareSubject::User(id) => ("user", id),
        ShareSubject::Team(id) => ("team", id),
    }
}

fn permission_str(permission: SharePermission) -> &'static str {
    match permission {
        SharePermission::Use => "use",
        SharePermission::View => "view",
        SharePermission::Edit => "edit",
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl Repository for PgRepository {
    // ------ workflows ------

    async fn create_workflow(&self, record: WorkflowRecord) -> Result<WorkflowRecord, DbError> {
        sqlx::query(
            r#"
            INSERT INTO workflows (id, user_id, name, definition, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.name)
        .bind(&record.definition)
        .bind(record.active)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn load_workflow(&self, id: Uuid) -> Result<WorkflowRecord, DbError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, definition, active, created_at
            FROM workflows WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        workflow_from_row(&row)
    }

    // ------ executions ------

    async fn create_execution(&self, record: ExecutionRecord) -> Result<ExecutionRecord, DbError> {
        sqlx::query(
            r#"
            INSERT INTO executions
                (id, workflow_id, user_id, snapshot, trigger_data, mode, status, started_at, finished_at, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(record.workflow_id)
        .bind(record.user_id)
        .bind(&record.snapshot)
        .bind(&record.trigger_data)
        .bind(&record.mode)
        .bind(record.status.to_string())
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn load_execution(&self, id: Uuid) -> Result<ExecutionRecord, DbError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, user_id, snapshot, trigger_data, mode, status,
                   started_at, finished_at, error
            FROM executions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        execution_from_row(&row)
    }

    async fn update_execution(&self, id: Uuid, patch: ExecutionPatch) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status      = COALESCE($2, status),
                finished_at = COALESCE($3, finished_at),
                error       = COALESCE($4, error)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(patch.status.map(|s| s.to_string()))
        .bind(patch.finished_at)
        .bind(patch.error)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn list_executions(&self, user_id: Option<Uuid>) -> Result<Vec<ExecutionRecord>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, user_id, snapshot, trigger_data, mode, status,
                   started_at, finished_at, error
            FROM executions
            WHERE $1::uuid IS NULL OR user_id = $1
            ORDER BY started_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(execution_from_row).collect()
    }

    async fn delete_execution(&self, id: Uuid) -> Result<(), DbError> {
        // node_executions carries ON DELETE CASCADE; a single statement keeps
        // the call transactional.
        let result = sqlx::query("DELETE FROM executions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // ------ node executions ------

    async fn create_node_execution(&self, record: NodeExecutionRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO node_executions
                (execution_id, node_id, status, started_at, finished_at,
                 input_data, output_data, error, attempt_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (execution_id, node_id) DO UPDATE
            SET status = EXCLUDED.status
            "#,
        )
        .bind(record.execution_id)
        .bind(&record.node_id)
        .bind(record.status.to_string())
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(&record.input_data)
        .bind(&record.output_data)
        .bind(&record.error)
        .bind(record.attempt_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_node_execution(
        &self,
        execution_id: Uuid,
        node_id: &str,
        patch: NodeExecutionPatch,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE node_executions
            SET status        = COALESCE($3, status),
                started_at    = COALESCE($4, started_at),
                finished_at   = COALESCE($5, finished_at),
                input_data    = COALESCE($6, input_data),
                output_data   = COALESCE($7, output_data),
                error         = COALESCE($8, error),
                attempt_count = COALESCE($9, attempt_count)
            WHERE execution_id = $1 AND node_id = $2
            "#,
        )
        .bind(execution_id)
        .bind(node_id)
        .bind(patch.status.map(|s| s.to_string()))
        .bind(patch.started_at)
        .bind(patch.finished_at)
        .bind(patch.input_data)
        .bind(patch.output_data)
        .bind(patch.error)
        .bind(patch.attempt_count)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn get_node_execution(
        &self,
        execution_id: Uuid,
        node_id: &str,
    ) -> Result<NodeExecutionRecord, DbError> {
        let row = sqlx::query(
            r#"
            SELECT execution_id, node_id, status, started_at, finished_at,
                   input_data, output_data, error, attempt_count
            FROM node_executions
            WHERE execution_id = $1 AND node_id = $2
            "#,
        )
        .bind(execution_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        node_execution_from_row(&row)
    }

    async fn list_node_executions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<NodeExecutionRecord>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT execution_id, node_id, status, started_at, finished_at,
                   input_data, output_data, error, attempt_count
            FROM node_executions
            WHERE execution_id = $1
            ORDER BY started_at ASC NULLS LAST
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(node_execution_from_row).collect()
    }

    // ------ credentials ------

    async fn insert_credential(
        &self,
        record: CredentialRecord,
    ) -> Result<CredentialRecord, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO credentials
                (id, user_id, name, credential_type, ciphertext, expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.name)
        .bind(&record.credential_type)
        .bind(&record.ciphertext)
        .bind(record.expires_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(record),
            Err(e) if is_unique_violation(&e) => Err(DbError::DuplicateName),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_credential_by_id(&self, id: Uuid) -> Result<Option<CredentialRecord>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, credential_type, ciphertext, expires_at, created_at, updated_at
            FROM credentials WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(credential_from_row).transpose()
    }

    async fn find_credential_by_id_and_user(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<CredentialRecord>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, credential_type, ciphertext, expires_at, created_at, updated_at
            FROM credentials WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(credential_from_row).transpose()
    }

    async fn find_credentials_by_user(
        &self,
        user_id: Uuid,
        type_filter: Option<&str>,
    ) -> Result<Vec<CredentialRecord>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, name, credential_type, ciphertext, expires_at, created_at, updated_at
            FROM credentials
            WHERE user_id = $1 AND ($2::text IS NULL OR credential_type = $2)
            ORDER BY name ASC
            "#,
        )
        .bind(user_id)
        .bind(type_filter)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(credential_from_row).collect()
    }

    async fn update_credential(&self, record: CredentialRecord) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET name = $2, credential_type = $3, ciphertext = $4,
                expires_at = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(&record.credential_type)
        .bind(&record.ciphertext)
        .bind(record.expires_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) if r.rows_affected() == 0 => Err(DbError::NotFound),
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(DbError::DuplicateName),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_credential(&self, id: Uuid) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM credentials WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn find_expiring_credentials(
        &self,
        user_id: Uuid,
        within_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<CredentialRecord>, DbError> {
        let horizon = now + Duration::days(within_days);
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, name, credential_type, ciphertext, expires_at, created_at, updated_at
            FROM credentials
            WHERE user_id = $1 AND expires_at IS NOT NULL AND expires_at <= $2
            ORDER BY expires_at ASC
            "#,
        )
        .bind(user_id)
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(credential_from_row).collect()
    }

    // ------ credential shares ------

    async fn insert_share(&self, record: CredentialShareRecord) -> Result<(), DbError> {
        let (kind, subject_id) = subject_parts(record.subject);
        sqlx::query(
            r#"
            INSERT INTO credential_shares (credential_id, subject_kind, subject_id, permission)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (credential_id, subject_kind, subject_id) DO UPDATE
            SET permission = EXCLUDED.permission
            "#,
        )
        .bind(record.credential_id)
        .bind(kind)
        .bind(subject_id)
        .bind(permission_str(record.permission))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_share(&self, credential_id: Uuid, subject: ShareSubject) -> Result<(), DbError> {
        let (kind, subject_id) = subject_parts(subject);
        let result = sqlx::query(
            r#"
            DELETE FROM credential_shares
            WHERE credential_id = $1 AND subject_kind = $2 AND subject_id = $3
            "#,
        )
        .bind(credential_id)
        .bind(kind)
        .bind(subject_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn find_shares_for_credential(
        &self,
        credential_id: Uuid,
    ) -> Result<Vec<CredentialShareRecord>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT credential_id, subject_kind, subject_id, permission
            FROM credential_shares
            WHERE credential_id = $1
            "#,
        )
        .bind(credential_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(share_from_row).collect()
    }
}
