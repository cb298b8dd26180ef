//! Postgres-backed repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{error, instrument};
use uuid::Uuid;

use crate::error::StoreError;
use crate::repository::{TaskRepository, WorkflowRepository};
use crate::status::{TaskStatus, WorkflowStatus};
use crate::task::Task;
use crate::workflow::Workflow;

/// Repository pair backed by a shared connection pool
///
/// Both tables (`orchestrator_workflows`, `orchestrator_tasks`) are defined
/// in `migrations/`. Workflow and task rows store the full entity as JSONB
/// plus a handful of indexed columns (`status`, `workflow_id`, timestamps)
/// so the recovery sweep's `find_stale_*`/`find_active` queries can use an
/// index instead of scanning and deserializing every row.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_db_err(err: sqlx::Error) -> StoreError {
        error!(error = %err, "postgres store error");
        StoreError::Database(err.to_string())
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, StoreError> {
        serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl WorkflowRepository for PostgresStore {
    #[instrument(skip(self, workflow))]
    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let doc = serde_json::to_value(workflow).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO orchestrator_workflows (id, status, parent_workflow_id, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                document = EXCLUDED.document,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.status.to_string())
        .bind(workflow.parent_workflow_id)
        .bind(&doc)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Workflow>, StoreError> {
        let row = sqlx::query("SELECT document FROM orchestrator_workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_db_err)?;
        row.map(|r| Self::decode(r.get::<Value, _>("document")))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn exists(&self, id: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 AS present FROM orchestrator_workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_db_err)?;
        Ok(row.is_some())
    }

    /// The `orchestrator_tasks.workflow_id` foreign key is `ON DELETE CASCADE`,
    /// so removing the workflow row removes its tasks too.
    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM orchestrator_workflows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_active(&self) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query(
            "SELECT document FROM orchestrator_workflows WHERE status IN ($1, $2, $3)",
        )
        .bind(WorkflowStatus::Running.to_string())
        .bind(WorkflowStatus::Paused.to_string())
        .bind(WorkflowStatus::Compensating.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        rows.into_iter()
            .map(|r| Self::decode(r.get::<Value, _>("document")))
            .collect()
    }

    #[instrument(skip(self))]
    async fn find_by_parent(&self, parent_id: Uuid) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query(
            "SELECT document FROM orchestrator_workflows WHERE parent_workflow_id = $1",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        rows.into_iter()
            .map(|r| Self::decode(r.get::<Value, _>("document")))
            .collect()
    }

    #[instrument(skip(self))]
    async fn get_all(&self, limit: usize, offset: usize) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query(
            "SELECT document FROM orchestrator_workflows ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        rows.into_iter()
            .map(|r| Self::decode(r.get::<Value, _>("document")))
            .collect()
    }
}

#[async_trait]
impl TaskRepository for PostgresStore {
    #[instrument(skip(self, task))]
    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        let doc = serde_json::to_value(task).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO orchestrator_tasks (id, workflow_id, status, started_at, updated_at, document)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                updated_at = EXCLUDED.updated_at,
                document = EXCLUDED.document
            "#,
        )
        .bind(task.id)
        .bind(task.workflow_id)
        .bind(task.status.to_string())
        .bind(task.started_at)
        .bind(task.updated_at)
        .bind(&doc)
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query("SELECT document FROM orchestrator_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_db_err)?;
        row.map(|r| Self::decode(r.get::<Value, _>("document")))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query("SELECT document FROM orchestrator_tasks WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::map_db_err)?;
        rows.into_iter()
            .map(|r| Self::decode(r.get::<Value, _>("document")))
            .collect()
    }

    #[instrument(skip(self))]
    async fn exists(&self, id: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 AS present FROM orchestrator_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_db_err)?;
        Ok(row.is_some())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM orchestrator_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_db_err)?;
        Ok(())
    }

    #[instrument(skip(self, tasks))]
    async fn save_many(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(Self::map_db_err)?;
        for task in tasks {
            let doc = serde_json::to_value(task).map_err(|e| StoreError::Serialization(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO orchestrator_tasks (id, workflow_id, status, started_at, updated_at, document)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO UPDATE
                SET status = EXCLUDED.status,
                    started_at = EXCLUDED.started_at,
                    updated_at = EXCLUDED.updated_at,
                    document = EXCLUDED.document
                "#,
            )
            .bind(task.id)
            .bind(task.workflow_id)
            .bind(task.status.to_string())
            .bind(task.started_at)
            .bind(task.updated_at)
            .bind(&doc)
            .execute(&mut *tx)
            .await
            .map_err(Self::map_db_err)?;
        }
        tx.commit().await.map_err(Self::map_db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Task>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT document FROM orchestrator_tasks WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::map_db_err)?;
        rows.into_iter()
            .map(|r| Self::decode(r.get::<Value, _>("document")))
            .collect()
    }

    #[instrument(skip(self))]
    async fn get_by_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(
            "SELECT document FROM orchestrator_tasks WHERE status = $1 ORDER BY updated_at DESC LIMIT $2",
        )
        .bind(status.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        rows.into_iter()
            .map(|r| Self::decode(r.get::<Value, _>("document")))
            .collect()
    }

    /// Straightforward version: load every task for the workflow and filter
    /// dependency-readiness in process, same as `store::memory`. A schema
    /// that stores `dependencies` as a `UUID[]` column could instead push
    /// this down to SQL - e.g. `WHERE status = 'pending' AND dependencies
    /// <@ (SELECT array_agg(id) FROM orchestrator_tasks WHERE workflow_id =
    /// $1 AND status IN ('succeeded', 'skipped'))` - trading a second index
    /// on `workflow_id` for avoiding the full per-workflow task scan.
    #[instrument(skip(self))]
    async fn get_ready_tasks(&self, workflow_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let all = TaskRepository::find_by_workflow(self, workflow_id).await?;
        let completed: std::collections::HashSet<Uuid> = all
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Succeeded | TaskStatus::Skipped))
            .map(|t| t.id)
            .collect();
        Ok(all
            .into_iter()
            .filter(|t| t.is_ready_to_execute(&completed))
            .collect())
    }

    #[instrument(skip(self))]
    async fn find_stale_running(&self, older_than: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(
            "SELECT document FROM orchestrator_tasks WHERE status = $1 AND started_at < $2",
        )
        .bind(TaskStatus::Running.to_string())
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        rows.into_iter()
            .map(|r| Self::decode(r.get::<Value, _>("document")))
            .collect()
    }

    #[instrument(skip(self))]
    async fn find_stale_queued(&self, older_than: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(
            "SELECT document FROM orchestrator_tasks WHERE status = $1 AND updated_at < $2",
        )
        .bind(TaskStatus::Queued.to_string())
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_db_err)?;
        rows.into_iter()
            .map(|r| Self::decode(r.get::<Value, _>("document")))
            .collect()
    }
}
