//! Task metadata persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use shared::error::{AppError, Result};

/// Row created at upload registration. Immutable afterwards; the eventual
/// verdict lives in the analysis service's report table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TaskMetadata {
    pub id: Uuid,
    pub filename: String,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create_task(&self, task: &TaskMetadata) -> Result<()>;
    async fn get_task(&self, id: Uuid) -> Result<TaskMetadata>;
}

pub struct PgTaskRepository {
    pool: PgPool,
}

impl PgTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Tasks table (idempotent).
pub async fn ensure_schema(pool: &PgPool) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id          uuid PRIMARY KEY,
            filename    text NOT NULL,
            uploaded_by uuid NOT NULL,
            created_at  timestamptz NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn create_task(&self, task: &TaskMetadata) -> Result<()> {
        debug!(task_id = %task.id, filename = %task.filename, "executing create task query");

        sqlx::query(
            "INSERT INTO tasks (id, filename, uploaded_by, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(task.id)
        .bind(&task.filename)
        .bind(task.uploaded_by)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;

        debug!(task_id = %task.id, "task created in database");
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<TaskMetadata> {
        debug!(task_id = %id, "executing get task query");

        let task = sqlx::query_as::<_, TaskMetadata>(
            "SELECT id, filename, uploaded_by, created_at
             FROM tasks
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no task {id}")))?;

        Ok(task)
    }
}
