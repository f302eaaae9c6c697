//! Report persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use shared::error::{AppError, Result};

/// Verdict of one completed analysis. Written once per analysis run; a
/// re-analysis of the same task overwrites the previous verdict, so a
/// lookup always returns the latest one.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Report {
    pub task_id: Uuid,
    pub is_plagiarism: bool,
    pub plagiarism_percentage: f64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn create_report(&self, report: &Report) -> Result<()>;
    async fn get_report(&self, task_id: Uuid) -> Result<Report>;
}

pub struct PgReportRepository {
    pool: PgPool,
}

impl PgReportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Reports table (idempotent).
pub async fn ensure_schema(pool: &PgPool) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            task_id               uuid PRIMARY KEY,
            is_plagiarism         boolean NOT NULL,
            plagiarism_percentage double precision NOT NULL,
            created_at            timestamptz NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[async_trait]
impl ReportRepository for PgReportRepository {
    async fn create_report(&self, report: &Report) -> Result<()> {
        debug!(task_id = %report.task_id, "executing create report query");

        sqlx::query(
            "INSERT INTO reports (task_id, is_plagiarism, plagiarism_percentage, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (task_id) DO UPDATE SET
                 is_plagiarism = EXCLUDED.is_plagiarism,
                 plagiarism_percentage = EXCLUDED.plagiarism_percentage,
                 created_at = EXCLUDED.created_at",
        )
        .bind(report.task_id)
        .bind(report.is_plagiarism)
        .bind(report.plagiarism_percentage)
        .bind(report.created_at)
        .execute(&self.pool)
        .await?;

        debug!(task_id = %report.task_id, "report stored");
        Ok(())
    }

    async fn get_report(&self, task_id: Uuid) -> Result<Report> {
        debug!(%task_id, "executing get report query");

        let report = sqlx::query_as::<_, Report>(
            "SELECT task_id, is_plagiarism, plagiarism_percentage, created_at
             FROM reports
             WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no report for task {task_id}")))?;

        Ok(report)
    }
}
