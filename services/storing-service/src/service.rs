//! Upload registration and task retrieval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use shared::error::{AppError, Result};
use shared::storage::ObjectStore;

use crate::analysis::AnalysisClient;
use crate::repo::{TaskMetadata, TaskRepository};
use crate::watcher::{Clock, UploadWatcher, WatcherConfig};

/// Task as handed to clients: stored metadata plus a presigned transfer URL
/// (PUT at registration, GET on retrieval).
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub filename: String,
    pub url: String,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

pub struct StoringService {
    repo: Arc<dyn TaskRepository>,
    store: Arc<dyn ObjectStore>,
    analysis: Arc<dyn AnalysisClient>,
    clock: Arc<dyn Clock>,
    watcher_config: WatcherConfig,
    transfer_url_expiry: Duration,
}

impl StoringService {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        store: Arc<dyn ObjectStore>,
        analysis: Arc<dyn AnalysisClient>,
        clock: Arc<dyn Clock>,
        watcher_config: WatcherConfig,
        transfer_url_expiry: Duration,
    ) -> Self {
        Self {
            repo,
            store,
            analysis,
            clock,
            watcher_config,
            transfer_url_expiry,
        }
    }

    /// Registers an upload: persists the task metadata, hands back a
    /// presigned PUT URL for the client's out-of-band upload and spawns the
    /// completion watcher. The watcher is detached; cancelling the request
    /// that registered the upload does not cancel it.
    pub async fn upload_task(&self, filename: &str, uploaded_by: Uuid) -> Result<Task> {
        info!(filename, %uploaded_by, "starting upload task");

        let extension = file_extension(filename).ok_or_else(|| {
            AppError::InvalidArgument(format!("file name '{filename}' has no extension"))
        })?;

        let id = Uuid::now_v7();
        let metadata = TaskMetadata {
            id,
            filename: filename.to_string(),
            uploaded_by,
            created_at: Utc::now(),
        };
        self.repo.create_task(&metadata).await?;

        let object_key = format!("{id}{extension}");
        let upload_url = self
            .store
            .presigned_put_url(&object_key, self.transfer_url_expiry)?;

        let watcher = UploadWatcher::new(
            self.store.clone(),
            self.analysis.clone(),
            self.clock.clone(),
            self.watcher_config.clone(),
        );
        info!(task_id = %id, object_key = %object_key, "starting upload watcher");
        tokio::spawn(watcher.run(id, object_key));

        info!(task_id = %id, filename, "upload task registered");
        Ok(Task {
            id: metadata.id,
            filename: metadata.filename,
            url: upload_url,
            uploaded_by: metadata.uploaded_by,
            created_at: metadata.created_at,
        })
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Task> {
        info!(task_id = %id, "getting task");

        let metadata = self.repo.get_task(id).await?;
        let object_key = object_key(&metadata);
        let download_url = self
            .store
            .presigned_get_url(&object_key, self.transfer_url_expiry)?;

        Ok(Task {
            id: metadata.id,
            filename: metadata.filename,
            url: download_url,
            uploaded_by: metadata.uploaded_by,
            created_at: metadata.created_at,
        })
    }

    pub async fn get_file_content(&self, id: Uuid) -> Result<Vec<u8>> {
        info!(task_id = %id, "getting file content");

        let metadata = self.repo.get_task(id).await?;
        let content = self.store.get_object(&object_key(&metadata)).await?;

        info!(task_id = %id, content_size = content.len(), "file content retrieved");
        Ok(content)
    }
}

/// Extension of `filename` including the leading dot, `None` when there is
/// no extension to derive an object key from.
fn file_extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
}

fn object_key(metadata: &TaskMetadata) -> String {
    format!(
        "{}{}",
        metadata.id,
        file_extension(&metadata.filename).unwrap_or_default()
    )
}
