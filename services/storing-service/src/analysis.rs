//! Client for the analysis service's HTTP surface.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use uuid::Uuid;

use shared::dto::{AnalyseTaskRequest, AnalyseTaskResponse};
use shared::error::{AppError, Result};

#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyse_task(&self, task_id: Uuid, object_key: &str) -> Result<bool>;
}

pub struct HttpAnalysisClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAnalysisClient {
    /// `timeout` bounds the whole analysis round trip; a corpus scan over a
    /// large store takes a while, so callers pass a generous value.
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("building analysis client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyse_task(&self, task_id: Uuid, object_key: &str) -> Result<bool> {
        let url = format!("{}/analyse", self.base_url);
        let request = AnalyseTaskRequest {
            task_id: task_id.to_string(),
            object_key: object_key.to_string(),
        };

        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Unavailable(format!("analysis service unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: AnalyseTaskResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("decoding analysis response: {e}")))?;
        Ok(body.status)
    }
}

fn classify_status(status: StatusCode, body: &str) -> AppError {
    match status {
        StatusCode::NOT_FOUND => AppError::NotFound(body.to_string()),
        StatusCode::BAD_REQUEST => AppError::InvalidArgument(body.to_string()),
        StatusCode::CONFLICT => AppError::AlreadyExists(body.to_string()),
        StatusCode::SERVICE_UNAVAILABLE => AppError::Unavailable(body.to_string()),
        _ => AppError::Internal(format!("analysis service returned {status}: {body}")),
    }
}
