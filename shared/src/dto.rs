//! Wire DTOs exchanged between the services and their clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyseTaskRequest {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "objectKey")]
    pub object_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyseTaskResponse {
    pub status: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportResponse {
    #[serde(rename = "taskId")]
    pub task_id: Uuid,
    #[serde(rename = "isPlagiarism")]
    pub is_plagiarism: bool,
    #[serde(rename = "plagiarismPercentage")]
    pub plagiarism_percentage: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "uploadedBy")]
    pub uploaded_by: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub id: Uuid,
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub url: String,
    #[serde(rename = "uploadedBy")]
    pub uploaded_by: Uuid,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}
