//! HTTP service that registers document uploads, hands out presigned
//! transfer URLs and watches for upload completion to kick off analysis.

mod analysis;
mod repo;
mod service;
#[cfg(test)]
mod testsupport;
mod watcher;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use uuid::Uuid;

use shared::config::Settings;
use shared::dto::{CreateTaskRequest, TaskResponse};
use shared::error::AppError;
use shared::storage::S3ObjectStore;

use analysis::HttpAnalysisClient;
use repo::PgTaskRepository;
use service::{StoringService, Task};
use watcher::{TokioClock, WatcherConfig};

const ANALYSIS_CALL_TIMEOUT: Duration = Duration::from_secs(120);

async fn health() -> impl Responder {
    "OK"
}

fn task_response(task: Task) -> TaskResponse {
    TaskResponse {
        id: task.id,
        file_name: task.filename,
        url: task.url,
        uploaded_by: task.uploaded_by,
        created_at: task.created_at,
    }
}

async fn create_task(
    svc: web::Data<StoringService>,
    req: web::Json<CreateTaskRequest>,
) -> Result<HttpResponse, AppError> {
    info!(file_name = %req.file_name, "create task request");

    let uploaded_by = Uuid::parse_str(&req.uploaded_by)
        .map_err(|e| AppError::InvalidArgument(format!("uploadedBy is not a valid uuid: {e}")))?;

    let task = svc.upload_task(&req.file_name, uploaded_by).await?;
    Ok(HttpResponse::Created().json(task_response(task)))
}

async fn get_task(
    svc: web::Data<StoringService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = Uuid::parse_str(&path)
        .map_err(|e| AppError::InvalidArgument(format!("task id is not a valid uuid: {e}")))?;

    let task = svc.get_task(id).await?;
    Ok(HttpResponse::Ok().json(task_response(task)))
}

async fn get_content(
    svc: web::Data<StoringService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = Uuid::parse_str(&path)
        .map_err(|e| AppError::InvalidArgument(format!("task id is not a valid uuid: {e}")))?;

    let content = svc.get_file_content(id).await?;
    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .body(content))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt().json().init();

    let settings = Settings::new().unwrap_or_else(|e| {
        error!(%e, "failed to load settings");
        std::process::exit(1);
    });

    let pool = match PgPoolOptions::new()
        .max_connections(8)
        .connect(&settings.database_url)
        .await
    {
        Ok(p) => p,
        Err(e) => {
            error!(%e, "failed to connect to database");
            std::process::exit(1);
        }
    };

    if let Err(e) = repo::ensure_schema(&pool).await {
        error!(%e, "failed to ensure schema");
        std::process::exit(1);
    }

    let store = Arc::new(S3ObjectStore::new(
        &settings.s3_endpoint,
        settings.s3_access_key.clone(),
        settings.s3_secret_key.clone(),
        settings.s3_bucket.clone(),
        settings.s3_region.clone(),
    ));
    let analysis_client =
        match HttpAnalysisClient::new(settings.analysis_url.clone(), ANALYSIS_CALL_TIMEOUT) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                error!(%e, "failed to build analysis client");
                std::process::exit(1);
            }
        };

    let watcher_config = WatcherConfig {
        poll_interval: Duration::from_secs(settings.watch_poll_interval_secs),
        timeout: Duration::from_secs(settings.watch_timeout_secs),
        max_attempts: settings.watch_max_attempts,
    };
    let svc = web::Data::new(StoringService::new(
        Arc::new(PgTaskRepository::new(pool)),
        store,
        analysis_client,
        Arc::new(TokioClock),
        watcher_config,
        Duration::from_secs(settings.upload_url_expiry_secs),
    ));

    let port = settings.storing_port;
    info!(port, "starting storing service");
    HttpServer::new(move || {
        App::new()
            .app_data(svc.clone())
            .route("/tasks", web::post().to(create_task))
            .route("/tasks/{task_id}", web::get().to(get_task))
            .route("/tasks/{task_id}/content", web::get().to(get_content))
            .route("/health", web::get().to(health))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
