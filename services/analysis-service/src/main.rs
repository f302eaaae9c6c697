//! HTTP service that scores stored documents against the corpus and serves
//! the resulting verdicts.

mod comparator;
mod repo;
mod service;

use std::sync::Arc;

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use uuid::Uuid;

use shared::config::Settings;
use shared::dto::{AnalyseTaskRequest, AnalyseTaskResponse, ReportResponse};
use shared::error::AppError;
use shared::storage::S3ObjectStore;

use comparator::TextComparator;
use repo::PgReportRepository;
use service::AnalysisService;

async fn health() -> impl Responder {
    "OK"
}

async fn analyse(
    svc: web::Data<AnalysisService>,
    req: web::Json<AnalyseTaskRequest>,
) -> Result<HttpResponse, AppError> {
    info!(task_id = %req.task_id, object_key = %req.object_key, "analyse task request");

    let task_id = Uuid::parse_str(&req.task_id)
        .map_err(|e| AppError::InvalidArgument(format!("task id is not a valid uuid: {e}")))?;

    let status = svc.analyse_task(task_id, &req.object_key).await?;
    Ok(HttpResponse::Ok().json(AnalyseTaskResponse { status }))
}

async fn get_report(
    svc: web::Data<AnalysisService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let task_id = Uuid::parse_str(&path)
        .map_err(|e| AppError::InvalidArgument(format!("task id is not a valid uuid: {e}")))?;

    let report = svc.get_report(task_id).await?;
    Ok(HttpResponse::Ok().json(ReportResponse {
        task_id: report.task_id,
        is_plagiarism: report.is_plagiarism,
        plagiarism_percentage: report.plagiarism_percentage,
    }))
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
    let svc = web::Data::new(AnalysisService::new(
        Arc::new(PgReportRepository::new(pool)),
        store,
        TextComparator::new(settings.ngram_length),
        settings.plagiarism_threshold,
    ));

    let port = settings.analysis_port;
    info!(port, "starting analysis service");
    HttpServer::new(move || {
        App::new()
            .app_data(svc.clone())
            .route("/analyse", web::post().to(analyse))
            .route("/reports/{task_id}", web::get().to(get_report))
            .route("/health", web::get().to(health))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
