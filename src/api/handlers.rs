use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::models::Category;
use crate::services::jobs::{JobRunner, STATUS_PROCESSING};

use super::AppState;

/// Wall-clock estimate surfaced to clients at submission
const ESTIMATED_TIME: &str = "30-60秒";

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(default)]
    pub main_type: String,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default)]
    pub budget: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: String,
    pub message: String,
    pub created_at: String,
    pub poll_url: String,
    pub estimated_time: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    #[serde(default, alias = "jobId")]
    pub job_id: Option<String>,
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Accept a recommendation job and dispatch it without waiting.
///
/// Execution runs as a detached task; the caller gets the job id and a poll
/// path back immediately, and learns about any later failure only through
/// the status endpoint.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let (lat, lng) = match (request.lat, request.lng) {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => return Err(missing_submit_params()),
    };
    if request.main_type.is_empty() {
        return Err(missing_submit_params());
    }
    let category = Category::parse(&request.main_type)
        .ok_or_else(|| AppError::InvalidInput(format!("未知的类别: {}", request.main_type)))?;

    let params = JobRunner::new_job(lat, lng, category, request.sub_type, request.budget);
    let response = SubmitResponse {
        job_id: params.job_id.clone(),
        status: STATUS_PROCESSING.to_string(),
        message: "请求已接受，正在处理中".to_string(),
        created_at: params.created_at.clone(),
        poll_url: format!("/recommendation/status/{}", params.job_id),
        estimated_time: ESTIMATED_TIME.to_string(),
    };

    let runner = Arc::clone(&state.runner);
    tokio::spawn(async move {
        runner.execute(params).await;
    });

    tracing::info!(job_id = %response.job_id, "job accepted");
    Ok((StatusCode::ACCEPTED, Json(response)))
}

fn missing_submit_params() -> AppError {
    AppError::InvalidInput("缺少必需参数: lat, lng, main_type".to_string())
}

/// Job status by path parameter
pub async fn job_status_by_path(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<Value>> {
    Ok(Json(state.runner.poll(&job_id).await?))
}

/// Job status by query parameter
pub async fn job_status_by_query(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> AppResult<Json<Value>> {
    let job_id = params.job_id.ok_or_else(missing_job_id)?;
    Ok(Json(state.runner.poll(&job_id).await?))
}

/// Job status by request body
pub async fn job_status_by_body(
    State(state): State<AppState>,
    Json(params): Json<StatusParams>,
) -> AppResult<Json<Value>> {
    let job_id = params.job_id.ok_or_else(missing_job_id)?;
    Ok(Json(state.runner.poll(&job_id).await?))
}

fn missing_job_id() -> AppError {
    AppError::InvalidInput("缺少必需参数: job_id".to_string())
}
