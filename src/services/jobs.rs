/// Job Lifecycle Controller
///
/// One job moves `processing → completed` or `processing → failed`, never
/// anything else, and a terminal record is written exactly once. Submission
/// mints the parameters, execution runs the pipeline as a detached task, and
/// polling is a stateless read of the persisted record.
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{Category, JobParams, JobRecord, ResultDocument};
use crate::services::assembler;
use crate::services::enrichment::Enricher;
use crate::services::narrative::Narrator;
use crate::services::providers::ObjectStore;
use crate::services::resolution::{PlaceResolver, ResolveRequest};

pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

/// Suggested poll delay while a job is still running, in seconds
const RETRY_AFTER_SECS: u32 = 5;

/// Owns one job's execution pipeline and the poll-side read path
pub struct JobRunner {
    resolver: PlaceResolver,
    enricher: Enricher,
    narrator: Narrator,
    store: Arc<dyn ObjectStore>,
    config: Arc<Config>,
}

impl JobRunner {
    pub fn new(
        resolver: PlaceResolver,
        enricher: Enricher,
        narrator: Narrator,
        store: Arc<dyn ObjectStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            resolver,
            enricher,
            narrator,
            store,
            config,
        }
    }

    /// Mint the parameters for a fresh job
    pub fn new_job(
        lat: f64,
        lng: f64,
        category: Category,
        sub_type: String,
        budget: String,
    ) -> JobParams {
        JobParams {
            job_id: format!("job_{}", Uuid::new_v4().simple()),
            lat,
            lng,
            category,
            sub_type,
            budget,
            created_at: now_timestamp(),
        }
    }

    /// Detached execution entry point. Every outcome ends in a terminal
    /// record; the spawning handler never observes an error here.
    pub async fn execute(self: Arc<Self>, params: JobParams) {
        let job_id = params.job_id.clone();
        let started = Instant::now();
        tracing::info!(
            job_id = %job_id,
            category = params.category.as_str(),
            lat = params.lat,
            lng = params.lng,
            "job started"
        );

        match self.run_pipeline(&params).await {
            Ok(document) => {
                let marker_count = document.markers.len();
                match self.persist_completed(&job_id, document).await {
                    Ok(()) => {
                        tracing::info!(
                            job_id = %job_id,
                            markers = marker_count,
                            elapsed_secs = started.elapsed().as_secs_f64(),
                            "job completed"
                        );
                    }
                    Err(err) => {
                        tracing::error!(job_id = %job_id, error = %err, "failed to persist completed job");
                        self.persist_failed_best_effort(
                            &job_id,
                            &format!("failed to persist result: {}", err),
                        )
                        .await;
                    }
                }
            }
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "job failed");
                self.persist_failed_best_effort(&job_id, &err.to_string())
                    .await;
            }
        }
    }

    async fn run_pipeline(&self, params: &JobParams) -> AppResult<ResultDocument> {
        let request = ResolveRequest {
            latitude: params.lat,
            longitude: params.lng,
            category: params.category,
            sub_type: params.sub_type.clone(),
            budget: params.budget.clone(),
        };

        let candidates = self.resolver.resolve(&request).await?;
        let candidates = self.enricher.enrich(candidates, params.category).await?;
        let candidates = self.narrator.summarize(candidates, params.category).await?;

        Ok(assembler::assemble(
            &candidates,
            params.category,
            &params.sub_type,
        ))
    }

    async fn persist_completed(&self, job_id: &str, result: ResultDocument) -> AppResult<()> {
        let record = JobRecord {
            job_id: job_id.to_string(),
            status: STATUS_COMPLETED.to_string(),
            completed_at: now_timestamp(),
            result: Some(result),
            error: None,
        };
        self.put_record(job_id, &record).await
    }

    /// A failure to persist the failure is logged and swallowed; the job
    /// then stays "processing" from the poller's point of view.
    async fn persist_failed_best_effort(&self, job_id: &str, message: &str) {
        let record = JobRecord {
            job_id: job_id.to_string(),
            status: STATUS_FAILED.to_string(),
            completed_at: now_timestamp(),
            result: None,
            error: Some(message.to_string()),
        };
        if let Err(err) = self.put_record(job_id, &record).await {
            tracing::error!(job_id = %job_id, error = %err, "failed to persist job failure");
        }
    }

    async fn put_record(&self, job_id: &str, record: &JobRecord) -> AppResult<()> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| AppError::Internal(format!("job record serialization failed: {}", e)))?;
        self.store
            .put_object(&self.result_key(job_id), bytes, "application/json")
            .await?;
        Ok(())
    }

    /// Result object key, derived deterministically from the job id
    fn result_key(&self, job_id: &str) -> String {
        format!("{}{}.json", self.config.job_result_prefix, job_id)
    }

    /// Read-only status lookup. An absent record is the expected steady
    /// state while execution is still running, not an anomaly.
    pub async fn poll(&self, job_id: &str) -> AppResult<Value> {
        let record = match self.store.get_object(&self.result_key(job_id)).await? {
            None => {
                return Ok(json!({
                    "jobId": job_id,
                    "status": STATUS_PROCESSING,
                    "message": "任务正在处理中，请稍后再试",
                    "retryAfter": RETRY_AFTER_SECS,
                }));
            }
            Some(bytes) => serde_json::from_slice::<Value>(&bytes).map_err(|e| {
                AppError::Internal(format!("stored job record is not valid JSON: {}", e))
            })?,
        };

        let status = record["status"].as_str().unwrap_or("unknown").to_string();
        match status.as_str() {
            STATUS_COMPLETED => Ok(json!({
                "jobId": job_id,
                "status": STATUS_COMPLETED,
                "completedAt": record["completedAt"],
                "result": record["result"],
            })),
            STATUS_FAILED => Ok(json!({
                "jobId": job_id,
                "status": STATUS_FAILED,
                "completedAt": record["completedAt"],
                "error": record.get("error").cloned().unwrap_or_else(|| json!("未知错误")),
            })),
            // Forward compatibility: any other persisted status passes
            // through verbatim
            _ => Ok(json!({
                "jobId": job_id,
                "status": status,
                "data": record,
            })),
        }
    }
}

fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
