//! HTTP API server.
//!
//! Jobs are created and driven in the background; clients poll
//! `GET /job/{id}` and fetch the episode from `GET /download/{id}`.
//! `POST /generate-script` is the one call that waits for its stage.

use crate::cli::Output;
use crate::config::Settings;
use crate::error::{BlogcastError, ErrorClass};
use crate::ingestion::SourceRef;
use crate::job::{JobSnapshot, JobStatus, Stage};
use crate::orchestrator::Orchestrator;
use crate::script::{DialogueTurn, PassResult};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Shared application state.
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Run the HTTP API server.
pub async fn run_serve(host: Option<String>, port: Option<u16>, settings: Settings) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);
    let orchestrator = Arc::new(Orchestrator::new(settings)?);

    let pruned = orchestrator.prune_stale_segments().await?;
    if pruned > 0 {
        info!("Removed {} stale segment directories", pruned);
    }
    let resumed = orchestrator.resume_incomplete().await?;

    let app = router(orchestrator);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Blogcast API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    if !resumed.is_empty() {
        Output::info(&format!("Resumed {} unfinished jobs", resumed.len()));
    }
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Upload blog", "POST /upload-blog");
    Output::kv("Generate script", "POST /generate-script");
    Output::kv("Generate audio", "POST /generate-audio");
    Output::kv("Generate podcast", "POST /generate-podcast");
    Output::kv("Job status", "GET  /job/{id}");
    Output::kv("Job script", "GET  /job/{id}/script");
    Output::kv("Cancel job", "POST /job/{id}/cancel");
    Output::kv("List jobs", "GET  /jobs");
    Output::kv("Download", "GET  /download/{id}");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/upload-blog", post(upload_blog))
        .route("/generate-script", post(generate_script))
        .route("/generate-audio", post(generate_audio))
        .route("/generate-podcast", post(generate_podcast))
        .route("/jobs", get(list_jobs))
        .route("/job/{id}", get(get_job))
        .route("/job/{id}/script", get(get_script))
        .route("/job/{id}/cancel", post(cancel_job))
        .route("/download/{id}", get(download))
        .layer(cors)
        .with_state(Arc::new(AppState { orchestrator }))
}

// === Request/Response Types ===

/// A blog post given as exactly one of `url`, `text` or `markdown`.
#[derive(Debug, Deserialize)]
struct BlogRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl BlogRequest {
    fn into_source(self) -> Result<SourceRef, ApiError> {
        let title = self.title;
        match (self.url, self.text, self.markdown) {
            (Some(url), None, None) => Ok(SourceRef::Url { url, title }),
            (None, Some(body), None) => Ok(SourceRef::Text { body, title }),
            (None, None, Some(body)) => Ok(SourceRef::Markdown { body, title }),
            _ => Err(ApiError::bad_request(
                "provide exactly one of 'url', 'text' or 'markdown'",
            )),
        }
    }
}

#[derive(Deserialize)]
struct ScriptRequest {
    /// Continue an existing job instead of creating one.
    #[serde(default)]
    job_id: Option<String>,
    #[serde(flatten)]
    blog: BlogRequest,
}

#[derive(Deserialize)]
struct AudioRequest {
    job_id: String,
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Serialize)]
struct JobAccepted {
    job_id: String,
    job: JobSnapshot,
}

#[derive(Serialize)]
struct ScriptResponse {
    job_id: String,
    revision: u32,
    turns: Vec<DialogueTurn>,
    text: String,
    history: Vec<PassResult>,
}

#[derive(Serialize)]
struct JobListResponse {
    jobs: Vec<JobSnapshot>,
    total: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    class: Option<ErrorClass>,
    /// Job state when the failure belongs to a job.
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<JobSnapshot>,
    /// Last draft kept when refinement gave up.
    #[serde(skip_serializing_if = "Option::is_none")]
    script: Option<ScriptResponse>,
}

/// Error reply with an HTTP status derived from the error class.
struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                class: None,
                job: None,
                script: None,
            },
        }
    }

    fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    fn conflict(error: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, error)
    }
}

impl From<BlogcastError> for ApiError {
    fn from(e: BlogcastError) -> Self {
        let status = match (&e, e.class()) {
            (BlogcastError::JobNotFound(_), _) => StatusCode::NOT_FOUND,
            (_, ErrorClass::InvalidInput) => StatusCode::BAD_REQUEST,
            (_, ErrorClass::Cancelled) => StatusCode::CONFLICT,
            (_, ErrorClass::Transient) => StatusCode::SERVICE_UNAVAILABLE,
            (_, ErrorClass::Fatal) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut api = Self::new(status, e.to_string());
        api.body.class = Some(e.class());
        api
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn script_response(job_id: &str, script: &crate::script::ScriptDocument) -> ScriptResponse {
    ScriptResponse {
        job_id: job_id.to_string(),
        revision: script.revision,
        turns: script.turns.clone(),
        text: script.to_text(),
        history: script.history.clone(),
    }
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Create a job and run ingestion and indexing in the background.
async fn upload_blog(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BlogRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    accept(&state, req.into_source()?, Stage::Retrieving).await
}

/// Create a job and run every stage in the background.
async fn generate_podcast(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BlogRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    accept(&state, req.into_source()?, Stage::Succeeded).await
}

async fn accept(
    state: &AppState,
    source: SourceRef,
    target: Stage,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let orchestrator = &state.orchestrator;
    let job_id = orchestrator.create_job_with_target(source, target).await?;
    orchestrator.spawn_drive(job_id.clone(), target);
    let job = orchestrator.get_status(&job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id, job })))
}

/// Drive a job through refinement and return the approved script.
async fn generate_script(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScriptRequest>,
) -> ApiResult<Json<ScriptResponse>> {
    let orchestrator = &state.orchestrator;
    let job_id = match req.job_id {
        Some(id) => id,
        None => {
            let source = req.blog.into_source()?;
            orchestrator
                .create_job_with_target(source, Stage::Refining)
                .await?
        }
    };

    let snapshot = orchestrator.advance_through(&job_id, Stage::Refining).await?;
    let job = orchestrator.get_job(&job_id).await?;

    match (snapshot.status, &job.script) {
        (JobStatus::Failed, script) => {
            warn!(job_id = %job_id, "Script generation failed");
            let mut err = ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, snapshot.message.clone());
            err.body.class = snapshot.last_error.as_ref().map(|e| e.class);
            err.body.script = script.as_ref().map(|s| script_response(&job_id, s));
            err.body.job = Some(snapshot);
            Err(err)
        }
        (JobStatus::Cancelled, _) => {
            let mut err = ApiError::conflict(snapshot.message.clone());
            err.body.job = Some(snapshot);
            Err(err)
        }
        (_, Some(script)) if snapshot.last_completed_stage >= Stage::Refining => {
            Ok(Json(script_response(&job_id, script)))
        }
        _ => Err(ApiError::conflict(format!(
            "job {} has no approved script",
            job_id
        ))),
    }
}

/// Synthesize and assemble an already approved script in the background.
async fn generate_audio(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AudioRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let orchestrator = &state.orchestrator;
    let job = orchestrator.get_job(&req.job_id).await?;
    if job.is_terminal() {
        return Err(ApiError::conflict(format!(
            "job {} is already {}",
            job.id, job.status
        )));
    }
    if job.script.is_none() || job.last_completed_stage() < Stage::Refining {
        return Err(ApiError::conflict(format!(
            "job {} has no approved script yet",
            job.id
        )));
    }

    orchestrator.spawn_drive(job.id.clone(), Stage::Succeeded);
    let snapshot = orchestrator.get_status(&job.id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id: job.id,
            job: snapshot,
        }),
    ))
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let jobs = state.orchestrator.list_jobs(query.limit).await?;
    Ok(Json(JobListResponse {
        total: jobs.len(),
        jobs,
    }))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.orchestrator.get_status(&id).await?))
}

async fn get_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ScriptResponse>> {
    let job = state.orchestrator.get_job(&id).await?;
    match &job.script {
        Some(script) => Ok(Json(script_response(&id, script))),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("job {} has no script yet", id),
        )),
    }
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.orchestrator.cancel(&id).await?))
}

async fn download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let job = state.orchestrator.get_job(&id).await?;
    let artifact = match (job.status, job.artifact()) {
        (JobStatus::Succeeded, Some(artifact)) => artifact.clone(),
        (status, _) => {
            return Err(ApiError::conflict(format!(
                "episode for job {} is not ready ({})",
                id, status
            )))
        }
    };

    let bytes = tokio::fs::read(&artifact)
        .await
        .map_err(|e| ApiError::new(StatusCode::GONE, format!("episode file unavailable: {}", e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, "audio/mpeg".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.mp3\"", id),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::{harness, Harness};
    use std::time::Duration;

    async fn serve(h: &Harness) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(h.orchestrator.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn wait_terminal(client: &reqwest::Client, base: &str, id: &str) -> serde_json::Value {
        for _ in 0..200 {
            let job: serde_json::Value = client
                .get(format!("{}/job/{}", base, id))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if ["succeeded", "failed", "cancelled"].contains(&job["status"].as_str().unwrap()) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", id);
    }

    #[tokio::test]
    async fn test_ambiguous_source_is_rejected() {
        let h = harness();
        let base = serve(&h).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/upload-blog", base))
            .json(&serde_json::json!({ "url": "https://example.com", "text": "also this" }))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        assert!(h.orchestrator.list_jobs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_podcast_then_download() {
        let h = harness();
        let base = serve(&h).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/generate-podcast", base))
            .json(&serde_json::json!({ "text": "A post about Rust.", "title": "Rust" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
        let accepted: serde_json::Value = resp.json().await.unwrap();
        let id = accepted["job_id"].as_str().unwrap().to_string();

        let job = wait_terminal(&client, &base, &id).await;
        assert_eq!(job["status"], "succeeded");

        let resp = client
            .get(format!("{}/download/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.headers()[reqwest::header::CONTENT_TYPE], "audio/mpeg");
        assert_eq!(resp.bytes().await.unwrap().as_ref(), b"ID3");
    }

    #[tokio::test]
    async fn test_generate_script_then_audio() {
        let h = harness();
        let base = serve(&h).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/generate-script", base))
            .json(&serde_json::json!({ "markdown": "# Rust\n\nIt is fast." }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let script: serde_json::Value = resp.json().await.unwrap();
        let id = script["job_id"].as_str().unwrap().to_string();
        assert!(!script["turns"].as_array().unwrap().is_empty());
        assert_eq!(h.synthesizer.call_count(), 0);

        // Not synthesized yet.
        let resp = client
            .get(format!("{}/download/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);

        let resp = client
            .post(format!("{}/generate-audio", base))
            .json(&serde_json::json!({ "job_id": id }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

        let job = wait_terminal(&client, &base, &id).await;
        assert_eq!(job["status"], "succeeded");
        assert!(h.synthesizer.call_count() > 0);
    }

    #[tokio::test]
    async fn test_generate_audio_requires_script() {
        let h = harness();
        let base = serve(&h).await;
        let id = h
            .orchestrator
            .create_job_with_target(
                SourceRef::Text {
                    body: "A post.".into(),
                    title: None,
                },
                Stage::Retrieving,
            )
            .await
            .unwrap();

        let resp = reqwest::Client::new()
            .post(format!("{}/generate-audio", base))
            .json(&serde_json::json!({ "job_id": id }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let h = harness();
        let base = serve(&h).await;

        let resp = reqwest::get(format!("{}/job/does-not-exist", base)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["class"], "invalid_input");
    }
}
