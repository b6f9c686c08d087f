use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use coursegen_core::chat::{self, ChatIntent, ChatRequest};
use coursegen_core::llm::ProviderRegistry;
use coursegen_core::service::{self, StartGenerationRequest};
use coursegen_core::worker::{self, WorkerEnv};
use coursegen_db::models::{
    Artifact, ArtifactType, GenerationOptions, Job, JobStatus, Project, RequestedOutputs, Step,
};
use coursegen_db::queries::steps::StepProgress;
use coursegen_db::queries::{
    artifacts as artifact_db, jobs as job_db, projects as project_db, steps as step_db,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub brief: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub user_id: Uuid,
    pub ai_model: String,
    pub outputs: RequestedOutputs,
    #[serde(default)]
    pub options: GenerationOptions,
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub targets: Vec<ArtifactType>,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
}

impl From<StepProgress> for ProgressResponse {
    fn from(p: StepProgress) -> Self {
        Self {
            pending: p.pending,
            processing: p.processing,
            completed: p.completed,
            failed: p.failed,
            cancelled: p.cancelled,
            total: p.total,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectDetailResponse {
    #[serde(flatten)]
    pub project: Project,
    pub latest_job: Option<Job>,
}

#[derive(Debug, Serialize)]
pub struct JobDetailResponse {
    #[serde(flatten)]
    pub job: Job,
    pub progress: ProgressResponse,
    pub steps: Vec<Step>,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub intent: &'static str,
    pub reply: String,
    pub appended_steps: Vec<Step>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub registry: Arc<ProviderRegistry>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/projects", post(create_project))
        .route("/api/projects/{id}", get(get_project_detail))
        .route("/api/projects/{id}/generate", post(start_generation))
        .route("/api/jobs/{id}", get(get_job_detail))
        .route("/api/jobs/{id}/steps", get(list_job_steps))
        .route("/api/jobs/{id}/artifacts", get(list_job_artifacts))
        .route("/api/jobs/{id}/chat", post(chat_with_job))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run the HTTP server, optionally with the embedded worker loop.
pub async fn run_serve(
    pool: PgPool,
    registry: ProviderRegistry,
    search: Option<coursegen_core::search::SearchClient>,
    bind: &str,
    port: u16,
    with_worker: bool,
) -> Result<()> {
    let registry = Arc::new(registry);
    let state = AppState {
        pool: pool.clone(),
        registry: Arc::clone(&registry),
    };
    let app = build_router(state);

    let cancel = CancellationToken::new();
    let worker_handle = if with_worker {
        let worker_pool = pool.clone();
        let worker_cancel = cancel.clone();
        let env = WorkerEnv {
            registry: Arc::clone(&registry),
            search,
        };
        Some(tokio::spawn(async move {
            worker::run_worker_loop(&worker_pool, &env, worker_cancel, Duration::from_millis(500))
                .await
        }))
    } else {
        None
    };

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("coursegen serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    if let Some(handle) = worker_handle {
        let _ = handle.await;
    }
    tracing::info!("coursegen serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateProjectRequest>,
) -> Result<axum::response::Response, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::unprocessable("project name must not be empty"));
    }

    let project = project_db::insert_project(&state.pool, body.name.trim(), &body.brief)
        .await
        .map_err(AppError::internal)?;

    Ok((StatusCode::CREATED, Json(project)).into_response())
}

async fn get_project_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let project = project_db::get_project(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("project {id} not found")))?;

    let latest_job = project_db::latest_job_for_project(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(ProjectDetailResponse {
        project,
        latest_job,
    })
    .into_response())
}

async fn start_generation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<GenerateRequest>,
) -> Result<axum::response::Response, AppError> {
    if !body.outputs.any() {
        return Err(AppError::unprocessable(
            "at least one output type must be requested",
        ));
    }

    project_db::get_project(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("project {id} not found")))?;

    if let Some(active) = job_db::get_active_job_for_project(&state.pool, id)
        .await
        .map_err(AppError::internal)?
    {
        return Err(AppError::conflict(format!(
            "project {id} already has an active job {}",
            active.id
        )));
    }

    let job = service::start_generation(
        &state.pool,
        &StartGenerationRequest {
            project_id: id,
            user_id: body.user_id,
            ai_model: body.ai_model,
            outputs: body.outputs,
            options: body.options,
        },
    )
    .await
    .map_err(AppError::internal)?;

    Ok((StatusCode::ACCEPTED, Json(job)).into_response())
}

async fn get_job_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let job = job_db::get_job(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("job {id} not found")))?;

    let progress = step_db::get_step_progress(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    let steps = step_db::list_steps_for_job(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    let artifacts = artifact_db::list_artifacts_for_job(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(JobDetailResponse {
        job,
        progress: progress.into(),
        steps,
        artifacts,
    })
    .into_response())
}

async fn list_job_steps(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    job_db::get_job(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("job {id} not found")))?;

    let steps = step_db::list_steps_for_job(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(steps).into_response())
}

async fn list_job_artifacts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    job_db::get_job(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("job {id} not found")))?;

    let artifacts = artifact_db::list_artifacts_for_job(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(artifacts).into_response())
}

async fn chat_with_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ChatBody>,
) -> Result<axum::response::Response, AppError> {
    let job = job_db::get_job(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("job {id} not found")))?;

    // State conflicts surface as 409 before any LLM call is spent.
    let intent = chat::classify_intent(&body.message);
    if intent == ChatIntent::Revise
        && matches!(job.status, JobStatus::Failed | JobStatus::Cancelled)
    {
        return Err(AppError::conflict(format!(
            "cannot revise job {id}: status is {}",
            job.status
        )));
    }
    if intent == ChatIntent::Cancel && job.status.is_terminal() {
        return Err(AppError::conflict(format!(
            "cannot cancel job {id}: status is already {}",
            job.status
        )));
    }

    let outcome = chat::handle_chat(
        &state.pool,
        &state.registry,
        id,
        &ChatRequest {
            message: body.message,
            targets: body.targets,
        },
    )
    .await
    .map_err(AppError::internal)?;

    Ok(Json(ChatResponse {
        intent: outcome.intent.as_str(),
        reply: outcome.reply,
        appended_steps: outcome.appended_steps,
    })
    .into_response())
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let job = job_db::get_job(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("job {id} not found")))?;

    if job.status.is_terminal() {
        return Err(AppError::conflict(format!(
            "cannot cancel job {id}: status is already {}",
            job.status
        )));
    }

    let cancelled = service::cancel_generation(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(cancelled).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
