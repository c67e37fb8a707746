//! HTTP server for the admin API.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use syncflow::{
    Advisory, Priority, RunId, Scheduler, SchedulerError, Task, TaskFilter, TaskId, TaskStatus,
    TickReport,
};
use tracing::{error, info};

/// Shared state for the admin server.
pub struct AdminState {
    pub scheduler: Arc<Scheduler>,
}

/// Create the router for the admin API.
pub fn create_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/api/tasks", get(list_tasks).delete(purge_tasks))
        .route("/api/tasks/:id/terminate", post(terminate_task))
        .route("/api/runs/:task_type", post(request_run))
        .route("/api/tick", post(tick))
        .route("/api/advisories", get(list_advisories))
        .route("/api/jobs", get(list_jobs))
        .with_state(state)
}

/// Scheduler failure rendered as a JSON error body.
struct ApiError(SchedulerError);

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SchedulerError::UnknownJob(_) | SchedulerError::TaskNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SchedulerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Admin request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct TaskQuery {
    #[serde(rename = "type")]
    task_type: Option<String>,
    status: Option<TaskStatus>,
    id: Option<i64>,
    run_id: Option<String>,
}

impl From<TaskQuery> for TaskFilter {
    fn from(q: TaskQuery) -> Self {
        let mut filter = TaskFilter::new();
        if let Some(task_type) = q.task_type {
            filter = filter.task_type(task_type);
        }
        if let Some(status) = q.status {
            filter = filter.status(status);
        }
        if let Some(id) = q.id {
            filter = filter.id(TaskId(id));
        }
        if let Some(run_id) = q.run_id {
            filter = filter.run_id(RunId::new(run_id));
        }
        filter
    }
}

#[derive(Debug, Deserialize)]
struct TerminateQuery {
    #[serde(default)]
    cascade: bool,
}

#[derive(Debug, Deserialize)]
struct PurgeQuery {
    status: TaskStatus,
}

#[derive(Debug, Deserialize)]
struct RunQuery {
    #[serde(default)]
    immediate: bool,
}

async fn list_tasks(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = state.scheduler.query(&query.into()).await?;
    Ok(Json(tasks))
}

async fn terminate_task(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<i64>,
    Query(query): Query<TerminateQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = TaskId(id);
    let stopped = if query.cascade {
        state.scheduler.terminate_cascade(id).await?
    } else {
        vec![state.scheduler.terminate(id).await?]
    };
    Ok(Json(json!({ "stopped": stopped })))
}

async fn purge_tasks(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<PurgeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.scheduler.purge(query.status).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn request_run(
    State(state): State<Arc<AdminState>>,
    Path(task_type): Path<String>,
    Query(query): Query<RunQuery>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let priority = if query.immediate {
        Priority::Immediate
    } else {
        Priority::Normal
    };
    let task_id = state.scheduler.request_run(&task_type, priority).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "task_id": task_id }))))
}

async fn tick(State(state): State<Arc<AdminState>>) -> Result<Json<TickReport>, ApiError> {
    Ok(Json(state.scheduler.tick().await?))
}

async fn list_advisories(
    State(state): State<Arc<AdminState>>,
) -> Result<Json<Vec<Advisory>>, ApiError> {
    Ok(Json(state.scheduler.advisories().await?))
}

async fn list_jobs(State(state): State<Arc<AdminState>>) -> Json<Vec<String>> {
    Json(
        state
            .scheduler
            .job_types()
            .into_iter()
            .map(String::from)
            .collect(),
    )
}

/// Start the admin server. Returns when the listener fails.
pub async fn run_server(state: Arc<AdminState>, port: u16) {
    let app = create_router(state);
    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(port, error = %e, "Failed to bind admin port");
            return;
        }
    };
    info!(port, "Serving admin API");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Admin server error");
    }
}
