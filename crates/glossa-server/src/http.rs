use std::future::Future;
use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use glossa_core::{ContentValidator, UnitStoreError};
use glossa_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};
use glossa_wire::{
    BatchTranslationRequest, CommitRequest, ConflictEnvelope, CreateProjectRequest, ErrorEnvelope,
    SearchRequest, TaskEnvelope, UnitEnvelope, ValidateRequest, CODE_INVALID_REQUEST,
    CODE_TASK_NOT_FOUND, CODE_UNIT_NOT_FOUND, CODE_VERSION_CONFLICT,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::Level;

use crate::AppState;

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "glossa-server: listening");
    serve_on(listener, state, async {
        if tokio::signal::ctrl_c().await.is_err() {
            futures::future::pending::<()>().await;
        }
    })
    .await
}

pub async fn serve_on(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/units", get(list_units))
        .route("/units/{id}", get(get_unit).put(commit_unit))
        .route("/validate", post(validate))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/batch-translation", post(start_batch_translation))
        .route("/projects", post(create_project))
        .route("/search", post(start_search))
        .layer(cors)
        .with_state(state)
}

fn error_response(status: StatusCode, code: &str, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            error: error.into(),
            code: Some(code.to_string()),
        }),
    )
        .into_response()
}

fn unit_not_found(unit_id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        CODE_UNIT_NOT_FOUND,
        format!("unit not found: {unit_id}"),
    )
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn list_units(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "units": state.units.list().await }))
}

async fn get_unit(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.units.get(&id).await {
        Some(unit) => Json(UnitEnvelope { unit }).into_response(),
        None => unit_not_found(&id),
    }
}

async fn commit_unit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<CommitRequest>,
) -> Response {
    let result = state
        .units
        .commit(
            &id,
            &input.payload,
            &input.expected_version_token,
            input.override_conflict,
        )
        .await;
    match result {
        Ok(unit) => {
            let detail = input
                .payload
                .content
                .as_deref()
                .map(redact_text)
                .unwrap_or_default();
            emit_event(
                Level::INFO,
                ProcessKind::Server,
                ObservabilityEvent {
                    unit_id: Some(&id),
                    ..ObservabilityEvent::new("unit.committed", "glossa-server")
                }
                .status(unit.status.as_str())
                .detail(&detail),
            );
            Json(UnitEnvelope { unit }).into_response()
        }
        Err(UnitStoreError::VersionConflict(snapshot)) => {
            emit_event(
                Level::INFO,
                ProcessKind::Server,
                ObservabilityEvent {
                    unit_id: Some(&id),
                    ..ObservabilityEvent::new("unit.version_conflict", "glossa-server")
                }
                .error_code(CODE_VERSION_CONFLICT)
                .detail(snapshot.version_token.as_str()),
            );
            (StatusCode::CONFLICT, Json(ConflictEnvelope::new(snapshot))).into_response()
        }
        Err(UnitStoreError::NotFound { unit_id }) => unit_not_found(&unit_id),
    }
}

async fn validate(
    State(state): State<AppState>,
    Json(input): Json<ValidateRequest>,
) -> Response {
    match state.units.validate(&input.unit_id, &input.content).await {
        Ok(result) => Json(result).into_response(),
        Err(_) => unit_not_found(&input.unit_id),
    }
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.tasks.get(&id).await {
        Some(task) => Json(TaskEnvelope { task }).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            CODE_TASK_NOT_FOUND,
            format!("task not found: {id}"),
        ),
    }
}

async fn start_batch_translation(
    State(state): State<AppState>,
    Json(input): Json<BatchTranslationRequest>,
) -> Response {
    if input.unit_ids.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            CODE_INVALID_REQUEST,
            "unit_ids must not be empty",
        );
    }
    let task = state.start_batch_translation(input.unit_ids).await;
    (StatusCode::ACCEPTED, Json(TaskEnvelope { task })).into_response()
}

async fn create_project(
    State(state): State<AppState>,
    Json(input): Json<CreateProjectRequest>,
) -> Response {
    let task = state
        .start_project_creation(input.name, input.source_locale, input.target_locales)
        .await;
    (StatusCode::ACCEPTED, Json(TaskEnvelope { task })).into_response()
}

async fn start_search(
    State(state): State<AppState>,
    Json(input): Json<SearchRequest>,
) -> Response {
    let task = state.start_search(input.query).await;
    (StatusCode::ACCEPTED, Json(TaskEnvelope { task })).into_response()
}
