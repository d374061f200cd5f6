//! The daemon's loopback HTTP surface: health, status, search, reindex, config.

use crate::daemon::DaemonContext;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use pommel_core::model::now_unix;
use pommel_core::search::{SearchRequest, SearchResponse};
use pommel_core::{CancellationToken, PommelError};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub fn router(ctx: DaemonContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/search", post(search))
        .route("/reindex", post(reindex))
        .route("/config", get(config))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

type ApiError = (StatusCode, Json<Value>);

fn error_body(err: &PommelError, status: StatusCode) -> ApiError {
    (status, Json(json!({ "error": err.to_string(), "code": err.code() })))
}

async fn health(State(ctx): State<DaemonContext>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "project_root": ctx.project_root.to_string_lossy(),
        "port": ctx.port,
        "timestamp": now_unix(),
    }))
}

async fn status(State(ctx): State<DaemonContext>) -> Result<Json<Value>, ApiError> {
    let (running, pid) = ctx
        .state_store
        .is_running()
        .map_err(|e| error_body(&e, StatusCode::INTERNAL_SERVER_ERROR))?;
    let stats = ctx.indexer.stats();
    Ok(Json(json!({
        "daemon": {
            "running": running,
            "pid": pid,
            "started_at": ctx.started_at_unix,
        },
        "index": {
            "total_files": stats.total_files,
            "total_chunks": stats.total_chunks,
            "indexing_active": stats.indexing_active,
            "last_indexed_at": stats.last_indexed_at_unix,
            "progress": stats.progress,
        },
    })))
}

async fn search(State(ctx): State<DaemonContext>, body: Result<Json<SearchRequest>, axum::extract::rejection::JsonRejection>) -> Result<Json<SearchResponse>, ApiError> {
    let Json(request) = body.map_err(|e| {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string(), "code": "CONFIG_INVALID" })))
    })?;

    let token = CancellationToken::new();
    let response = tokio::task::spawn_blocking(move || ctx.search_engine.search(&token, &request))
        .await
        .map_err(|e| {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string(), "code": "NOT_INITIALIZED" })))
        })?
        .map_err(|e| {
            let status = match e.code() {
                "CONFIG_INVALID" => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_body(&e, status)
        })?;

    Ok(Json(response))
}

async fn reindex(State(ctx): State<DaemonContext>) -> (StatusCode, Json<Value>) {
    let indexer = ctx.indexer.clone();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        let token = CancellationToken::new();
        let result = tokio::task::spawn_blocking(move || {
            if cancel.is_cancelled() {
                return Ok(());
            }
            indexer.reindex_all(&token)
        })
        .await;
        match result {
            Ok(Err(e)) => warn!(code = e.code(), error = %e, "reindex request failed"),
            Err(e) => warn!(error = %e, "reindex task panicked"),
            Ok(Ok(())) => {}
        }
    });
    (StatusCode::ACCEPTED, Json(json!({ "status": "started" })))
}

async fn config(State(ctx): State<DaemonContext>) -> Json<Value> {
    Json(json!({ "config": *ctx.config }))
}
