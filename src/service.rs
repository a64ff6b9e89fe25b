//! HTTP surface: JSON reply, plain-chunk stream and SSE stream over one shared pipeline.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{error, info};

use crate::adapters::{plain_body, sse_events};
use crate::pipeline::HelpdeskPipeline;

/// Text served on `GET /`.
pub const BANNER: &str = "IT Helpdesk API is running.";

#[derive(Clone)]
struct AppState {
    pipeline: Arc<HelpdeskPipeline>,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    reply: String,
}

#[derive(Debug, Deserialize)]
struct ChatParams {
    query: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

/// Builds the router with CORS restricted to `allowed_origins`.
pub fn router(pipeline: Arc<HelpdeskPipeline>, allowed_origins: &[String]) -> Result<Router> {
    let state = AppState { pipeline };
    Ok(Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/query", post(query_handler))
        .route("/chat", post(chat_handler))
        .route("/chat-sse", get(chat_sse_handler))
        .layer(cors_layer(allowed_origins)?)
        .with_state(state))
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let origins = allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("invalid CORS origin {origin:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    // credentials rule out wildcards, so methods and headers echo the preflight request
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

async fn banner() -> &'static str {
    BANNER
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn query_handler(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) =
        payload.map_err(|err| bad_request(format!("Invalid JSON body: {}", err.body_text())))?;
    let message = non_blank(request.message.as_deref())
        .ok_or_else(|| bad_request("Missing 'message'"))?;
    info!(endpoint = "/query", chars = message.chars().count(), "helpdesk query");
    let reply = state.pipeline.reply(message).await.map_err(|err| {
        error!(error = %err, "generation failed");
        internal_error(format!("LLM error: {err}"))
    })?;
    Ok(Json(QueryResponse { reply }))
}

async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let payload: Value =
        serde_json::from_slice(&body).map_err(|_| bad_request("Invalid JSON body"))?;
    let query = non_blank(payload.get("query").and_then(Value::as_str))
        .or_else(|| non_blank(payload.get("message").and_then(Value::as_str)))
        .ok_or_else(|| bad_request("Missing 'query' or 'message'"))?;
    info!(endpoint = "/chat", chars = query.chars().count(), "helpdesk query");
    let units = state.pipeline.stream_reply(query).await;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(plain_body(units)),
    )
        .into_response())
}

async fn chat_sse_handler(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
) -> Result<Response, ApiError> {
    let query = non_blank(params.query.as_deref())
        .or_else(|| non_blank(params.message.as_deref()))
        .ok_or_else(|| bad_request("Missing 'query' or 'message'"))?;
    info!(endpoint = "/chat-sse", chars = query.chars().count(), "helpdesk query");
    let units = state.pipeline.stream_reply(query).await;
    Ok(Sse::new(sse_events(units))
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|text| !text.is_empty())
}

fn bad_request(detail: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            detail: detail.into(),
        }),
    )
}

fn internal_error(detail: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            detail: detail.into(),
        }),
    )
}
