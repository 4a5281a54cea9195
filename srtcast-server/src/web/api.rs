//! REST endpoints for monitoring and channel administration.
//!
//! The WebSocket protocol is the primary surface; these endpoints cover
//! health checks and channel CRUD for tooling that just wants plain HTTP.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::registry::RegistryError;
use crate::web::state::WebState;

fn registry_error_status(e: &RegistryError) -> StatusCode {
    match e {
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::DuplicateStreamName(_) => StatusCode::CONFLICT,
        RegistryError::EmptyLabel => StatusCode::BAD_REQUEST,
    }
}

/// `GET /health`.
pub async fn get_health(State(state): State<Arc<WebState>>) -> impl IntoResponse {
    let registry = state.engine.registry();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "time": Utc::now().to_rfc3339(),
        "clients": state.clients.count().await,
        "channels": registry.count().await,
        "activeChannels": registry.active_count().await,
    }))
}

/// `GET /api/channels`.
pub async fn get_channels(State(state): State<Arc<WebState>>) -> impl IntoResponse {
    let channels = state.engine.registry().list().await;
    Json(json!({ "channels": channels, "count": channels.len() }))
}

/// `GET /api/clients`.
pub async fn get_clients(State(state): State<Arc<WebState>>) -> impl IntoResponse {
    let clients = state.clients.list().await;
    Json(json!({ "clients": clients, "count": clients.len() }))
}

/// `GET /api/files`. Lists the server's videos directory.
pub async fn get_files(State(state): State<Arc<WebState>>) -> impl IntoResponse {
    Json(state.engine.list_files(&srtcast_protocol::Request::default()).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    pub label: String,
    #[serde(default)]
    pub video_path: String,
    #[serde(default)]
    pub stream_name: Option<String>,
}

/// `POST /api/channels`.
pub async fn create_channel(
    State(state): State<Arc<WebState>>,
    Json(body): Json<CreateChannelRequest>,
) -> impl IntoResponse {
    match state
        .engine
        .add_channel(&body.label, &body.video_path, body.stream_name.as_deref())
        .await
    {
        Ok(channel) => (StatusCode::CREATED, Json(json!({ "channel": channel }))),
        Err(e) => (
            registry_error_status(&e),
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChannelRequest {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub video_path: String,
    #[serde(default)]
    pub stream_name: String,
}

/// `POST /api/channel/:id`.
pub async fn update_channel(
    State(state): State<Arc<WebState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateChannelRequest>,
) -> impl IntoResponse {
    match state
        .engine
        .update_channel(&id, &body.label, &body.video_path, &body.stream_name)
        .await
    {
        Ok(channel) => (StatusCode::OK, Json(json!({ "channel": channel }))),
        Err(e) => (
            registry_error_status(&e),
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

/// `DELETE /api/channel/:id`. Stops any live session before removal.
pub async fn delete_channel(
    State(state): State<Arc<WebState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.engine.remove_channel(&id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "removed": id }))),
        Err(e) => (
            registry_error_status(&e),
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

/// `POST /api/channel/:id/start`. Uses the channel's configured or
/// last-played file.
pub async fn start_channel(
    State(state): State<Arc<WebState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    Json(state.engine.start_channel(&id).await)
}

/// `POST /api/channel/:id/stop`.
pub async fn stop_channel(
    State(state): State<Arc<WebState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    Json(state.engine.stop_channel(&id).await)
}
