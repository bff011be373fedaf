//! Sync endpoint routes.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use tandem_engine::{ChunkReport, ChunkRequest, Side};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_chunk, handle_event, EventResponse, WebhookEvent};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events/{side}", post(event_handler))
        .route("/sync/chunk", post(chunk_handler))
}

/// POST /events/{side} - One change event from the CRM or the content store.
async fn event_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(side): Path<Side>,
    Json(webhook): Json<WebhookEvent>,
) -> Result<Json<EventResponse>> {
    let response = handle_event(&state.sync, side, webhook).await?;
    Ok(Json(response))
}

/// POST /sync/chunk - One batch step.
async fn chunk_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<ChunkRequest>,
) -> Result<Json<ChunkReport>> {
    let report = handle_chunk(&state.sync, request).await?;
    Ok(Json(report))
}
