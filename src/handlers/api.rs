//! The `/api` operation surface.
//!
//! Both verbs accept the same JSON payload shape; the verb selects the
//! intent: GET carries the read operations (`help`, `query`, `license`),
//! POST carries the write operations (`update`, `create`). The body is
//! parsed leniently — an absent or unreadable body becomes an empty
//! payload, which fails authentication with the no-key envelope instead
//! of a transport error.

use axum::{Json, body::Bytes, extract::State};

use crate::AppState;
use crate::error::AppError;
use crate::models::operation::{Intent, OperationPayload};
use crate::services::response::Envelope;

/// `GET /api` — read-intent operations.
pub async fn api_get(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Envelope>, AppError> {
    let payload = OperationPayload::from_bytes(&body);
    let envelope = state.dispatcher.dispatch(Intent::Read, &payload).await?;
    Ok(Json(envelope))
}

/// `POST /api` — write-intent operations.
pub async fn api_post(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Envelope>, AppError> {
    let payload = OperationPayload::from_bytes(&body);
    let envelope = state.dispatcher.dispatch(Intent::Write, &payload).await?;
    Ok(Json(envelope))
}
