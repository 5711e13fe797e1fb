//! Handlers for attachments the backend has persisted.

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::handlers::PathParams;
use crate::server::AppState;

/// GET /v1/attachments
pub async fn list_attachments(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, GatewayError> {
    Ok(Json(state.gateway.list_attachments().await?))
}

/// GET /v1/attachments/{attachment}
pub async fn serve_attachment(
    State(state): State<AppState>,
    PathParams(name): PathParams<String>,
) -> Result<Response, GatewayError> {
    let file = state.gateway.read_attachment(&name).await?;
    Ok(([(header::CONTENT_TYPE, file.content_type)], file.bytes).into_response())
}

/// DELETE /v1/attachments/{attachment}
pub async fn delete_attachment(
    State(state): State<AppState>,
    PathParams(name): PathParams<String>,
) -> Result<StatusCode, GatewayError> {
    state.gateway.delete_attachment(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
