//! Message handlers.

use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use signal_rest_types::{ReactionRequest, SendMessageV1, SendResponse};

use crate::error::GatewayError;
use crate::handlers::{JsonBody, PathParams, QueryParams};
use crate::send::OutgoingMessage;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ReceiveParams {
    /// Seconds to wait for new messages.
    timeout: Option<u64>,
}

/// POST /v1/send
pub async fn send(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<SendMessageV1>,
) -> Result<(StatusCode, Json<SendResponse>), GatewayError> {
    let message = OutgoingMessage::from_v1(req)?;
    let response = state.gateway.send(message).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /v1/receive/{number}
pub async fn receive(
    State(state): State<AppState>,
    PathParams(number): PathParams<String>,
    QueryParams(params): QueryParams<ReceiveParams>,
) -> Result<Json<Vec<serde_json::Value>>, GatewayError> {
    let timeout = params.timeout.map(Duration::from_secs);
    let messages = state.gateway.receive(&number, timeout).await?;
    Ok(Json(messages))
}

/// POST /v1/react
pub async fn send_reaction(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<ReactionRequest>,
) -> Result<StatusCode, GatewayError> {
    state.gateway.send_reaction(req).await?;
    Ok(StatusCode::NO_CONTENT)
}
