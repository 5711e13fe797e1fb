//! V2 API handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use signal_rest_types::{SendMessageV2, SendResponse};

use crate::error::GatewayError;
use crate::handlers::JsonBody;
use crate::send::OutgoingMessage;
use crate::server::AppState;

/// POST /v2/send
pub async fn send(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<SendMessageV2>,
) -> Result<(StatusCode, Json<SendResponse>), GatewayError> {
    let message = OutgoingMessage::from_v2(req)?;
    let response = state.gateway.send(message).await?;
    Ok((StatusCode::CREATED, Json(response)))
}
