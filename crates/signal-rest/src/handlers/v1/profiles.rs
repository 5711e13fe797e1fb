use axum::extract::State;
use axum::http::StatusCode;
use signal_rest_types::UpdateProfileRequest;

use crate::error::GatewayError;
use crate::handlers::{JsonBody, PathParams};
use crate::server::AppState;

/// PUT /v1/profiles/{number}
pub async fn update_profile(
    State(state): State<AppState>,
    PathParams(number): PathParams<String>,
    JsonBody(req): JsonBody<UpdateProfileRequest>,
) -> Result<StatusCode, GatewayError> {
    state
        .gateway
        .update_profile(&number, &req.name, req.base64_avatar.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
