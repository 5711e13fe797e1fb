//! Registration handlers.

use axum::extract::State;
use axum::http::StatusCode;
use signal_rest_types::{RegisterRequest, VerifyRequest};

use crate::backend::RegisterOptions;
use crate::error::GatewayError;
use crate::handlers::{OptionalJsonBody, PathParams};
use crate::server::AppState;

/// POST /v1/register/{number}
pub async fn register(
    State(state): State<AppState>,
    PathParams(number): PathParams<String>,
    OptionalJsonBody(req): OptionalJsonBody<RegisterRequest>,
) -> Result<StatusCode, GatewayError> {
    let options = RegisterOptions {
        use_voice: req.use_voice,
        captcha: req.captcha.filter(|c| !c.trim().is_empty()),
    };
    state.gateway.register(&number, options).await?;
    Ok(StatusCode::CREATED)
}

/// POST /v1/register/{number}/verify/{token}
pub async fn verify(
    State(state): State<AppState>,
    PathParams((number, token)): PathParams<(String, String)>,
    OptionalJsonBody(req): OptionalJsonBody<VerifyRequest>,
) -> Result<StatusCode, GatewayError> {
    state.gateway.verify(&number, &token, req.pin).await?;
    Ok(StatusCode::CREATED)
}
