use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use signal_rest_types::{IdentityEntry, TrustIdentityRequest};

use crate::error::GatewayError;
use crate::handlers::{OptionalJsonBody, PathParams};
use crate::server::AppState;

/// GET /v1/identities/{number}
pub async fn list_identities(
    State(state): State<AppState>,
    PathParams(number): PathParams<String>,
) -> Result<Json<Vec<IdentityEntry>>, GatewayError> {
    Ok(Json(state.gateway.list_identities(&number).await?))
}

/// PUT /v1/identities/{number}/trust/{numbertotrust}
pub async fn trust_identity(
    State(state): State<AppState>,
    PathParams((number, number_to_trust)): PathParams<(String, String)>,
    OptionalJsonBody(req): OptionalJsonBody<TrustIdentityRequest>,
) -> Result<StatusCode, GatewayError> {
    state
        .gateway
        .trust_identity(&number, &number_to_trust, req.verified_safety_number)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
