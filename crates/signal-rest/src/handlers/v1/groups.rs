//! Group handlers. Group ids in paths use the API form (`group.<base64>`).

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use signal_rest_types::{CreateGroupRequest, CreateGroupResponse, GroupEntry};

use crate::error::GatewayError;
use crate::gateway::GroupAction;
use crate::handlers::{JsonBody, PathParams};
use crate::server::AppState;

/// POST /v1/groups/{number}
pub async fn create_group(
    State(state): State<AppState>,
    PathParams(number): PathParams<String>,
    JsonBody(req): JsonBody<CreateGroupRequest>,
) -> Result<(StatusCode, Json<CreateGroupResponse>), GatewayError> {
    let created = state
        .gateway
        .create_group(&number, &req.name, req.members)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /v1/groups/{number}
pub async fn list_groups(
    State(state): State<AppState>,
    PathParams(number): PathParams<String>,
) -> Result<Json<Vec<GroupEntry>>, GatewayError> {
    Ok(Json(state.gateway.list_groups(&number).await?))
}

/// GET /v1/groups/{number}/{groupid}
pub async fn get_group(
    State(state): State<AppState>,
    PathParams((number, group_id)): PathParams<(String, String)>,
) -> Result<Json<GroupEntry>, GatewayError> {
    Ok(Json(state.gateway.get_group(&number, &group_id).await?))
}

async fn apply(
    state: &AppState,
    number: &str,
    group_id: &str,
    action: GroupAction,
) -> Result<StatusCode, GatewayError> {
    state.gateway.group_action(number, group_id, action).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/groups/{number}/{groupid}
pub async fn delete_group(
    State(state): State<AppState>,
    PathParams((number, group_id)): PathParams<(String, String)>,
) -> Result<StatusCode, GatewayError> {
    apply(&state, &number, &group_id, GroupAction::Delete).await
}

/// POST /v1/groups/{number}/{groupid}/block
pub async fn block_group(
    State(state): State<AppState>,
    PathParams((number, group_id)): PathParams<(String, String)>,
) -> Result<StatusCode, GatewayError> {
    apply(&state, &number, &group_id, GroupAction::Block).await
}

/// POST /v1/groups/{number}/{groupid}/join
pub async fn join_group(
    State(state): State<AppState>,
    PathParams((number, group_id)): PathParams<(String, String)>,
) -> Result<StatusCode, GatewayError> {
    apply(&state, &number, &group_id, GroupAction::Join).await
}

/// POST /v1/groups/{number}/{groupid}/quit
pub async fn quit_group(
    State(state): State<AppState>,
    PathParams((number, group_id)): PathParams<(String, String)>,
) -> Result<StatusCode, GatewayError> {
    apply(&state, &number, &group_id, GroupAction::Quit).await
}
