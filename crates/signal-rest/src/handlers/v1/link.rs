use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::GatewayError;
use crate::handlers::QueryParams;
use crate::qr;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LinkParams {
    #[serde(default)]
    device_name: String,
}

/// GET /v1/qrcodelink?device_name=
pub async fn qrcode_link(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<LinkParams>,
) -> Result<Response, GatewayError> {
    let uri = state.gateway.link(&params.device_name).await?;
    let png = qr::render_png(&uri)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}
