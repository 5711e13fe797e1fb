use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use signal_rest_types::{AboutResponse, Configuration, LoggingConfiguration};

use super::JsonBody;
use crate::error::GatewayError;
use crate::server::AppState;

const BUILD: u32 = 2;

/// GET /v1/about
pub async fn about() -> Json<AboutResponse> {
    Json(AboutResponse {
        versions: vec!["v1".to_string(), "v2".to_string()],
        build: BUILD,
    })
}

/// GET /v1/health
pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// GET /v1/configuration
pub async fn get_configuration(State(state): State<AppState>) -> Json<Configuration> {
    Json(Configuration {
        logging: LoggingConfiguration {
            level: state.logging.level().await.to_string(),
        },
    })
}

/// POST /v1/configuration
pub async fn set_configuration(
    State(state): State<AppState>,
    JsonBody(config): JsonBody<Configuration>,
) -> Result<StatusCode, GatewayError> {
    state.logging.set_level(&config.logging.level).await?;
    Ok(StatusCode::NO_CONTENT)
}
