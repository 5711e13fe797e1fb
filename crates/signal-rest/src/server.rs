use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{Method, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::handlers;
use crate::logging::LogControl;

const HEALTH_PATH: &str = "/v1/health";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub logging: LogControl,
}

pub fn build_app(state: AppState, config: &ServerConfig) -> Router {
    let api_v1 = Router::new()
        .route("/about", get(handlers::about))
        .route("/health", get(handlers::health))
        .route(
            "/configuration",
            get(handlers::get_configuration).post(handlers::set_configuration),
        )
        .route("/register/{number}", post(handlers::v1::register))
        .route(
            "/register/{number}/verify/{token}",
            post(handlers::v1::verify),
        )
        .route("/send", post(handlers::v1::send))
        .route("/receive/{number}", get(handlers::v1::receive))
        .route(
            "/groups/{number}",
            get(handlers::v1::list_groups).post(handlers::v1::create_group),
        )
        .route(
            "/groups/{number}/{groupid}",
            get(handlers::v1::get_group).delete(handlers::v1::delete_group),
        )
        .route(
            "/groups/{number}/{groupid}/block",
            post(handlers::v1::block_group),
        )
        .route(
            "/groups/{number}/{groupid}/join",
            post(handlers::v1::join_group),
        )
        .route(
            "/groups/{number}/{groupid}/quit",
            post(handlers::v1::quit_group),
        )
        .route("/qrcodelink", get(handlers::v1::qrcode_link))
        .route("/attachments", get(handlers::v1::list_attachments))
        .route(
            "/attachments/{attachment}",
            get(handlers::v1::serve_attachment).delete(handlers::v1::delete_attachment),
        )
        .route("/profiles/{number}", put(handlers::v1::update_profile))
        .route("/identities/{number}", get(handlers::v1::list_identities))
        .route(
            "/identities/{number}/trust/{numbertotrust}",
            put(handlers::v1::trust_identity),
        )
        .route("/react", post(handlers::v1::send_reaction))
        .method_not_allowed_fallback(method_not_allowed);

    let api_v2 = Router::new()
        .route("/send", post(handlers::v2::send))
        .method_not_allowed_fallback(method_not_allowed);

    Router::new()
        .nest("/v1", api_v1)
        .nest("/v2", api_v2)
        .fallback(route_not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_seconds),
        ))
        .layer(middleware::map_response(envelope_request_timeout))
        .layer(middleware::from_fn(log_request))
}

async fn route_not_found(uri: Uri) -> GatewayError {
    GatewayError::not_found(format!("no route for {}", uri.path()))
}

async fn method_not_allowed(method: Method, uri: Uri) -> GatewayError {
    GatewayError::MethodNotAllowed(format!("{method} is not supported on {}", uri.path()))
}

/// `TimeoutLayer` answers with a bare status; give it the error body.
async fn envelope_request_timeout(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT
        && !response.headers().contains_key(header::CONTENT_TYPE)
    {
        return GatewayError::RequestTimeout.into_response();
    }
    response
}

/// Log every request except health probes.
async fn log_request(req: Request, next: Next) -> Response {
    if req.uri().path() == HEALTH_PATH {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(req).await;
    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "Request handled"
    );
    response
}
