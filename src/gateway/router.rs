//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Method, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::debug;

use super::auth::{AuthGuard, auth_middleware};
use crate::backend::AuthPassthrough;
use crate::config::ServerConfig;
use crate::model::{Identity, MinimalPredictionRequest, PredictionRequest};
use crate::service::PredictionService;
use crate::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Prediction, training and history operations
    pub service: PredictionService,
    /// Relay for account registration and login
    pub passthrough: AuthPassthrough,
}

/// Create the router
///
/// # Errors
///
/// Returns an error if the configured CORS origin is not a valid header value.
pub fn create_router(
    state: Arc<AppState>,
    guard: Arc<AuthGuard>,
    server: &ServerConfig,
) -> Result<Router> {
    let origin = HeaderValue::from_str(&server.cors_origin)
        .map_err(|e| Error::Config(format!("Invalid CORS origin: {e}")))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::AUTHORIZATION]);

    Ok(Router::new()
        .route("/health", get(health_handler))
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/api/v1/predict", post(predict_handler))
        .route("/api/v1/predict/minimal", post(predict_minimal_handler))
        .route("/api/v1/train", post(train_handler))
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/statistics/user", get(statistics_handler))
        // Authentication on matched routes only, so unknown paths stay 404
        .route_layer(middleware::from_fn_with_state(guard, auth_middleware))
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(server.max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// POST /auth/register - relayed to the identity service
async fn register_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match state.passthrough.register(body).await {
        Ok(forwarded) => forwarded.into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /auth/login - relayed to the identity service
async fn login_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match state.passthrough.login(body).await {
        Ok(forwarded) => forwarded.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Unwrap a JSON body or answer with a stable 400
fn parse_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        debug!(error = %rejection, "Rejected request body");
        Error::InvalidRequest("Invalid request format".to_string())
    })
}

/// POST /api/v1/predict
async fn predict_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    payload: std::result::Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = parse_body(payload)?;
    let outcome = state.service.predict(&identity, request).await?;
    Ok(Json(outcome))
}

/// POST /api/v1/predict/minimal
async fn predict_minimal_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    payload: std::result::Result<Json<MinimalPredictionRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = parse_body(payload)?;
    let outcome = state.service.predict_minimal(&identity, request).await?;
    Ok(Json(outcome))
}

/// POST /api/v1/train
async fn train_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    Ok(Json(state.service.train().await?))
}

/// GET /api/v1/status
async fn status_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    Ok(Json(state.service.model_status().await?))
}

/// GET /api/v1/statistics/user
async fn statistics_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.service.user_statistics(&identity).await?))
}
