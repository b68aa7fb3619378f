//! Authentication middleware
//!
//! Every request outside the public paths must carry
//! `Authorization: Bearer <token>`. On success the caller's [`Identity`]
//! is injected into the request extensions for the handlers.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use crate::auth::{AuthError, Authenticator};
use crate::model::Identity;

/// Paths reachable without a credential by default
pub const DEFAULT_PUBLIC_PATHS: [&str; 3] = ["/health", "/auth/register", "/auth/login"];

/// State shared by [`auth_middleware`]
pub struct AuthGuard {
    authenticator: Arc<Authenticator>,
    public_paths: Vec<String>,
}

impl AuthGuard {
    /// Guard everything except `public_paths` with `authenticator`.
    #[must_use]
    pub fn new(authenticator: Arc<Authenticator>, public_paths: Vec<String>) -> Self {
        Self {
            authenticator,
            public_paths,
        }
    }

    /// Check if a path is public (bypasses auth)
    #[must_use]
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| {
            path.strip_prefix(p.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    State(guard): State<Arc<AuthGuard>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();

    if guard.is_public_path(&path) {
        debug!(path = %path, "Public path, skipping auth");
        return next.run(request).await;
    }

    let Some(value) = request.headers().get(header::AUTHORIZATION) else {
        warn!(path = %path, "Missing Authorization header");
        return unauthorized_response("authorization header is required");
    };
    let Ok(value) = value.to_str().map(str::to_owned) else {
        return auth_error_response(&AuthError::MalformedHeader);
    };

    let outcome = guard.authenticator.authenticate(Some(&value)).await;
    match outcome {
        Ok(identity) => {
            debug!(user = %identity.id, role = %identity.role, path = %path, "Authenticated request");
            request.extensions_mut().insert::<Identity>(identity);
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Authentication failed");
            auth_error_response(&e)
        }
    }
}

/// Map an authentication failure to its response
fn auth_error_response(err: &AuthError) -> Response {
    match err {
        AuthError::Upstream(upstream) => {
            let status = match upstream.status_code() {
                StatusCode::GATEWAY_TIMEOUT => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            };
            (status, Json(json!({ "error": err.public_message() }))).into_response()
        }
        _ => unauthorized_response(err.public_message()),
    }
}

/// Create a 401 Unauthorized response
fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(json!({ "error": message })),
    )
        .into_response()
}
