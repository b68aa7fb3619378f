//! HTTP collaborators behind the gateway
//!
//! [`PredictionClient`] speaks typed JSON to the prediction service.
//! [`AuthPassthrough`] relays register/login bodies to the identity service
//! untouched, so the gateway never parses or logs passwords.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::model::{
    MinimalPredictionRequest, ModelStatus, PredictionOutcome, PredictionRequest, TrainingReport,
};
use crate::{Error, Result};

const PREDICTION: &str = "prediction";
const IDENTITY: &str = "identity";

#[derive(Deserialize)]
struct BackendError {
    error: String,
}

fn build_client(service: &str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .build()
        .map_err(|e| Error::Config(format!("{service} client: {e}")))
}

fn join(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}

/// Typed client for the prediction service
#[derive(Debug, Clone)]
pub struct PredictionClient {
    http: Client,
    base_url: String,
}

impl PredictionClient {
    /// Create a client for `base_url`; every call is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(PREDICTION, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `POST /api/v1/predict`
    pub async fn predict(&self, request: &PredictionRequest) -> Result<PredictionOutcome> {
        self.send(self.http.post(join(&self.base_url, "/api/v1/predict")).json(request))
            .await
    }

    /// `POST /api/v1/predict/minimal`
    pub async fn predict_minimal(
        &self,
        request: &MinimalPredictionRequest,
    ) -> Result<PredictionOutcome> {
        self.send(
            self.http
                .post(join(&self.base_url, "/api/v1/predict/minimal"))
                .json(request),
        )
        .await
    }

    /// `POST /api/v1/train`
    pub async fn train(&self) -> Result<TrainingReport> {
        self.send(self.http.post(join(&self.base_url, "/api/v1/train")))
            .await
    }

    /// `GET /api/v1/status`
    pub async fn status(&self) -> Result<ModelStatus> {
        self.send(self.http.get(join(&self.base_url, "/api/v1/status")))
            .await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let started = tokio::time::Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| Error::from_transport(PREDICTION, &e))?;
        let status = response.status();
        debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis(),
            "Prediction service responded"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<BackendError>(&body)
                .map_or_else(|_| format!("status {}", status.as_u16()), |e| e.error);
            warn!(status = status.as_u16(), error = %message, "Prediction service error");
            return Err(Error::Upstream {
                service: PREDICTION,
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::from_transport(PREDICTION, &e))
    }
}

/// An upstream answer relayed verbatim
#[derive(Debug)]
pub struct Forwarded {
    /// Upstream status
    pub status: StatusCode,
    /// Upstream `Content-Type`, if any
    pub content_type: Option<HeaderValue>,
    /// Upstream body
    pub body: Bytes,
}

impl IntoResponse for Forwarded {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        if let Some(content_type) = self.content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

/// POST `body` to `url` and hand back whatever comes back.
///
/// Only transport failures are errors; any upstream status is relayed.
pub async fn forward(
    http: &Client,
    service: &'static str,
    url: &str,
    body: Bytes,
) -> Result<Forwarded> {
    let response = http
        .post(url)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| Error::from_transport(service, &e))?;

    let status = response.status();
    let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::from_transport(service, &e))?;
    debug!(service, status = status.as_u16(), "Relayed upstream response");

    Ok(Forwarded {
        status,
        content_type,
        body,
    })
}

/// Relay of the identity service's public account endpoints
#[derive(Debug, Clone)]
pub struct AuthPassthrough {
    http: Client,
    base_url: String,
}

impl AuthPassthrough {
    /// Create a relay for `base_url`; every call is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(IDENTITY, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Relay to `/auth/register`
    pub async fn register(&self, body: Bytes) -> Result<Forwarded> {
        forward(&self.http, IDENTITY, &join(&self.base_url, "/auth/register"), body).await
    }

    /// Relay to `/auth/login`
    pub async fn login(&self, body: Bytes) -> Result<Forwarded> {
        forward(&self.http, IDENTITY, &join(&self.base_url, "/auth/login"), body).await
    }
}
