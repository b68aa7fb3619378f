//! Remote identity-service verification
//!
//! The identity service owns credential issuance and revocation. When it is
//! configured as the verifier, the gateway asks it for a yes/no verdict and
//! only reads claims locally to learn who the caller is.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Something that can answer "is this credential currently valid?"
#[async_trait]
pub trait TokenValidator: Send + Sync + 'static {
    /// Ask for a verdict on `token`.
    ///
    /// `Ok(false)` is a definitive rejection; `Err` means no verdict could be
    /// obtained (connectivity, timeout, unexpected reply).
    async fn validate(&self, token: &str) -> Result<bool>;
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct ValidateResponse {
    valid: bool,
}

/// HTTP client for the identity service's validation endpoint
#[derive(Debug, Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    validate_url: String,
}

impl IdentityClient {
    /// Create a client for `base_url` with a per-call `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("identity client: {e}")))?;
        Ok(Self {
            http,
            validate_url: format!("{}/auth/validate", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl TokenValidator for IdentityClient {
    async fn validate(&self, token: &str) -> Result<bool> {
        let response = self
            .http
            .post(&self.validate_url)
            .json(&ValidateRequest { token })
            .send()
            .await
            .map_err(|e| Error::from_transport("identity", &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream {
                service: "identity",
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: ValidateResponse = response
            .json()
            .await
            .map_err(|e| Error::from_transport("identity", &e))?;
        debug!(valid = body.valid, "Identity service verdict");
        Ok(body.valid)
    }
}
