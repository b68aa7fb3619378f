//! Bearer-credential authentication
//!
//! [`Authenticator`] is what the HTTP layer calls for every protected
//! route. It consults the [`VerificationCache`] first and only falls back
//! to signature verification (or the remote identity service) on a miss.

pub mod cache;
pub mod claims;
pub mod identity;

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

pub use cache::{MAX_VERIFICATION_TTL, VerificationCache};
pub use claims::{ClaimsAuthenticator, parse_bearer};
pub use identity::{IdentityClient, TokenValidator};

use crate::model::Identity;

/// Why a request could not be authenticated
#[derive(Debug, Error)]
pub enum AuthError {
    /// Header absent or not exactly `Bearer <token>`
    #[error("malformed authorization header")]
    MalformedHeader,

    /// Credential declares an algorithm outside the HMAC family
    #[error("unexpected signing method: {0}")]
    UnexpectedSigningMethod(String),

    /// Credential does not decode or its signature does not verify
    #[error("invalid signature")]
    InvalidSignature,

    /// Credential's `exp` is not in the future
    #[error("credential expired")]
    Expired,

    /// Identity claim missing or not a UUID
    #[error("invalid identity claim")]
    InvalidIdentity,

    /// A cached or remote verdict said no
    #[error("credential rejected")]
    Rejected,

    /// The identity service could not produce a verdict
    #[error("identity service failure: {0}")]
    Upstream(#[source] crate::Error),
}

impl AuthError {
    /// Stable message returned to the caller
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MalformedHeader => "invalid authorization header format",
            Self::UnexpectedSigningMethod(_) | Self::InvalidSignature | Self::Rejected => {
                "invalid token"
            }
            Self::Expired => "token has expired",
            Self::InvalidIdentity => "invalid user ID",
            Self::Upstream(_) => "failed to validate token",
        }
    }

    /// Whether this is a verdict about the credential (cacheable) rather
    /// than a failure to reach one
    #[must_use]
    pub fn is_verdict(&self) -> bool {
        !matches!(self, Self::MalformedHeader | Self::Upstream(_))
    }
}

/// Cache-fronted credential verification
pub struct Authenticator {
    claims: ClaimsAuthenticator,
    cache: Arc<VerificationCache>,
    remote: Option<Arc<dyn TokenValidator>>,
}

impl Authenticator {
    /// Verify locally with `claims`, memoizing verdicts in `cache`.
    #[must_use]
    pub fn new(claims: ClaimsAuthenticator, cache: Arc<VerificationCache>) -> Self {
        Self {
            claims,
            cache,
            remote: None,
        }
    }

    /// Ask `validator` for verdicts instead of checking signatures locally.
    #[must_use]
    pub fn with_remote(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.remote = Some(validator);
        self
    }

    /// The verdict cache shared with the periodic sweeper
    #[must_use]
    pub fn cache(&self) -> &Arc<VerificationCache> {
        &self.cache
    }

    /// Authenticate a raw `Authorization` header value.
    ///
    /// Concurrent first-time verifications of the same credential are not
    /// coalesced: each caller gets the verdict it computed and the last
    /// writer wins in the cache.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<Identity, AuthError> {
        let token = parse_bearer(header)?;

        if let Some(valid) = self.cache.get(token) {
            debug!(valid, "Verification cache hit");
            return if valid {
                self.claims.identity_of(token)
            } else {
                // Report the same kind the first verification did
                self.claims
                    .identity_of(token)
                    .and(Err(AuthError::Rejected))
            };
        }

        let outcome = match &self.remote {
            Some(remote) => match remote.validate(token).await {
                Ok(true) => self.claims.identity_of(token),
                Ok(false) => Err(AuthError::Rejected),
                Err(e) => return Err(AuthError::Upstream(e)),
            },
            None => self.claims.verify(token),
        };

        match &outcome {
            Err(e) if !e.is_verdict() => {}
            _ => self.cache.set(token, outcome.is_ok()),
        }
        outcome
    }
}
