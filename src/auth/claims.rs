//! Signed-credential verification.
//!
//! # Verification flow
//!
//! 1. Split the `Authorization` header into exactly `Bearer` and a token.
//! 2. Decode the JWT header and refuse anything outside the HMAC family
//!    (guards against `alg: none` / RS-HS confusion).
//! 3. Verify the signature against the configured secret.
//! 4. Compare `exp` with the current instant, zero leeway, exactly once.
//! 5. Parse the identity claim as a UUID and return an [`Identity`].
//!
//! The authenticator holds no mutable state. Memoization of verdicts lives
//! in [`super::cache::VerificationCache`] at the call site.

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, Validation,
    errors::{Error as JwtError, ErrorKind},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuthError;
use crate::model::Identity;

/// Algorithms accepted for gateway credentials
pub const ACCEPTED_ALGORITHMS: [Algorithm; 3] =
    [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Claims carried by a gateway credential.
///
/// `user_id` is what the identity service issues; `sub` is accepted as a
/// fallback so that standard JWT tooling can mint test credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Identity claim (UUID string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Standard subject claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// E-mail address (informational only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Role claim
    #[serde(default)]
    pub role: String,
    /// Expiry (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Split a raw `Authorization` header value into its bearer token.
///
/// Exactly two space-separated parts are required, the first being
/// `Bearer` (case-sensitive). An absent header is malformed too.
pub fn parse_bearer(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MalformedHeader)?;
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::MalformedHeader),
    }
}

/// Verifies HMAC-signed credentials against a shared secret
pub struct ClaimsAuthenticator {
    key: DecodingKey,
}

impl std::fmt::Debug for ClaimsAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimsAuthenticator").finish_non_exhaustive()
    }
}

impl ClaimsAuthenticator {
    /// Create from the shared signing secret
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
        }
    }

    /// Full header-to-identity verification (steps 1-5).
    pub fn authenticate(&self, header: Option<&str>) -> Result<Identity, AuthError> {
        let token = parse_bearer(header)?;
        self.verify(token)
    }

    /// Verify a bare token at the current instant.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify a bare token against an explicit clock reading (Unix seconds).
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Identity, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| AuthError::InvalidSignature)?;
        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::UnexpectedSigningMethod(format!("{:?}", header.alg)));
        }

        let mut validation = Validation::new(header.alg);
        validation.algorithms = vec![header.alg];
        Self::relax_builtin_checks(&mut validation);

        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &validation)
            .map_err(map_decode_error)?;
        identity_from_claims(&data.claims, now)
    }

    /// Read the identity of a token whose signature verdict is already known.
    ///
    /// Used after a cached positive verdict or a positive answer from the
    /// remote identity service. Expiry and identity shape are still enforced.
    pub fn identity_of(&self, token: &str) -> Result<Identity, AuthError> {
        self.identity_of_at(token, Utc::now().timestamp())
    }

    /// [`Self::identity_of`] against an explicit clock reading.
    #[allow(clippy::unused_self)]
    pub fn identity_of_at(&self, token: &str, now: i64) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::dangerous::insecure_decode::<Claims>(token)
            .map_err(map_decode_error)?;
        identity_from_claims(&data.claims, now)
    }

    /// Expiry is compared by hand so there is a single, zero-tolerance check.
    fn relax_builtin_checks(validation: &mut Validation) {
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims.clear();
    }
}

fn identity_from_claims(claims: &Claims, now: i64) -> Result<Identity, AuthError> {
    match claims.exp {
        Some(exp) if exp > now => {}
        _ => return Err(AuthError::Expired),
    }

    let raw = claims
        .user_id
        .as_deref()
        .or(claims.sub.as_deref())
        .ok_or(AuthError::InvalidIdentity)?;
    let id = Uuid::parse_str(raw).map_err(|_| AuthError::InvalidIdentity)?;

    Ok(Identity {
        id,
        role: claims.role.clone(),
    })
}

fn map_decode_error(err: JwtError) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            AuthError::UnexpectedSigningMethod("mismatched".to_string())
        }
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::Json(_) => AuthError::InvalidIdentity,
        _ => AuthError::InvalidSignature,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{SECRET, mint, mint_with};
    use super::*;

    const NOW: i64 = 1_800_000_000;
    const USER: &str = "5f0c7d1e-7a53-4b8e-9d6c-1f2e3a4b5c6d";

    fn authenticator() -> ClaimsAuthenticator {
        ClaimsAuthenticator::new(SECRET)
    }

    #[test]
    fn parse_bearer_accepts_exactly_two_parts() {
        assert_eq!(parse_bearer(Some("Bearer abc")).unwrap(), "abc");
        assert!(matches!(parse_bearer(None), Err(AuthError::MalformedHeader)));
        assert!(matches!(parse_bearer(Some("")), Err(AuthError::MalformedHeader)));
        assert!(matches!(parse_bearer(Some("Bearer")), Err(AuthError::MalformedHeader)));
        assert!(matches!(parse_bearer(Some("Bearer ")), Err(AuthError::MalformedHeader)));
        assert!(matches!(parse_bearer(Some("Token abc")), Err(AuthError::MalformedHeader)));
        assert!(matches!(parse_bearer(Some("bearer abc")), Err(AuthError::MalformedHeader)));
        assert!(matches!(parse_bearer(Some("Bearer a b")), Err(AuthError::MalformedHeader)));
        assert!(matches!(parse_bearer(Some("Bearer  abc")), Err(AuthError::MalformedHeader)));
    }

    #[test]
    fn valid_token_yields_identity() {
        let token = mint(USER, "user", NOW + 60);
        let identity = authenticator().verify_at(&token, NOW).unwrap();
        assert_eq!(identity.id.to_string(), USER);
        assert_eq!(identity.role, "user");
    }

    #[test]
    fn all_hmac_variants_are_accepted() {
        for alg in ACCEPTED_ALGORITHMS {
            let token = mint_with(alg, SECRET, USER, "admin", Some(NOW + 60));
            assert!(authenticator().verify_at(&token, NOW).is_ok(), "{alg:?}");
        }
    }

    #[test]
    fn wrong_secret_is_invalid_signature() {
        let token = mint_with(Algorithm::HS256, b"other-secret", USER, "user", Some(NOW + 60));
        assert!(matches!(
            authenticator().verify_at(&token, NOW),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn garbage_token_is_invalid_signature() {
        assert!(matches!(
            authenticator().verify_at("abc", NOW),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn non_hmac_algorithm_is_rejected_before_signature_check() {
        // Header claims RS256 with an HMAC-looking body
        let token = mint(USER, "user", NOW + 60);
        let mut parts: Vec<&str> = token.split('.').collect();
        // {"typ":"JWT","alg":"RS256"}
        let forged_header = "eyJ0eXAiOiJKV1QiLCJhbGciOiJSUzI1NiJ9";
        parts[0] = forged_header;
        let forged = parts.join(".");
        assert!(matches!(
            authenticator().verify_at(&forged, NOW),
            Err(AuthError::UnexpectedSigningMethod(_))
        ));
    }

    #[test]
    fn expiry_is_checked_with_zero_leeway() {
        let token = mint(USER, "user", NOW);
        assert!(matches!(
            authenticator().verify_at(&token, NOW),
            Err(AuthError::Expired)
        ));
        assert!(authenticator().verify_at(&token, NOW - 1).is_ok());
    }

    #[test]
    fn missing_expiry_counts_as_expired() {
        let token = mint_with(Algorithm::HS256, SECRET, USER, "user", None);
        assert!(matches!(
            authenticator().verify_at(&token, NOW),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn non_uuid_identity_is_rejected() {
        let token = mint("not-a-uuid", "user", NOW + 60);
        assert!(matches!(
            authenticator().verify_at(&token, NOW),
            Err(AuthError::InvalidIdentity)
        ));
    }

    #[test]
    fn identity_of_skips_signature_but_keeps_expiry() {
        let token = mint_with(Algorithm::HS256, b"issued-elsewhere", USER, "user", Some(NOW + 60));
        let identity = authenticator().identity_of_at(&token, NOW).unwrap();
        assert_eq!(identity.id.to_string(), USER);

        assert!(matches!(
            authenticator().identity_of_at(&token, NOW + 61),
            Err(AuthError::Expired)
        ));
        assert!(matches!(
            authenticator().identity_of_at("abc", NOW),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn authenticate_reports_malformed_header_before_anything_else() {
        for header in ["", "Token abc", "Bearer"] {
            assert!(
                matches!(
                    authenticator().authenticate(Some(header)),
                    Err(AuthError::MalformedHeader)
                ),
                "{header:?}"
            );
        }
    }
}
