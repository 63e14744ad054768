//! JWT utilities for user credentials presented on the socket handshake.
//!
//! This module provides:
//! - Size limits for DoS prevention
//! - Clock skew constants for iat validation
//! - The user claims carried by socket credentials
//! - HS256 verification against a shared secret
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only HS256 is accepted; the header algorithm is checked before the
//!   signature so `none` and asymmetric algorithms never reach the decoder
//! - Generic error messages prevent information leakage
//! - The `email` field in claims is redacted in Debug output
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::verify_hs256;
//!
//! let claims = verify_hs256(token, secret.expose_secret().as_bytes())?;
//! println!("authenticated user {}", claims.id);
//! ```

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Tokens larger than this are rejected BEFORE base64 decoding or signature
/// verification. A typical socket credential is 200-300 bytes.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (5 minutes per NIST SP 800-63B).
///
/// Tokens with `iat` more than this amount in the future are rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT validation.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Header names an algorithm other than HS256.
    #[error("The access token is invalid or expired")]
    UnsupportedAlgorithm,

    /// Signature does not match the shared secret.
    #[error("The access token is invalid or expired")]
    InvalidSignature,

    /// `exp` is in the past.
    #[error("The access token is invalid or expired")]
    Expired,

    /// `id` or `email` is missing or empty.
    #[error("The access token is invalid or expired")]
    MissingClaims,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Claims Types
// =============================================================================

/// Claims carried by a user socket credential.
///
/// `exp` and `iat` are optional: credentials minted by the login route carry
/// `iat` and may omit `exp`. When `exp` is present it is enforced.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// User identifier.
    pub id: String,

    /// Account email - redacted in Debug output.
    pub email: String,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Expiration timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("id", &self.id)
            .field("email", &"[REDACTED]")
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .finish()
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Reject tokens over [`MAX_JWT_SIZE_BYTES`].
///
/// # Errors
///
/// Returns `JwtValidationError::TokenTooLarge` if the token is oversized.
pub fn check_token_size(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }
    Ok(())
}

/// Verify an HS256 user credential against `secret` and return its claims.
///
/// Order of checks: size, header algorithm, signature and `exp`, required
/// claims, then `iat` against [`DEFAULT_CLOCK_SKEW`].
///
/// # Errors
///
/// Returns a `JwtValidationError` variant describing the first failed check.
/// All variants share the same client-facing message.
pub fn verify_hs256(token: &str, secret: &[u8]) -> Result<UserClaims, JwtValidationError> {
    check_token_size(token)?;

    let header = decode_header(token).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header");
        JwtValidationError::MalformedToken
    })?;
    if header.alg != Algorithm::HS256 {
        tracing::debug!(
            target: "common.jwt",
            alg = ?header.alg,
            "Token rejected: unsupported algorithm"
        );
        return Err(JwtValidationError::UnsupportedAlgorithm);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims = HashSet::new();
    validation.validate_exp = true;
    validation.leeway = 0;

    let data = decode::<UserClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, "Token verification failed");
            match e.kind() {
                ErrorKind::InvalidSignature => JwtValidationError::InvalidSignature,
                ErrorKind::ExpiredSignature => JwtValidationError::Expired,
                ErrorKind::Json(_) | ErrorKind::MissingRequiredClaim(_) => {
                    JwtValidationError::MissingClaims
                }
                _ => JwtValidationError::MalformedToken,
            }
        })?;

    let claims = data.claims;
    if claims.id.trim().is_empty() || claims.email.trim().is_empty() {
        return Err(JwtValidationError::MissingClaims);
    }
    if let Some(iat) = claims.iat {
        validate_iat(iat, DEFAULT_CLOCK_SKEW)?;
    }

    Ok(claims)
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if the iat timestamp is more than
/// `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // clock skew is at most a few minutes
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_possible_wrap)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &[u8] = b"jwt-test-secret";

    fn sign(claims: &serde_json::Value, secret: &[u8]) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    // -------------------------------------------------------------------------
    // Constants Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_max_jwt_size_is_8kb() {
        assert_eq!(MAX_JWT_SIZE_BYTES, 8192);
    }

    #[test]
    fn test_default_clock_skew_is_5_minutes() {
        assert_eq!(DEFAULT_CLOCK_SKEW, Duration::from_secs(300));
    }

    // -------------------------------------------------------------------------
    // verify_hs256 Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_verify_valid_token_without_exp() {
        let token = sign(&json!({"id": "u1", "email": "a@example.com", "iat": now()}), SECRET);

        let claims = verify_hs256(&token, SECRET).unwrap();
        assert_eq!(claims.id, "u1");
        assert_eq!(claims.email, "a@example.com");
        assert!(claims.exp.is_none());
    }

    #[test]
    fn test_verify_valid_token_with_future_exp() {
        let token = sign(
            &json!({"id": "u1", "email": "a@example.com", "exp": now() + 3600}),
            SECRET,
        );
        assert!(verify_hs256(&token, SECRET).is_ok());
    }

    #[test]
    fn test_verify_expired_token() {
        let token = sign(
            &json!({"id": "u1", "email": "a@example.com", "exp": now() - 10}),
            SECRET,
        );
        assert_eq!(
            verify_hs256(&token, SECRET).unwrap_err(),
            JwtValidationError::Expired
        );
    }

    #[test]
    fn test_verify_wrong_secret() {
        let token = sign(&json!({"id": "u1", "email": "a@example.com"}), b"other-secret");
        assert_eq!(
            verify_hs256(&token, SECRET).unwrap_err(),
            JwtValidationError::InvalidSignature
        );
    }

    #[test]
    fn test_verify_missing_claims() {
        let token = sign(&json!({"email": "a@example.com"}), SECRET);
        assert_eq!(
            verify_hs256(&token, SECRET).unwrap_err(),
            JwtValidationError::MissingClaims
        );

        let token = sign(&json!({"id": "", "email": "a@example.com"}), SECRET);
        assert_eq!(
            verify_hs256(&token, SECRET).unwrap_err(),
            JwtValidationError::MissingClaims
        );
    }

    #[test]
    fn test_verify_rejects_alg_none() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(r#"{"id":"u1","email":"a@example.com"}"#);
        let token = format!("{header}.{payload}.");

        // jsonwebtoken has no `none` variant, so the header fails to parse
        assert_eq!(
            verify_hs256(&token, SECRET).unwrap_err(),
            JwtValidationError::MalformedToken
        );
    }

    #[test]
    fn test_verify_rejects_other_hmac_algorithm() {
        let token = encode(
            &Header::new(Algorithm::HS512),
            &json!({"id": "u1", "email": "a@example.com"}),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert_eq!(
            verify_hs256(&token, SECRET).unwrap_err(),
            JwtValidationError::UnsupportedAlgorithm
        );
    }

    #[test]
    fn test_verify_malformed_token() {
        assert_eq!(
            verify_hs256("not-a-jwt", SECRET).unwrap_err(),
            JwtValidationError::MalformedToken
        );
        assert_eq!(
            verify_hs256("", SECRET).unwrap_err(),
            JwtValidationError::MalformedToken
        );
    }

    #[test]
    fn test_verify_oversized_token() {
        let oversized = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            verify_hs256(&oversized, SECRET).unwrap_err(),
            JwtValidationError::TokenTooLarge
        );
    }

    #[test]
    fn test_verify_iat_in_future() {
        let token = sign(
            &json!({"id": "u1", "email": "a@example.com", "iat": now() + 3600}),
            SECRET,
        );
        assert_eq!(
            verify_hs256(&token, SECRET).unwrap_err(),
            JwtValidationError::IatTooFarInFuture
        );
    }

    #[test]
    fn test_all_errors_share_generic_message() {
        let msg = JwtValidationError::TokenTooLarge.to_string();
        for e in [
            JwtValidationError::MalformedToken,
            JwtValidationError::UnsupportedAlgorithm,
            JwtValidationError::InvalidSignature,
            JwtValidationError::Expired,
            JwtValidationError::MissingClaims,
            JwtValidationError::IatTooFarInFuture,
        ] {
            assert_eq!(e.to_string(), msg);
        }
    }

    // -------------------------------------------------------------------------
    // iat Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_validate_iat_boundaries() {
        let now = 1_700_000_000;
        let skew = DEFAULT_CLOCK_SKEW.as_secs() as i64;
        assert!(validate_iat_at(now, DEFAULT_CLOCK_SKEW, now).is_ok());
        assert!(validate_iat_at(now + skew, DEFAULT_CLOCK_SKEW, now).is_ok());
        assert_eq!(
            validate_iat_at(now + skew + 1, DEFAULT_CLOCK_SKEW, now),
            Err(JwtValidationError::IatTooFarInFuture)
        );
        assert!(validate_iat_at(now - 86_400, DEFAULT_CLOCK_SKEW, now).is_ok());
    }

    // -------------------------------------------------------------------------
    // Debug redaction
    // -------------------------------------------------------------------------

    #[test]
    fn test_user_claims_debug_redacts_email() {
        let claims = UserClaims {
            id: "u1".to_string(),
            email: "secret@example.com".to_string(),
            iat: None,
            exp: None,
        };
        let debug = format!("{claims:?}");
        assert!(debug.contains("u1"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret@example.com"));
    }
}
