//! Credential verification for new socket connections.
//!
//! A connection has one chance to present an HS256 credential within the
//! authentication window. Invalid credentials are rejected as soon as they
//! arrive; silence is rejected when the window closes.

use crate::errors::CoordinatorError;
use crate::observability::metrics::record_auth_attempt;
use crate::registry::Identity;
use common::jwt::verify_hs256;
use common::secret::{ExposeSecret, SecretString};
use common::types::UserId;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
pub struct CredentialVerifier {
    secret: SecretString,
    auth_timeout: Duration,
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("secret", &"[REDACTED]")
            .field("auth_timeout", &self.auth_timeout)
            .finish()
    }
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(secret: SecretString, auth_timeout: Duration) -> Self {
        Self {
            secret,
            auth_timeout,
        }
    }

    /// Verify a presented token.
    ///
    /// # Errors
    ///
    /// `AuthRejected` for any malformed, forged, expired or claim-less token.
    pub fn verify(&self, token: &SecretString) -> Result<Identity, CoordinatorError> {
        let claims = verify_hs256(token.expose_secret(), self.secret.expose_secret().as_bytes())
            .map_err(|e| {
                debug!(target: "sc.auth", reason = ?e, "Credential rejected");
                record_auth_attempt("rejected");
                CoordinatorError::AuthRejected(format!("{e:?}"))
            })?;

        record_auth_attempt("success");
        info!(target: "sc.auth", user_id = %claims.id, "Credential accepted");
        Ok(Identity {
            user_id: UserId(claims.id),
            email: claims.email,
        })
    }

    /// Wait for `credential` and verify it, bounded by the auth window.
    ///
    /// `credential` resolves to `None` when the peer goes away first.
    ///
    /// # Errors
    ///
    /// - `AuthTimeout` if the window elapses first
    /// - `AuthRejected` if the peer leaves or the token fails verification
    pub async fn authenticate<F>(&self, credential: F) -> Result<Identity, CoordinatorError>
    where
        F: Future<Output = Option<SecretString>>,
    {
        match tokio::time::timeout(self.auth_timeout, credential).await {
            Err(_elapsed) => {
                debug!(
                    target: "sc.auth",
                    timeout_ms = self.auth_timeout.as_millis(),
                    "No credential within authentication window"
                );
                record_auth_attempt("timeout");
                Err(CoordinatorError::AuthTimeout)
            }
            Ok(None) => Err(CoordinatorError::AuthRejected(
                "connection closed before authenticating".to_string(),
            )),
            Ok(Some(token)) => self.verify(&token),
        }
    }
}
