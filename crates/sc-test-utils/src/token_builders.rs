//! Builder for socket credentials.

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Map, Value};

/// Builder for HS256 credentials accepted by the coordinator.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_user("alice")
///     .expires_in(3600)
///     .sign(TEST_AUTH_SECRET);
/// ```
#[derive(Debug, Clone)]
pub struct TestTokenBuilder {
    id: Option<String>,
    email: Option<String>,
    exp: Option<i64>,
    iat: Option<i64>,
    algorithm: Algorithm,
}

impl TestTokenBuilder {
    /// Defaults: user `test-user`, issued now, expiring in an hour.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Some("test-user".to_string()),
            email: Some("test-user@example.com".to_string()),
            exp: Some((now + Duration::seconds(3600)).timestamp()),
            iat: Some(now.timestamp()),
            algorithm: Algorithm::HS256,
        }
    }

    /// Set the user id and derive the email from it.
    pub fn for_user(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self.email = Some(format!("{id}@example.com"));
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    /// Drop the `id` claim.
    pub fn without_id(mut self) -> Self {
        self.id = None;
        self
    }

    /// Drop the `exp` claim.
    pub fn without_expiry(mut self) -> Self {
        self.exp = None;
        self
    }

    /// Set expiration in seconds from now; negative values are in the past.
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = Some((Utc::now() + Duration::seconds(seconds)).timestamp());
        self
    }

    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = Some(timestamp);
        self
    }

    /// Sign with another HMAC algorithm.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// The claims as a JSON object.
    pub fn claims(&self) -> Value {
        let mut claims = Map::new();
        if let Some(id) = &self.id {
            claims.insert("id".to_string(), json!(id));
        }
        if let Some(email) = &self.email {
            claims.insert("email".to_string(), json!(email));
        }
        if let Some(exp) = self.exp {
            claims.insert("exp".to_string(), json!(exp));
        }
        if let Some(iat) = self.iat {
            claims.insert("iat".to_string(), json!(iat));
        }
        Value::Object(claims)
    }

    /// Sign the claims with `secret`.
    pub fn sign(&self, secret: &str) -> String {
        encode(
            &Header::new(self.algorithm),
            &self.claims(),
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("HMAC signing should not fail")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
