//! Persistent user/meeting store.
//!
//! The coordinator touches three pieces of durable state:
//!
//! - the privileged (root) account, upserted on every bootstrap
//! - each meeting's peer list, cleared on bootstrap and pruned on disconnect
//! - each user's `last_online`, stamped on disconnect
//!
//! [`Store`] is the seam for that state; [`StoreConnector`] opens a fresh
//! store per bootstrap attempt. The Redis implementation lives in
//! [`redis`]. An in-memory store for tests is in `mock`, built with the
//! `test-utils` feature.
//!
//! Emails match case-insensitively in every implementation.

pub mod lua_scripts;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod redis;

use crate::errors::CoordinatorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{ConnectionId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Account privilege level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserLevel {
    Root,
    Standard,
}

impl UserLevel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            UserLevel::Root => "root",
            UserLevel::Standard => "standard",
        }
    }
}

/// Identity fields written by the bootstrap upsert.
///
/// `password_hash` is a bcrypt hash, never a plaintext password.
#[derive(Clone, PartialEq, Eq)]
pub struct UserFields {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub level: UserLevel,
}

impl std::fmt::Debug for UserFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserFields")
            .field("username", &self.username)
            .field("email", &"[REDACTED]")
            .field("password_hash", &"[REDACTED]")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("level", &self.level)
            .finish()
    }
}

/// A stored user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub fields: UserFields,
    pub last_online: Option<DateTime<Utc>>,
}

/// Form of an email used for lookups.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.to_lowercase()
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Look up a user by email, ignoring case.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, CoordinatorError>;

    /// Create a user and return its record.
    async fn create_user(&self, fields: UserFields) -> Result<UserRecord, CoordinatorError>;

    /// Overwrite every identity field of an existing user.
    async fn overwrite_user(&self, id: &UserId, fields: UserFields)
        -> Result<(), CoordinatorError>;

    /// Set every meeting's peer list to empty. Returns meetings touched.
    async fn reset_meeting_peers(&self) -> Result<u64, CoordinatorError>;

    /// Remove a connection id from every meeting's peer list. Returns
    /// meetings that contained it.
    async fn remove_peer_from_meetings(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<u64, CoordinatorError>;

    /// Stamp `last_online` on an existing user. Returns whether the user
    /// existed.
    async fn set_last_online(
        &self,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError>;
}

/// Opens a connected [`Store`]. Called once per bootstrap attempt.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Store>, CoordinatorError>;
}
