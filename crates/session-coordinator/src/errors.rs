//! Session coordinator error types.
//!
//! Error types map to numeric codes sent in `error` events. Internal details
//! are logged server-side but not exposed to clients.

use thiserror::Error;

/// Session coordinator error type.
///
/// Maps to client error codes:
/// - `InvalidPayload`, `UnknownEvent`: `INVALID_REQUEST` (1)
/// - `AuthTimeout`, `AuthRejected`: `UNAUTHORIZED` (2)
/// - `NotRegistered`, `NotInRoom`, `UserOffline`: `NOT_FOUND` (4)
/// - `DuplicateRegistration`: `CONFLICT` (5)
/// - Storage, persistence, Redis, config, media, internal: `INTERNAL_ERROR` (6)
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// No credential arrived within the authentication window.
    #[error("Authentication timed out")]
    AuthTimeout,

    /// Credential failed verification.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Connection id is already present in the registry.
    #[error("Connection already registered: {0}")]
    DuplicateRegistration(String),

    /// Storage backend could not be reached or reconciled.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Best-effort durable write failed after in-memory cleanup.
    #[error("Persistence write failed: {0}")]
    PersistenceWriteFailed(String),

    /// Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inbound frame could not be decoded for its event.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Inbound frame names an event with no handler.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Connection id is not (or no longer) registered.
    #[error("Connection not registered: {0}")]
    NotRegistered(String),

    /// Operation requires room membership.
    #[error("Connection is not in a room")]
    NotInRoom,

    /// Direct message target has no live connection.
    #[error("User is not online: {0}")]
    UserOffline(String),

    /// Media routing collaborator reported failure.
    #[error("Media error: {0}")]
    Media(String),

    /// Internal error (channel closed, actor gone).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Returns the client error code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            CoordinatorError::InvalidPayload(_) | CoordinatorError::UnknownEvent(_) => 1,
            CoordinatorError::AuthTimeout | CoordinatorError::AuthRejected(_) => 2,
            CoordinatorError::NotRegistered(_)
            | CoordinatorError::NotInRoom
            | CoordinatorError::UserOffline(_) => 4,
            CoordinatorError::DuplicateRegistration(_) => 5,
            CoordinatorError::StorageUnavailable(_)
            | CoordinatorError::PersistenceWriteFailed(_)
            | CoordinatorError::Redis(_)
            | CoordinatorError::Config(_)
            | CoordinatorError::Media(_)
            | CoordinatorError::Internal(_) => 6,
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            CoordinatorError::AuthTimeout => "Authentication timed out".to_string(),
            CoordinatorError::AuthRejected(_) => "Invalid or expired token".to_string(),
            CoordinatorError::DuplicateRegistration(_) => {
                "Connection is already registered".to_string()
            }
            CoordinatorError::InvalidPayload(_) => "Invalid message payload".to_string(),
            CoordinatorError::UnknownEvent(event) => format!("Unknown event: {event}"),
            CoordinatorError::NotRegistered(_) => "Connection is not registered".to_string(),
            CoordinatorError::NotInRoom => "Join a room first".to_string(),
            CoordinatorError::UserOffline(_) => "User is not online".to_string(),
            CoordinatorError::Media(_) => "Media operation failed".to_string(),
            CoordinatorError::StorageUnavailable(_)
            | CoordinatorError::PersistenceWriteFailed(_)
            | CoordinatorError::Redis(_)
            | CoordinatorError::Config(_)
            | CoordinatorError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<redis::RedisError> for CoordinatorError {
    fn from(err: redis::RedisError) -> Self {
        CoordinatorError::Redis(err.to_string())
    }
}
