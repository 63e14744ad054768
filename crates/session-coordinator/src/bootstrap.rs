//! Storage bootstrap and recovery.
//!
//! On startup the coordinator connects to storage and reconciles state left
//! behind by a previous run:
//!
//! 1. Upsert the privileged account from configuration. An existing account
//!    has every identity field overwritten and its password re-hashed, even
//!    when nothing changed.
//! 2. Clear every meeting's peer list; no connection survives a restart.
//!
//! Only after both steps succeed does the storage state become `Connected`.
//! Any failure restarts the whole sequence after a fixed delay, with no
//! attempt limit, until it succeeds or the cancellation token fires.

use crate::config::RootUserConfig;
use crate::errors::CoordinatorError;
use crate::observability::metrics::record_bootstrap_attempt;
use crate::store::{Store, StoreConnector, UserFields, UserLevel};
use common::secret::ExposeSecret;
use common::types::UserId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Storage connectivity as seen by the rest of the service.
#[derive(Clone, Default)]
pub enum StorageState {
    #[default]
    Disconnected,
    Connected(Arc<dyn Store>),
}

impl fmt::Debug for StorageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageState::Disconnected => f.write_str("Disconnected"),
            StorageState::Connected(_) => f.write_str("Connected"),
        }
    }
}

/// Read side of the storage state. Cheap to clone.
#[derive(Clone, Debug)]
pub struct StorageHandle {
    rx: watch::Receiver<StorageState>,
}

impl StorageHandle {
    /// A handle that stays disconnected (no bootstrap running).
    #[must_use]
    pub fn disconnected() -> Self {
        let (_tx, rx) = watch::channel(StorageState::Disconnected);
        Self { rx }
    }

    /// A handle already connected to `store`.
    #[must_use]
    pub fn connected(store: Arc<dyn Store>) -> Self {
        let (_tx, rx) = watch::channel(StorageState::Connected(store));
        Self { rx }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(*self.rx.borrow(), StorageState::Connected(_))
    }

    /// The connected store, or `None` while bootstrap has not finished.
    #[must_use]
    pub fn store(&self) -> Option<Arc<dyn Store>> {
        match &*self.rx.borrow() {
            StorageState::Connected(store) => Some(Arc::clone(store)),
            StorageState::Disconnected => None,
        }
    }

    /// Wait until bootstrap completes. `None` if the bootstrap task went
    /// away without connecting.
    pub async fn wait_connected(&mut self) -> Option<Arc<dyn Store>> {
        let state = self
            .rx
            .wait_for(|s| matches!(s, StorageState::Connected(_)))
            .await
            .ok()?;
        match &*state {
            StorageState::Connected(store) => Some(Arc::clone(store)),
            StorageState::Disconnected => None,
        }
    }
}

/// Whether reconciliation created or overwrote the privileged account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootAccountAction {
    Created,
    Overwritten,
}

/// Outcome of one successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub root_user_id: UserId,
    pub root_action: RootAccountAction,
    pub meetings_reset: u64,
    /// Attempts used, counting the successful one.
    pub attempts: u64,
}

/// Hash the privileged password with bcrypt.
///
/// # Errors
///
/// `StorageUnavailable` wrapping the bcrypt failure, so the attempt retries.
pub fn hash_password(password: &str, cost: u32) -> Result<String, CoordinatorError> {
    bcrypt::hash(password, cost)
        .map_err(|e| CoordinatorError::StorageUnavailable(format!("password hashing failed: {e}")))
}

/// Run both reconciliation steps against a connected store.
///
/// Idempotent: running it twice leaves one privileged account and empty
/// peer lists. `attempts` in the report is left at 0 for the caller to set.
///
/// # Errors
///
/// The first store or hashing failure, unchanged.
#[instrument(skip_all)]
pub async fn reconcile(
    store: &dyn Store,
    root_user: &RootUserConfig,
    bcrypt_cost: u32,
) -> Result<ReconcileReport, CoordinatorError> {
    let password_hash = hash_password(root_user.password.expose_secret(), bcrypt_cost)?;
    let fields = UserFields {
        username: root_user.username.clone(),
        email: root_user.email.clone(),
        password_hash,
        first_name: root_user.first_name.clone(),
        last_name: root_user.last_name.clone(),
        level: UserLevel::Root,
    };

    let (root_user_id, root_action) = match store.find_user_by_email(&root_user.email).await? {
        None => {
            let created = store.create_user(fields).await?;
            info!(target: "sc.bootstrap", user_id = %created.id, "Privileged account created");
            (created.id, RootAccountAction::Created)
        }
        Some(existing) => {
            store.overwrite_user(&existing.id, fields).await?;
            info!(
                target: "sc.bootstrap",
                user_id = %existing.id,
                "Privileged account overwritten from configuration"
            );
            (existing.id, RootAccountAction::Overwritten)
        }
    };

    let meetings_reset = store.reset_meeting_peers().await?;
    info!(target: "sc.bootstrap", meetings_reset, "Stale meeting peers cleared");

    Ok(ReconcileReport {
        root_user_id,
        root_action,
        meetings_reset,
        attempts: 0,
    })
}

pub struct BootstrapCoordinator {
    connector: Arc<dyn StoreConnector>,
    root_user: RootUserConfig,
    bcrypt_cost: u32,
    retry_delay: Duration,
    state: watch::Sender<StorageState>,
}

impl BootstrapCoordinator {
    /// Create the coordinator and the handle other components read.
    #[must_use]
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        root_user: RootUserConfig,
        bcrypt_cost: u32,
        retry_delay: Duration,
    ) -> (Self, StorageHandle) {
        let (state, rx) = watch::channel(StorageState::Disconnected);
        (
            Self {
                connector,
                root_user,
                bcrypt_cost,
                retry_delay,
                state,
            },
            StorageHandle { rx },
        )
    }

    /// One full attempt: connect, then reconcile.
    async fn attempt(&self) -> Result<(Arc<dyn Store>, ReconcileReport), CoordinatorError> {
        let store = self.connector.connect().await?;
        let report = reconcile(store.as_ref(), &self.root_user, self.bcrypt_cost)
            .await
            .map_err(|e| match e {
                CoordinatorError::StorageUnavailable(_) => e,
                other => CoordinatorError::StorageUnavailable(other.to_string()),
            })?;
        Ok((store, report))
    }

    /// Retry until connected or cancelled.
    ///
    /// Returns the report of the successful attempt, or `None` when
    /// cancelled first.
    #[instrument(skip_all, name = "sc.bootstrap")]
    pub async fn run(self, cancel_token: CancellationToken) -> Option<ReconcileReport> {
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            info!(target: "sc.bootstrap", attempt = attempts, "Connecting to storage");

            let outcome = tokio::select! {
                () = cancel_token.cancelled() => {
                    info!(target: "sc.bootstrap", "Bootstrap cancelled");
                    return None;
                }
                outcome = self.attempt() => outcome,
            };

            match outcome {
                Ok((store, mut report)) => {
                    report.attempts = attempts;
                    record_bootstrap_attempt("success");
                    self.state.send_replace(StorageState::Connected(store));
                    info!(
                        target: "sc.bootstrap",
                        attempts,
                        root_user_id = %report.root_user_id,
                        "Storage connected"
                    );
                    return Some(report);
                }
                Err(e) => {
                    record_bootstrap_attempt("error");
                    warn!(
                        target: "sc.bootstrap",
                        attempt = attempts,
                        error = %e,
                        retry_in_ms = self.retry_delay.as_millis(),
                        "Storage bootstrap failed, retrying"
                    );
                }
            }

            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!(target: "sc.bootstrap", "Bootstrap cancelled");
                    return None;
                }
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_verifies() {
        let hash = hash_password("rootpass", 4).unwrap();
        assert!(hash.starts_with("$2"));
        assert!(bcrypt::verify("rootpass", &hash).unwrap());
    }

    #[test]
    fn test_hash_password_salts_each_call() {
        assert_ne!(
            hash_password("rootpass", 4).unwrap(),
            hash_password("rootpass", 4).unwrap()
        );
    }

    #[test]
    fn test_hash_password_invalid_cost_is_storage_error() {
        let err = hash_password("rootpass", 2).unwrap_err();
        assert!(matches!(err, CoordinatorError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_disconnected_handle_has_no_store() {
        let handle = StorageHandle::disconnected();
        assert!(!handle.is_connected());
        assert!(handle.store().is_none());
    }
}
