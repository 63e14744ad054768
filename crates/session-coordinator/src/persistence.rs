//! Best-effort durable updates after a connection closes.
//!
//! Runs strictly after in-memory cleanup. Failures are logged and counted
//! but never undo or block the in-memory state change.

use crate::bootstrap::StorageHandle;
use crate::errors::CoordinatorError;
use crate::observability::metrics::record_persistence_failure;
use chrono::{DateTime, Utc};
use common::types::{ConnectionId, UserId};
use tracing::{debug, instrument, warn};

/// What the durable update managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisconnectWrites {
    /// Storage was connected when the update ran.
    pub attempted: bool,
    pub meetings_pruned: Option<u64>,
    pub last_online_set: Option<bool>,
}

/// Pull `connection_id` from every meeting's peers and stamp the user's
/// `last_online`. Skipped entirely while storage is not connected.
#[instrument(skip_all, fields(connection_id = %connection_id, user_id = %user_id))]
pub async fn record_disconnect(
    storage: &StorageHandle,
    connection_id: ConnectionId,
    user_id: UserId,
    at: DateTime<Utc>,
) -> DisconnectWrites {
    let Some(store) = storage.store() else {
        debug!(
            target: "sc.persistence",
            "Storage not connected, skipping disconnect writes"
        );
        return DisconnectWrites::default();
    };

    let meetings_pruned = match store.remove_peer_from_meetings(&connection_id).await {
        Ok(count) => Some(count),
        Err(e) => {
            log_failure("remove_peer_from_meetings", &e);
            None
        }
    };

    let last_online_set = match store.set_last_online(&user_id, at).await {
        Ok(found) => {
            if !found {
                debug!(target: "sc.persistence", "No stored user for last_online update");
            }
            Some(found)
        }
        Err(e) => {
            log_failure("set_last_online", &e);
            None
        }
    };

    DisconnectWrites {
        attempted: true,
        meetings_pruned,
        last_online_set,
    }
}

fn log_failure(operation: &'static str, error: &CoordinatorError) {
    let failure = CoordinatorError::PersistenceWriteFailed(format!("{operation}: {error}"));
    record_persistence_failure(operation);
    warn!(target: "sc.persistence", error = %failure, "Disconnect write failed");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::mock::MockStore;
    use crate::store::{UserFields, UserLevel, UserRecord};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_skipped_while_disconnected() {
        let writes = record_disconnect(
            &StorageHandle::disconnected(),
            ConnectionId::new(),
            UserId::from("u1"),
            Utc::now(),
        )
        .await;

        assert_eq!(writes, DisconnectWrites::default());
        assert!(!writes.attempted);
    }

    fn store_with_user() -> (Arc<MockStore>, UserId) {
        let store = Arc::new(MockStore::new());
        let user = UserId::from("u1");
        store.insert_user(UserRecord {
            id: user.clone(),
            fields: UserFields {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password_hash: "$2b$04$hash".to_string(),
                first_name: "Alice".to_string(),
                last_name: "Liddell".to_string(),
                level: UserLevel::Standard,
            },
            last_online: None,
        });
        (store, user)
    }

    #[tokio::test]
    async fn test_prunes_peer_and_stamps_last_online() {
        let (store, user) = store_with_user();
        let conn = ConnectionId::new();
        let other = ConnectionId::new();
        store.insert_meeting("m1", &[conn, other]);
        store.insert_meeting("m2", &[conn]);
        store.insert_meeting("m3", &[other]);
        let at = Utc::now();

        let writes = record_disconnect(
            &StorageHandle::connected(store.clone()),
            conn,
            user.clone(),
            at,
        )
        .await;

        assert!(writes.attempted);
        assert_eq!(writes.meetings_pruned, Some(2));
        assert_eq!(writes.last_online_set, Some(true));
        assert_eq!(store.meeting_peers("m1").unwrap(), [other].into_iter().collect());
        assert!(store.meeting_peers("m2").unwrap().is_empty());
        assert_eq!(store.user(&user).unwrap().last_online, Some(at));
    }

    #[tokio::test]
    async fn test_failed_prune_still_stamps_last_online() {
        let (store, user) = store_with_user();
        store.fail_operation("remove_peer_from_meetings");

        let writes = record_disconnect(
            &StorageHandle::connected(store.clone()),
            ConnectionId::new(),
            user.clone(),
            Utc::now(),
        )
        .await;

        assert!(writes.attempted);
        assert_eq!(writes.meetings_pruned, None);
        assert_eq!(writes.last_online_set, Some(true));
        assert!(store.user(&user).unwrap().last_online.is_some());
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_an_error() {
        let (store, _) = store_with_user();

        let writes = record_disconnect(
            &StorageHandle::connected(store),
            ConnectionId::new(),
            UserId::from("ghost"),
            Utc::now(),
        )
        .await;

        assert_eq!(writes.last_online_set, Some(false));
    }
}
