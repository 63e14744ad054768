//! In-memory store for tests.
//!
//! Mirrors the Redis layout closely enough to exercise bootstrap and
//! disconnect writes: users keyed by id with an email index, and one peer
//! set per meeting. Any operation can be made to fail by name.

use super::{normalize_email, Store, StoreConnector, UserFields, UserRecord};
use crate::errors::CoordinatorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{ConnectionId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

#[derive(Debug, Default)]
struct MockState {
    users: HashMap<UserId, UserRecord>,
    meetings: HashMap<String, HashSet<ConnectionId>>,
    failing: HashSet<&'static str>,
    calls: HashMap<&'static str, usize>,
    next_user: u64,
}

/// In-memory [`Store`].
#[derive(Debug, Default)]
pub struct MockStore {
    state: Mutex<MockState>,
}

impl MockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and fail it if `operation` was marked failing.
    fn enter(&self, operation: &'static str) -> Result<MutexGuard<'_, MockState>, CoordinatorError> {
        let mut state = self.state();
        *state.calls.entry(operation).or_default() += 1;
        if state.failing.contains(operation) {
            return Err(CoordinatorError::Redis(format!("injected failure: {operation}")));
        }
        Ok(state)
    }

    /// Make every later call to `operation` fail.
    pub fn fail_operation(&self, operation: &'static str) {
        self.state().failing.insert(operation);
    }

    pub fn clear_failures(&self) {
        self.state().failing.clear();
    }

    /// Calls made to `operation`, failed ones included.
    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.state().calls.get(operation).copied().unwrap_or(0)
    }

    /// Seed a user directly, bypassing call counting.
    pub fn insert_user(&self, record: UserRecord) {
        self.state().users.insert(record.id.clone(), record);
    }

    #[must_use]
    pub fn user(&self, id: &UserId) -> Option<UserRecord> {
        self.state().users.get(id).cloned()
    }

    #[must_use]
    pub fn users_with_email(&self, email: &str) -> Vec<UserRecord> {
        self.state()
            .users
            .values()
            .filter(|u| normalize_email(&u.fields.email) == normalize_email(email))
            .cloned()
            .collect()
    }

    /// Seed a meeting with the given peers.
    pub fn insert_meeting(&self, meeting: &str, peers: &[ConnectionId]) {
        self.state()
            .meetings
            .insert(meeting.to_string(), peers.iter().copied().collect());
    }

    /// Peers of `meeting`, `None` if the meeting does not exist.
    #[must_use]
    pub fn meeting_peers(&self, meeting: &str) -> Option<HashSet<ConnectionId>> {
        self.state().meetings.get(meeting).cloned()
    }
}

#[async_trait]
impl Store for MockStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, CoordinatorError> {
        let state = self.enter("find_user_by_email")?;
        Ok(state
            .users
            .values()
            .find(|u| normalize_email(&u.fields.email) == normalize_email(email))
            .cloned())
    }

    async fn create_user(&self, fields: UserFields) -> Result<UserRecord, CoordinatorError> {
        let mut state = self.enter("create_user")?;
        state.next_user += 1;
        let record = UserRecord {
            id: UserId(format!("user-{}", state.next_user)),
            fields,
            last_online: None,
        };
        state.users.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn overwrite_user(&self, id: &UserId, fields: UserFields) -> Result<(), CoordinatorError> {
        let mut state = self.enter("overwrite_user")?;
        let record = state
            .users
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::Redis(format!("no user {id}")))?;
        record.fields = fields;
        Ok(())
    }

    async fn reset_meeting_peers(&self) -> Result<u64, CoordinatorError> {
        let mut state = self.enter("reset_meeting_peers")?;
        for peers in state.meetings.values_mut() {
            peers.clear();
        }
        Ok(state.meetings.len() as u64)
    }

    async fn remove_peer_from_meetings(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<u64, CoordinatorError> {
        let mut state = self.enter("remove_peer_from_meetings")?;
        let removed = state
            .meetings
            .values_mut()
            .map(|peers| peers.remove(connection_id))
            .filter(|removed| *removed)
            .count();
        Ok(removed as u64)
    }

    async fn set_last_online(
        &self,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError> {
        let mut state = self.enter("set_last_online")?;
        Ok(match state.users.get_mut(user_id) {
            Some(record) => {
                record.last_online = Some(at);
                true
            }
            None => false,
        })
    }
}

/// Connector that fails a fixed number of times before handing out `store`.
#[derive(Debug)]
pub struct MockConnector {
    store: Arc<MockStore>,
    failures_left: AtomicUsize,
    attempts: Mutex<Vec<Instant>>,
}

impl MockConnector {
    /// Always connects.
    #[must_use]
    pub fn accepting(store: Arc<MockStore>) -> Self {
        Self::failing_first(0, store)
    }

    /// Fails the first `failures` attempts.
    #[must_use]
    pub fn failing_first(failures: usize, store: Arc<MockStore>) -> Self {
        Self {
            store,
            failures_left: AtomicUsize::new(failures),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Instants at which `connect` was called.
    #[must_use]
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempt_times().len()
    }
}

#[async_trait]
impl StoreConnector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn Store>, CoordinatorError> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(CoordinatorError::StorageUnavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(Arc::clone(&self.store) as Arc<dyn Store>)
    }
}
