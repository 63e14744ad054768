//! Redis-backed [`Store`].
//!
//! # Key Patterns
//!
//! - `user:{id}` - User fields (HASH: username, email, password_hash,
//!   first_name, last_name, level, last_online)
//! - `user:email:{email}` - Email index (STRING -> user id)
//! - `meetings` - Meeting index (SET of meeting ids)
//! - `meeting:{id}:peers` - Connection ids in a meeting (SET)
//!
//! # Connection Pattern
//!
//! The redis-rs `MultiplexedConnection` is cheap to clone and safe to use
//! concurrently. Each operation clones it; no locking.

use super::{
    lua_scripts, normalize_email, Store, StoreConnector, UserFields, UserLevel, UserRecord,
};
use crate::errors::CoordinatorError;
use crate::observability::metrics::record_store_latency;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::types::{ConnectionId, UserId};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

const MEETINGS_KEY: &str = "meetings";

fn user_key(id: &UserId) -> String {
    format!("user:{id}")
}

fn email_key(email: &str) -> String {
    format!("user:email:{}", normalize_email(email))
}

#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    set_last_online_script: Script,
    reset_peers_script: Script,
    remove_peer_script: Script,
    write_user_script: Script,
}

impl RedisStore {
    /// Open a client and establish a multiplexed connection.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::StorageUnavailable` if the URL is invalid or
    /// the server cannot be reached.
    pub async fn connect(redis_url: &SecretString) -> Result<Self, CoordinatorError> {
        let client = Client::open(redis_url.expose_secret()).map_err(|e| {
            // The URL may embed credentials; never log it
            error!(
                target: "sc.store.redis",
                error = %e,
                "Failed to open Redis client"
            );
            CoordinatorError::StorageUnavailable(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                warn!(
                    target: "sc.store.redis",
                    error = %e,
                    "Failed to connect to Redis"
                );
                CoordinatorError::StorageUnavailable(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            set_last_online_script: Script::new(lua_scripts::SET_LAST_ONLINE),
            reset_peers_script: Script::new(lua_scripts::RESET_MEETING_PEERS),
            remove_peer_script: Script::new(lua_scripts::REMOVE_PEER),
            write_user_script: Script::new(lua_scripts::WRITE_USER),
        })
    }

    async fn write_user(&self, id: &UserId, fields: &UserFields) -> Result<(), CoordinatorError> {
        let mut conn = self.connection.clone();
        let mut invocation = self.write_user_script.prepare_invoke();
        invocation
            .key(user_key(id))
            .key(email_key(&fields.email))
            .arg(id.as_str());
        for (field, value) in user_fields_to_pairs(fields) {
            invocation.arg(field).arg(value);
        }
        let _: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(())
    }
}

fn user_fields_to_pairs(fields: &UserFields) -> [(&'static str, &str); 6] {
    [
        ("username", fields.username.as_str()),
        ("email", fields.email.as_str()),
        ("password_hash", fields.password_hash.as_str()),
        ("first_name", fields.first_name.as_str()),
        ("last_name", fields.last_name.as_str()),
        ("level", fields.level.as_str()),
    ]
}

/// Rebuild a record from a `user:{id}` hash. `None` for an empty hash.
fn record_from_hash(id: UserId, mut hash: HashMap<String, String>) -> Option<UserRecord> {
    if hash.is_empty() {
        return None;
    }
    let mut take = |field: &str| hash.remove(field).unwrap_or_default();

    let level = match take("level").as_str() {
        "root" => UserLevel::Root,
        _ => UserLevel::Standard,
    };
    let last_online = take("last_online")
        .parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    Some(UserRecord {
        id,
        fields: UserFields {
            username: take("username"),
            email: take("email"),
            password_hash: take("password_hash"),
            first_name: take("first_name"),
            last_name: take("last_name"),
            level,
        },
        last_online,
    })
}

#[async_trait]
impl Store for RedisStore {
    #[instrument(skip_all)]
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, CoordinatorError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();

        let id: Option<String> = conn.get(email_key(email)).await?;
        let Some(id) = id.map(UserId) else {
            record_store_latency("find_user_by_email", start.elapsed());
            return Ok(None);
        };
        let hash: HashMap<String, String> = conn.hgetall(user_key(&id)).await?;

        record_store_latency("find_user_by_email", start.elapsed());
        Ok(record_from_hash(id, hash))
    }

    #[instrument(skip_all)]
    async fn create_user(&self, fields: UserFields) -> Result<UserRecord, CoordinatorError> {
        let start = Instant::now();
        let id = UserId(uuid::Uuid::new_v4().to_string());
        self.write_user(&id, &fields).await?;

        record_store_latency("create_user", start.elapsed());
        debug!(target: "sc.store.redis", user_id = %id, "User created");
        Ok(UserRecord {
            id,
            fields,
            last_online: None,
        })
    }

    #[instrument(skip_all, fields(user_id = %id))]
    async fn overwrite_user(
        &self,
        id: &UserId,
        fields: UserFields,
    ) -> Result<(), CoordinatorError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();

        let previous_email: Option<String> = conn.hget(user_key(id), "email").await?;
        self.write_user(id, &fields).await?;
        if let Some(previous) = previous_email {
            if normalize_email(&previous) != normalize_email(&fields.email) {
                let _: () = conn.del(email_key(&previous)).await?;
            }
        }

        record_store_latency("overwrite_user", start.elapsed());
        Ok(())
    }

    #[instrument(skip_all)]
    async fn reset_meeting_peers(&self) -> Result<u64, CoordinatorError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();
        let cleared: i64 = self
            .reset_peers_script
            .key(MEETINGS_KEY)
            .invoke_async(&mut conn)
            .await?;

        record_store_latency("reset_meeting_peers", start.elapsed());
        Ok(u64::try_from(cleared).unwrap_or(0))
    }

    #[instrument(skip_all, fields(connection_id = %connection_id))]
    async fn remove_peer_from_meetings(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<u64, CoordinatorError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();
        let removed: i64 = self
            .remove_peer_script
            .key(MEETINGS_KEY)
            .arg(connection_id.to_string())
            .invoke_async(&mut conn)
            .await?;

        record_store_latency("remove_peer_from_meetings", start.elapsed());
        Ok(u64::try_from(removed).unwrap_or(0))
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    async fn set_last_online(
        &self,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();
        let updated: i64 = self
            .set_last_online_script
            .key(user_key(user_id))
            .arg(at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        record_store_latency("set_last_online", start.elapsed());
        Ok(updated == 1)
    }
}

/// Connects a fresh [`RedisStore`] on each bootstrap attempt.
pub struct RedisConnector {
    redis_url: SecretString,
}

impl RedisConnector {
    #[must_use]
    pub fn new(redis_url: SecretString) -> Self {
        Self { redis_url }
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn connect(&self) -> Result<Arc<dyn Store>, CoordinatorError> {
        let store = RedisStore::connect(&self.redis_url).await?;
        Ok(Arc::new(store))
    }
}
