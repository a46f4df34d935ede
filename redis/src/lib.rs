//! Redis-backed notification store and scheduling index.
//!
//! # Key layout
//!
//! - `notify:obj:{id}` → notification record as JSON
//! - `notify:due` → sorted set of ids scored by epoch seconds of `send_at`
//! - `notify:retry` → sorted set of ids scored by epoch seconds of
//!   `next_attempt_at`
//!
//! Popping is `ZRANGEBYSCORE ... LIMIT` followed by `ZREM` of the returned
//! members. The two steps are not atomic; a failed `ZREM` is logged and the
//! ids may be returned again by a later pop.
//!
//! Cancellation writes the record and removes the id from both sets in one
//! `MULTI`/`EXEC` pipeline.
//!
//! # Example
//!
//! ```no_run
//! use delayline_redis::RedisBackend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = RedisBackend::new("redis://127.0.0.1:6379/0").await?;
//! let from_settings =
//!     RedisBackend::new(delayline_redis::connection_info("127.0.0.1:6379", Some("p@ss/word"), 0)?)
//!         .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delayline_core::notification::{Notification, ScheduleSet, epoch_score};
use delayline_core::store::{NotificationStore, SchedulingIndex, StoreError};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ConnectionAddr, IntoConnectionInfo, RedisConnectionInfo};

pub use redis::ConnectionInfo;

/// Port used when `addr` names only a host.
pub const DEFAULT_PORT: u16 = 6379;

/// Key prefix for notification records.
pub const OBJECT_KEY_PREFIX: &str = "notify:obj:";

/// Record key for `id`.
#[must_use]
pub fn object_key(id: &str) -> String {
    format!("{OBJECT_KEY_PREFIX}{id}")
}

/// Sorted-set key for `set`.
#[must_use]
pub const fn set_key(set: ScheduleSet) -> &'static str {
    match set {
        ScheduleSet::Due => "notify:due",
        ScheduleSet::Retry => "notify:retry",
    }
}

/// Connection settings from `redis.{addr,password,db}`.
///
/// The password is passed to `AUTH` as-is, so it may contain any character.
///
/// # Errors
///
/// Returns [`StoreError::Backend`] if `addr` has no host or an invalid port.
pub fn connection_info(
    addr: &str,
    password: Option<&str>,
    db: i64,
) -> Result<ConnectionInfo, StoreError> {
    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| StoreError::Backend(format!("invalid Redis port in '{addr}'")))?;
            (host, port)
        }
        None => (addr, DEFAULT_PORT),
    };
    if host.trim().is_empty() {
        return Err(StoreError::Backend(format!("missing Redis host in '{addr}'")));
    }

    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host.to_string(), port),
        redis: RedisConnectionInfo {
            db,
            password: password.filter(|p| !p.is_empty()).map(str::to_string),
            ..RedisConnectionInfo::default()
        },
    })
}

/// Object store and scheduling index over one Redis connection manager.
#[derive(Clone)]
pub struct RedisBackend {
    conn_manager: ConnectionManager,
}

impl RedisBackend {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection info is invalid or
    /// the first connection cannot be established.
    pub async fn new(info: impl IntoConnectionInfo) -> Result<Self, StoreError> {
        let client = Client::open(info)
            .map_err(|e| StoreError::Backend(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::Backend(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!("Connected to Redis");
        Ok(Self { conn_manager })
    }

    /// Round-trip a `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if Redis does not answer.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(format!("Redis ping failed: {e}")))?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend").finish_non_exhaustive()
    }
}

fn encode(notification: &Notification) -> Result<Vec<u8>, StoreError> {
    notification
        .to_json()
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl NotificationStore for RedisBackend {
    async fn save(&self, notification: &Notification) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let bytes = encode(notification)?;

        let _: () = conn
            .set(object_key(&notification.id), bytes)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to save notification: {e}")))?;

        tracing::debug!(
            notification_id = %notification.id,
            status = %notification.status,
            "Saved notification"
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Notification>, StoreError> {
        let mut conn = self.conn_manager.clone();

        let bytes: Option<Vec<u8>> = conn
            .get(object_key(id))
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to load notification: {e}")))?;

        bytes
            .map(|bytes| {
                Notification::from_json(&bytes)
                    .map_err(|e| StoreError::Serialization(format!("notification {id}: {e}")))
            })
            .transpose()
    }
}

#[async_trait]
impl SchedulingIndex for RedisBackend {
    async fn schedule(
        &self,
        set: ScheduleSet,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();

        let _: () = conn
            .zadd(set_key(set), id, epoch_score(at))
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to add to {set} set: {e}")))?;

        Ok(())
    }

    async fn pop_due(
        &self,
        set: ScheduleSet,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = set_key(set);
        let count = isize::try_from(limit).unwrap_or(isize::MAX);

        let ids: Vec<String> = conn
            .zrangebyscore_limit(key, "-inf", epoch_score(now), 0, count)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to range {set} set: {e}")))?;

        if ids.is_empty() {
            return Ok(ids);
        }

        let removed: Result<usize, _> = conn.zrem(key, &ids).await;
        if let Err(e) = removed {
            tracing::warn!(
                set = %set,
                count = ids.len(),
                error = %e,
                "Failed to remove popped ids, they may be returned again"
            );
        }

        Ok(ids)
    }

    async fn save_and_unschedule(&self, notification: &Notification) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let bytes = encode(notification)?;

        let _: () = redis::pipe()
            .atomic()
            .set(object_key(&notification.id), bytes)
            .ignore()
            .zrem(set_key(ScheduleSet::Due), &notification.id)
            .ignore()
            .zrem(set_key(ScheduleSet::Retry), &notification.id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to save and unschedule: {e}")))?;

        tracing::debug!(notification_id = %notification.id, "Saved notification and removed it from both sets");
        Ok(())
    }
}
