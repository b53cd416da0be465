//! Redis-backed sliding window store.
//!
//! Each (rule, identifier) window is a sorted set. Members are unique event
//! tokens scored by their microsecond timestamp. One check is a single
//! `MULTI`/`EXEC` transaction:
//!
//! 1. `ZREMRANGEBYSCORE key -inf <window_start>` drops events that aged out
//! 2. `ZADD key <now> <now>:<uuid>` records this event
//! 3. `ZCARD key` counts what is left
//! 4. `PEXPIRE key <period>` lets idle windows disappear on their own
//!
//! Redis runs the transaction without interleaving other commands, so any
//! number of service instances can share the store without client-side locks.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::WindowStore;
use crate::error::{RatewardenError, Result};
use crate::ratelimit::{Clock, Rule, SystemClock, Timestamp, WindowKey};

/// Configuration for the Redis window store.
#[derive(Debug, Clone)]
pub struct RedisWindowStoreConfig {
    /// Prefix for every window key (default: "ratewarden")
    pub namespace: String,
    /// Upper bound on establishing the connection (default: 2s)
    pub connect_timeout: Duration,
    /// Upper bound on a single round-trip (default: 500ms)
    pub response_timeout: Duration,
}

impl Default for RedisWindowStoreConfig {
    fn default() -> Self {
        Self {
            namespace: "ratewarden".to_string(),
            connect_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_millis(500),
        }
    }
}

/// Sliding window store shared through Redis.
pub struct RedisWindowStore {
    /// `None` once the store has been closed
    connection: RwLock<Option<ConnectionManager>>,
    config: RedisWindowStoreConfig,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RedisWindowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisWindowStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisWindowStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` or `StoreTimeout` if the connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, RedisWindowStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    pub async fn connect_with_config(url: &str, config: RedisWindowStoreConfig) -> Result<Self> {
        let client = Client::open(url)?;
        let connection =
            match tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
                .await
            {
                Ok(connection) => connection?,
                Err(_) => return Err(RatewardenError::StoreTimeout(config.connect_timeout)),
            };

        info!(namespace = %config.namespace, "Connected to Redis window store");

        Ok(Self {
            connection: RwLock::new(Some(connection)),
            config,
            clock: Arc::new(SystemClock::new()),
        })
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Hand out a connection handle, failing once the store is closed.
    ///
    /// `ConnectionManager` is a multiplexed handle, so the clone is cheap and
    /// the lock is not held across the round-trip.
    async fn connection(&self) -> Result<ConnectionManager> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(RatewardenError::StoreClosed)
    }

    fn key(&self, rule: &Rule, identifier: &str) -> String {
        WindowKey::new(&self.config.namespace, identifier, rule).to_string_key()
    }

    /// Run one round-trip under the response timeout.
    async fn round_trip<T, F>(&self, key: &str, request: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        bounded(self.config.response_timeout, key, request).await
    }
}

/// Await a Redis request for at most `timeout`, mapping failures to store errors.
async fn bounded<T, F>(timeout: Duration, key: &str, request: F) -> Result<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(key = %key, error = %e, "Redis window store request failed");
            Err(RatewardenError::StoreUnavailable(e))
        }
        Err(_) => {
            warn!(key = %key, timeout = ?timeout, "Redis window store request timed out");
            Err(RatewardenError::StoreTimeout(timeout))
        }
    }
}

/// Key expiry for a window, rounded up to whole milliseconds.
fn expiry_millis(period: Duration) -> i64 {
    let millis = period.as_micros().div_ceil(1_000).max(1);
    i64::try_from(millis).unwrap_or(i64::MAX)
}

/// Unique sorted-set member for one event.
fn event_member(now: Timestamp) -> String {
    format!("{}:{}", now.as_micros(), Uuid::new_v4().simple())
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn check_and_update(&self, rule: &Rule, identifier: &str) -> Result<bool> {
        let mut conn = self.connection().await?;

        let key = self.key(rule, identifier);
        let now = self.clock.now();
        let window_start = now.window_start(rule.period());

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zrembyscore(&key, "-inf", window_start.as_micros())
            .ignore()
            .zadd(&key, event_member(now), now.as_micros())
            .ignore()
            .zcard(&key)
            .pexpire(&key, expiry_millis(rule.period()))
            .ignore();

        let (count,): (u64,) = self.round_trip(&key, pipe.query_async(&mut conn)).await?;
        let allowed = count <= rule.limit();

        trace!(
            key = %key,
            now = %now,
            count = count,
            limit = rule.limit(),
            allowed = allowed,
            "Checked Redis window"
        );

        Ok(allowed)
    }

    async fn count(&self, rule: &Rule, identifier: &str) -> Result<u64> {
        let mut conn = self.connection().await?;

        let key = self.key(rule, identifier);
        let window_start = self.clock.now().window_start(rule.period());
        let min = format!("({}", window_start.as_micros());

        self.round_trip(&key, conn.zcount(&key, min, "+inf")).await
    }

    async fn reset(&self, rule: &Rule, identifier: &str) -> Result<()> {
        let mut conn = self.connection().await?;

        let key = self.key(rule, identifier);
        self.round_trip::<(), _>(&key, conn.del(&key)).await?;

        debug!(key = %key, "Reset Redis window");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut connection = self.connection.write().await;
        if connection.take().is_some() {
            info!(namespace = %self.config.namespace, "Redis window store closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_rounds_up() {
        assert_eq!(expiry_millis(Duration::from_secs(10)), 10_000);
        assert_eq!(expiry_millis(Duration::from_micros(1_500)), 2);
        assert_eq!(expiry_millis(Duration::from_micros(1)), 1);
    }

    #[test]
    fn test_event_members_are_unique_for_equal_timestamps() {
        let now = Timestamp::from_micros(1_700_000_000_000_000);
        let a = event_member(now);
        let b = event_member(now);

        assert_ne!(a, b);
        assert!(a.starts_with("1700000000000000:"));
    }

    #[test]
    fn test_default_config() {
        let config = RedisWindowStoreConfig::default();
        assert_eq!(config.namespace, "ratewarden");
        assert_eq!(config.response_timeout, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_stalled_request_times_out() {
        let timeout = Duration::from_millis(20);
        let stalled = std::future::pending::<RedisResult<u64>>();

        let err = bounded(timeout, "k", stalled).await.unwrap_err();
        assert!(matches!(err, RatewardenError::StoreTimeout(t) if t == timeout));
        assert!(err.is_store_failure());
    }

    #[tokio::test]
    async fn test_request_error_is_unavailable() {
        let failed = async {
            Err::<u64, _>(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection reset",
            )))
        };

        let err = bounded(Duration::from_secs(1), "k", failed).await.unwrap_err();
        assert!(matches!(err, RatewardenError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let err = RedisWindowStore::connect("not-a-url").await.unwrap_err();
        assert!(err.is_store_failure());
    }
}
