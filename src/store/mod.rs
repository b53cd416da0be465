//! Window stores.
//!
//! A [`WindowStore`] owns all mutable rate limiting state. The limiter itself
//! is stateless, so any number of limiters and service instances can share
//! one store.

mod memory;
mod redis_store;

pub use memory::MemoryWindowStore;
pub use redis_store::{RedisWindowStore, RedisWindowStoreConfig};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use crate::ratelimit::Rule;

/// Trait for sliding-window counter backends.
///
/// Implementations must be safe to call concurrently for the same and for
/// different identifiers.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Record one event for `identifier` under `rule` and report whether it
    /// fits in the window.
    ///
    /// Pruning, recording and counting happen as one indivisible step. The
    /// event is recorded even when it is denied.
    async fn check_and_update(&self, rule: &Rule, identifier: &str) -> Result<bool>;

    /// Number of events currently inside the window, without recording one.
    async fn count(&self, rule: &Rule, identifier: &str) -> Result<u64>;

    /// Forget the window for one (rule, identifier) pair.
    async fn reset(&self, rule: &Rule, identifier: &str) -> Result<()>;

    /// Release underlying resources. Later calls fail with `StoreClosed`.
    async fn close(&self) -> Result<()>;
}

/// Open the store selected by configuration.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn WindowStore>> {
    config.validate()?;
    let store: Arc<dyn WindowStore> = match config.backend {
        StoreBackend::Redis => Arc::new(
            RedisWindowStore::connect_with_config(&config.url, config.redis_config()).await?,
        ),
        StoreBackend::Memory => {
            let store = Arc::new(MemoryWindowStore::new().with_namespace(config.namespace.clone()));
            store.start_cleanup_task(config.cleanup_interval());
            store
        }
    };
    Ok(store)
}
