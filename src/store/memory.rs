//! In-process window store.
//!
//! Holds every window in a concurrent map. Each update runs under the map's
//! per-entry lock, so a single process gets the same atomicity as the Redis
//! backend. Nothing is shared between processes.
//!
//! Idle windows are dropped lazily on access and by a periodic cleanup task
//! (see [`MemoryWindowStore::start_cleanup_task`]), which stops on `close()`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::WindowStore;
use crate::error::{RatewardenError, Result};
use crate::ratelimit::{Clock, Rule, SystemClock, Timestamp, WindowKey};

/// Default key namespace for in-process windows.
const DEFAULT_NAMESPACE: &str = "ratewarden";

/// Recorded events for one (rule, identifier) pair.
#[derive(Debug)]
struct Window {
    events: VecDeque<Timestamp>,
    expires_at: Timestamp,
}

impl Window {
    fn new(now: Timestamp) -> Self {
        Self {
            events: VecDeque::new(),
            expires_at: now,
        }
    }

    fn live_events(&self, window_start: Timestamp) -> u64 {
        self.events.iter().filter(|ts| **ts > window_start).count() as u64
    }
}

/// Window store kept in process memory.
#[derive(Debug)]
pub struct MemoryWindowStore {
    namespace: String,
    windows: DashMap<String, Window>,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
    /// Background purge task, if started
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryWindowStore {
    /// Create a store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            windows: DashMap::new(),
            clock,
            closed: AtomicBool::new(false),
            cleanup: Mutex::new(None),
        }
    }

    /// Use a different key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Number of windows currently held, including idle ones not yet purged.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop every window whose expiry has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, window| window.expires_at > now);
        let removed = before.saturating_sub(self.windows.len());

        debug!(
            removed = removed,
            remaining = self.windows.len(),
            "Purged expired windows"
        );
        removed
    }

    /// Spawn a Tokio task that calls [`purge_expired`](Self::purge_expired)
    /// every `every`.
    ///
    /// The task only holds a weak reference, so it ends when the store is
    /// dropped. `close()` aborts it. Starting it again replaces the old task.
    pub fn start_cleanup_task(self: &Arc<Self>, every: Duration) {
        let store = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                if store.closed.load(Ordering::Acquire) {
                    break;
                }
                store.purge_expired();
                trace!("Window cleanup tick completed");
            }
        });

        if let Some(previous) = self.cleanup.lock().replace(handle) {
            previous.abort();
        }
        debug!(interval = ?every, "Started window cleanup task");
    }

    /// Whether the background cleanup task is running.
    pub fn cleanup_running(&self) -> bool {
        self.cleanup
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RatewardenError::StoreClosed);
        }
        Ok(())
    }

    fn key(&self, rule: &Rule, identifier: &str) -> String {
        WindowKey::new(&self.namespace, identifier, rule).to_string_key()
    }
}

impl Default for MemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn check_and_update(&self, rule: &Rule, identifier: &str) -> Result<bool> {
        self.ensure_open()?;

        let key = self.key(rule, identifier);
        let now = self.clock.now();
        let window_start = now.window_start(rule.period());

        let count = {
            let mut window = self
                .windows
                .entry(key.clone())
                .or_insert_with(|| Window::new(now));

            if window.expires_at <= now {
                window.events.clear();
            }
            window.events.retain(|ts| *ts > window_start);
            window.events.push_back(now);
            window.expires_at = now.saturating_add(rule.period());
            window.events.len() as u64
        };

        trace!(key = %key, count = count, limit = rule.limit(), "Checked in-memory window");
        Ok(count <= rule.limit())
    }

    async fn count(&self, rule: &Rule, identifier: &str) -> Result<u64> {
        self.ensure_open()?;

        let key = self.key(rule, identifier);
        let now = self.clock.now();
        let window_start = now.window_start(rule.period());

        Ok(self
            .windows
            .get(&key)
            .filter(|window| window.expires_at > now)
            .map(|window| window.live_events(window_start))
            .unwrap_or(0))
    }

    async fn reset(&self, rule: &Rule, identifier: &str) -> Result<()> {
        self.ensure_open()?;
        self.windows.remove(&self.key(rule, identifier));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = self.cleanup.lock().take() {
            handle.abort();
        }
        self.windows.clear();
        debug!("In-memory window store closed");
        Ok(())
    }
}
