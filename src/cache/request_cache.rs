//! In-memory TTL store for GET response bodies.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::api::transport::Method;

/// A cached response body and the instant it stops being served.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub value: Value,
  pub expires_at: Instant,
}

impl CachedEntry {
  fn is_live(&self, now: Instant) -> bool {
    now < self.expires_at
  }
}

/// Response cache keyed by `(method, url)`.
///
/// Entries are only served while `now < expires_at`; an expired entry found
/// on read is evicted. A background sweeper (see [`RequestCache::spawn_sweeper`])
/// removes expired entries that are never read again.
#[derive(Debug, Default)]
pub struct RequestCache {
  entries: Mutex<HashMap<String, CachedEntry>>,
}

impl RequestCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn key(url: &str, method: Method) -> String {
    format!("{}:{}", method, url)
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, CachedEntry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Store `value` until `now + ttl`. A zero TTL stores an already-expired
  /// entry; callers skip `set` entirely when they do not want caching.
  pub fn set(&self, url: &str, method: Method, value: Value, ttl: Duration) {
    let entry = CachedEntry {
      value,
      expires_at: Instant::now() + ttl,
    };
    self.entries().insert(Self::key(url, method), entry);
  }

  pub fn get(&self, url: &str, method: Method) -> Option<Value> {
    let key = Self::key(url, method);
    let mut entries = self.entries();
    match entries.get(&key) {
      Some(entry) if entry.is_live(Instant::now()) => {
        debug!(key = %key, "Cache hit");
        Some(entry.value.clone())
      }
      Some(_) => {
        debug!(key = %key, "Cache entry expired");
        entries.remove(&key);
        None
      }
      None => None,
    }
  }

  /// Evict every entry whose key contains `pattern`. Returns how many went.
  pub fn invalidate_pattern(&self, pattern: &str) -> usize {
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|key, _| !key.contains(pattern));
    let removed = before - entries.len();
    if removed > 0 {
      debug!(pattern, removed, "Invalidated cache entries");
    }
    removed
  }

  pub fn clear(&self) {
    self.entries().clear();
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  #[allow(dead_code)]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Drop every expired entry. Returns how many were removed.
  pub fn sweep(&self) -> usize {
    let now = Instant::now();
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before - entries.len()
  }

  /// Sweep on a fixed interval until the cache is dropped.
  pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
    let cache: Weak<Self> = Arc::downgrade(self);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      // First tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let Some(cache) = cache.upgrade() else {
          break;
        };
        let removed = cache.sweep();
        if removed > 0 {
          debug!(removed, "Swept expired cache entries");
        }
      }
    })
  }
}
